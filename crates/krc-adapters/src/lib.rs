//! Listing sources: fetch a category board from the cafe (or a fixture on
//! disk) and cut it into article candidates.

use std::collections::BTreeMap;
use std::path::PathBuf;

use async_trait::async_trait;
use krc_core::{ArticleCandidate, Category, ScrapedBatch, UNKNOWN_ARTICLE_ID};
use krc_storage::{FetchError, HttpFetcher};
use scraper::{ElementRef, Html, Selector};
use thiserror::Error;
use tracing::debug;

pub const CRATE_NAME: &str = "krc-adapters";

pub const DEFAULT_CAFE_BASE: &str = "https://www.plug.game/kingsraid-en";

const ENTRY_SELECTOR: &str = "#data-container .frame_plug";
const TITLE_SELECTOR: &str = "a.link_feed .preview_text strong.tit_feed";
const DESCRIPTION_SELECTOR: &str = "a.link_feed .preview_text p.txt_feed";
const IMAGE_SELECTOR: &str = "a.link_feed .preview_feed div.img";
const ARTICLE_ID_ATTR: &str = "data-articleid";

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("invalid selector {selector:?}: {message}")]
    Selector { selector: &'static str, message: String },
    #[error("reading fixture {}: {source}", path.display())]
    Fixture {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Extraction seam consumed by the sync service.
#[async_trait]
pub trait ListingSource: Send + Sync {
    async fn scrape(&self, category: Category) -> Result<ScrapedBatch, AdapterError>;
}

struct ListingSelectors {
    entry: Selector,
    title: Selector,
    description: Selector,
    image: Selector,
}

impl ListingSelectors {
    fn new() -> Result<Self, AdapterError> {
        Ok(Self {
            entry: parse_selector(ENTRY_SELECTOR)?,
            title: parse_selector(TITLE_SELECTOR)?,
            description: parse_selector(DESCRIPTION_SELECTOR)?,
            image: parse_selector(IMAGE_SELECTOR)?,
        })
    }
}

fn parse_selector(selector: &'static str) -> Result<Selector, AdapterError> {
    Selector::parse(selector).map_err(|e| AdapterError::Selector {
        selector,
        message: e.to_string(),
    })
}

fn joined_text(scope: ElementRef<'_>, selector: &Selector) -> String {
    scope
        .select(selector)
        .flat_map(|n| n.text())
        .collect::<String>()
        .trim()
        .to_string()
}

/// `"12345"` -> 12345; anything unparseable maps to [`UNKNOWN_ARTICLE_ID`].
pub fn parse_article_id(raw: &str) -> i64 {
    raw.trim().parse().unwrap_or(UNKNOWN_ARTICLE_ID)
}

/// Pulls the url out of an inline `background-image:url(...)` style.
pub fn background_image_url(style: &str) -> Option<String> {
    let start = style.find("background-image:url(")? + "background-image:url(".len();
    let rest = &style[start..];
    let end = rest.rfind(')')?;
    let url = rest[..end].trim().trim_matches(|c| c == '"' || c == '\'');
    if url.is_empty() {
        None
    } else {
        Some(url.to_string())
    }
}

/// Cuts one listing page into candidates, in page order. The raw text used
/// for fingerprinting is the concatenated text of every entry, taken before
/// any per-field trimming.
pub fn parse_listing(category: Category, html: &str) -> Result<ScrapedBatch, AdapterError> {
    let selectors = ListingSelectors::new()?;
    let document = Html::parse_document(html);

    let mut raw_text = String::new();
    let mut articles = Vec::new();
    for entry in document.select(&selectors.entry) {
        raw_text.extend(entry.text());

        let id = entry
            .value()
            .attr(ARTICLE_ID_ATTR)
            .map(parse_article_id)
            .unwrap_or(UNKNOWN_ARTICLE_ID);
        let image_url = entry
            .select(&selectors.image)
            .next()
            .and_then(|n| n.value().attr("style"))
            .and_then(background_image_url)
            .unwrap_or_default();

        articles.push(ArticleCandidate {
            category,
            id,
            title: joined_text(entry, &selectors.title),
            description: joined_text(entry, &selectors.description),
            image_url,
        });
    }

    Ok(ScrapedBatch {
        category,
        articles,
        raw_text,
    })
}

/// Live cafe boards.
#[derive(Debug, Clone)]
pub struct PlugCafeSource {
    http: HttpFetcher,
    base_url: String,
    listing_urls: BTreeMap<Category, String>,
}

impl PlugCafeSource {
    pub fn new(http: HttpFetcher, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            listing_urls: BTreeMap::new(),
        }
    }

    pub fn with_listing_url(mut self, category: Category, url: impl Into<String>) -> Self {
        self.listing_urls.insert(category, url.into());
        self
    }

    pub fn listing_url(&self, category: Category) -> String {
        self.listing_urls
            .get(&category)
            .cloned()
            .unwrap_or_else(|| category.listing_url(&self.base_url))
    }
}

#[async_trait]
impl ListingSource for PlugCafeSource {
    async fn scrape(&self, category: Category) -> Result<ScrapedBatch, AdapterError> {
        let url = self.listing_url(category);
        let page = self.http.fetch_text(&url).await?;
        let batch = parse_listing(category, &page.body)?;
        debug!(%category, url = %page.final_url, entries = batch.articles.len(), "parsed listing");
        Ok(batch)
    }
}

/// Saved listing pages, one `<slug>.html` per category.
#[derive(Debug, Clone)]
pub struct FixtureSource {
    dir: PathBuf,
}

impl FixtureSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn fixture_path(&self, category: Category) -> PathBuf {
        self.dir.join(format!("{}.html", category.slug()))
    }
}

#[async_trait]
impl ListingSource for FixtureSource {
    async fn scrape(&self, category: Category) -> Result<ScrapedBatch, AdapterError> {
        let path = self.fixture_path(category);
        let html = tokio::fs::read_to_string(&path)
            .await
            .map_err(|source| AdapterError::Fixture { path, source })?;
        parse_listing(category, &html)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const PAGE: &str = r#"
        <html><body>
        <div id="data-container">
          <div class="frame_plug" data-articleid="5">
            <a class="link_feed" href="/posts/5">
              <div class="preview_text">
                <strong class="tit_feed"> Patch 1.2 </strong>
                <p class="txt_feed">New heroes and balance changes</p>
              </div>
              <div class="preview_feed">
                <div class="img" style="background-image:url(https://cdn.example/p12.jpg)"></div>
              </div>
            </a>
          </div>
          <div class="frame_plug" data-articleid="4">
            <a class="link_feed" href="/posts/4">
              <div class="preview_text">
                <strong class="tit_feed">Patch 1.1</strong>
                <p class="txt_feed">Bug fixes</p>
              </div>
            </a>
          </div>
          <div class="frame_plug" data-articleid="pinned">
            <a class="link_feed">
              <div class="preview_text"><strong class="tit_feed">Pinned</strong></div>
            </a>
          </div>
        </div>
        <div class="frame_plug" data-articleid="99">outside the container</div>
        </body></html>
    "#;

    #[test]
    fn parses_entries_in_page_order() {
        let batch = parse_listing(Category::PatchNote, PAGE).unwrap();
        let ids: Vec<i64> = batch.articles.iter().map(|a| a.id).collect();
        assert_eq!(ids, vec![5, 4, UNKNOWN_ARTICLE_ID]);

        let first = &batch.articles[0];
        assert_eq!(first.category, Category::PatchNote);
        assert_eq!(first.title, "Patch 1.2");
        assert_eq!(first.description, "New heroes and balance changes");
        assert_eq!(first.image_url, "https://cdn.example/p12.jpg");
        assert_eq!(batch.articles[1].image_url, "");
        assert_eq!(batch.representative_id(), 5);
    }

    #[test]
    fn raw_text_covers_only_container_entries() {
        let batch = parse_listing(Category::Notice, PAGE).unwrap();
        assert!(batch.raw_text.contains("Patch 1.2"));
        assert!(batch.raw_text.contains("Bug fixes"));
        assert!(!batch.raw_text.contains("outside the container"));
    }

    #[test]
    fn page_without_container_is_empty() {
        let page = "<html><body><p>maintenance</p></body></html>";
        let batch = parse_listing(Category::Event, page).unwrap();
        assert!(batch.is_empty());
        assert!(batch.raw_text.is_empty());
    }

    #[test]
    fn background_image_variants() {
        assert_eq!(
            background_image_url("background-image:url('https://a/b.png');").as_deref(),
            Some("https://a/b.png")
        );
        assert_eq!(background_image_url("color: red"), None);
        assert_eq!(background_image_url("background-image:url()"), None);
    }

    #[test]
    fn article_ids_fall_back_to_unknown() {
        assert_eq!(parse_article_id(" 1203 "), 1203);
        assert_eq!(parse_article_id("abc"), UNKNOWN_ARTICLE_ID);
    }

    #[test]
    fn listing_url_override_wins() {
        let http = HttpFetcher::new(Default::default()).unwrap();
        let source = PlugCafeSource::new(http, DEFAULT_CAFE_BASE)
            .with_listing_url(Category::Event, "http://localhost/events");
        assert_eq!(source.listing_url(Category::Event), "http://localhost/events");
        assert_eq!(
            source.listing_url(Category::Notice),
            "https://www.plug.game/kingsraid-en/posts?menuId=1"
        );
    }

    #[tokio::test]
    async fn fixture_source_reads_slug_file() {
        let dir = tempdir().expect("tempdir");
        std::fs::write(dir.path().join("patch-note.html"), PAGE).unwrap();
        let source = FixtureSource::new(dir.path());

        let batch = source.scrape(Category::PatchNote).await.unwrap();
        assert_eq!(batch.articles.len(), 3);

        let err = source.scrape(Category::Notice).await.unwrap_err();
        assert!(matches!(err, AdapterError::Fixture { .. }));
    }
}
