//! Core domain model for KRC: categories, scraped candidates, persisted articles
//! and per-category observation state.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const CRATE_NAME: &str = "krc-core";

/// Id reported by the extractor when an entry carries no parseable article id.
pub const UNKNOWN_ARTICLE_ID: i64 = -1;

/// One content stream on the cafe. The set is closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Category {
    Notice,
    Event,
    PatchNote,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CategoryParseError {
    #[error("unknown article category: {0:?}")]
    UnknownName(String),
    #[error("unknown article category code: {0}")]
    UnknownCode(i16),
}

impl Category {
    pub const ALL: [Category; 3] = [Category::Notice, Category::Event, Category::PatchNote];

    /// Stable storage code.
    pub fn code(self) -> i16 {
        match self {
            Category::Notice => 1,
            Category::Event => 2,
            Category::PatchNote => 3,
        }
    }

    pub fn from_code(code: i16) -> Result<Self, CategoryParseError> {
        match code {
            1 => Ok(Category::Notice),
            2 => Ok(Category::Event),
            3 => Ok(Category::PatchNote),
            other => Err(CategoryParseError::UnknownCode(other)),
        }
    }

    pub fn slug(self) -> &'static str {
        match self {
            Category::Notice => "notice",
            Category::Event => "event",
            Category::PatchNote => "patch-note",
        }
    }

    /// Board id of the category on the cafe (`posts?menuId=`).
    pub fn menu_id(self) -> u32 {
        match self {
            Category::Notice => 1,
            Category::Event => 2,
            Category::PatchNote => 9,
        }
    }

    pub fn listing_url(self, cafe_base: &str) -> String {
        format!("{}/posts?menuId={}", cafe_base.trim_end_matches('/'), self.menu_id())
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.slug())
    }
}

impl FromStr for Category {
    type Err = CategoryParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "notice" | "notices" => Ok(Category::Notice),
            "event" | "events" => Ok(Category::Event),
            "patch" | "patchnote" | "patchnotes" | "patch_notes" | "patch-note" | "patch-notes" => {
                Ok(Category::PatchNote)
            }
            _ => Err(CategoryParseError::UnknownName(s.to_string())),
        }
    }
}

/// Hex-encoded content digest of a category listing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn from_hex(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Extracted, not yet reconciled listing entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArticleCandidate {
    pub category: Category,
    pub id: i64,
    pub title: String,
    pub description: String,
    pub image_url: String,
}

impl ArticleCandidate {
    /// Candidates without a known id cannot be keyed and are left out of
    /// reconciliation and state tracking.
    pub fn is_reconcilable(&self) -> bool {
        self.id != UNKNOWN_ARTICLE_ID
    }

    pub fn into_article(self, created_at: DateTime<Utc>, modified_at: DateTime<Utc>) -> Article {
        Article {
            category: self.category,
            id: self.id,
            title: self.title,
            description: self.description,
            image_url: self.image_url,
            created_at,
            modified_at,
        }
    }
}

/// Handoff contract from the extraction side into the sync engine: one
/// category's entries in listing order plus the raw text they were cut from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScrapedBatch {
    pub category: Category,
    pub articles: Vec<ArticleCandidate>,
    pub raw_text: String,
}

impl ScrapedBatch {
    pub fn empty(category: Category) -> Self {
        Self {
            category,
            articles: Vec::new(),
            raw_text: String::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.articles.is_empty()
    }

    /// Id stored next to the category fingerprint. The listing sorts newest
    /// first, so this is the first candidate with a known id.
    pub fn representative_id(&self) -> i64 {
        self.articles
            .iter()
            .find(|a| a.is_reconcilable())
            .map(|a| a.id)
            .unwrap_or(UNKNOWN_ARTICLE_ID)
    }
}

/// Persisted article, keyed by `(category, id)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Article {
    pub category: Category,
    pub id: i64,
    pub title: String,
    pub description: String,
    pub image_url: String,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

/// Last observation of a category listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryState {
    pub category: Category,
    pub representative_id: i64,
    pub fingerprint: Fingerprint,
    pub observed_at: DateTime<Utc>,
}

/// Articles actually written by one sync run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncDelta {
    pub articles: Vec<Article>,
}

impl SyncDelta {
    pub fn is_empty(&self) -> bool {
        self.articles.is_empty()
    }

    pub fn len(&self) -> usize {
        self.articles.len()
    }

    pub fn push(&mut self, article: Article) {
        self.articles.push(article);
    }

    pub fn extend(&mut self, other: SyncDelta) {
        self.articles.extend(other.articles);
    }
}
