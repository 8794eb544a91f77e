use std::sync::Arc;

use chrono::{DateTime, Utc};
use krc_adapters::ListingSource;
use krc_core::{Category, Fingerprint, ScrapedBatch, SyncDelta};
use krc_storage::ArticleStore;
use serde::Serialize;
use tokio::task::JoinSet;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::fingerprint::fingerprint;
use crate::reconcile::{ArticleReconciler, Reconciliation, SkipReason};
use crate::report::DeltaSink;
use crate::tracker::{CategoryCheck, CategoryTracker};
use crate::SyncError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncOutcome {
    /// Empty listing or fingerprint match; nothing was reconciled.
    Unchanged,
    /// Listing changed and every article reconciled cleanly.
    Synced,
    /// Listing changed and at least one article write failed.
    PartiallyFailed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArticleFailure {
    pub article_id: i64,
    pub title: String,
    pub error: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CategorySyncReport {
    pub category: Category,
    pub outcome: SyncOutcome,
    pub fingerprint: Option<Fingerprint>,
    pub delta: SyncDelta,
    pub inserted: usize,
    pub updated: usize,
    pub skipped: usize,
    pub lost_races: usize,
    /// Candidates without an article id, left out of reconciliation.
    pub excluded: usize,
    pub failures: Vec<ArticleFailure>,
}

impl CategorySyncReport {
    /// Report with no counts yet; `outcome` starts as `Unchanged`.
    fn empty(category: Category, fingerprint: Option<Fingerprint>) -> Self {
        Self {
            category,
            outcome: SyncOutcome::Unchanged,
            fingerprint,
            delta: SyncDelta::default(),
            inserted: 0,
            updated: 0,
            skipped: 0,
            lost_races: 0,
            excluded: 0,
            failures: Vec::new(),
        }
    }
}

/// Drives one category from scraped batch to persisted delta.
#[derive(Clone)]
pub struct SyncEngine {
    store: Arc<dyn ArticleStore>,
}

impl SyncEngine {
    pub fn new(store: Arc<dyn ArticleStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn ArticleStore> {
        &self.store
    }

    /// Fingerprint check, then per-article reconciliation. A tracker failure
    /// aborts the category; article failures are collected and the siblings
    /// still run. The fingerprint is stored before any article is written.
    pub async fn run_category(
        &self,
        batch: &ScrapedBatch,
    ) -> Result<CategorySyncReport, SyncError> {
        let category = batch.category;
        if batch.is_empty() {
            debug!(%category, "empty listing, nothing to track");
            return Ok(CategorySyncReport::empty(category, None));
        }

        let fp = fingerprint(&batch.raw_text);
        let tracker = CategoryTracker::new(self.store.as_ref());
        let check = tracker
            .check_and_update(category, &fp, batch.representative_id(), Utc::now())
            .await
            .map_err(|source| SyncError::State { category, source })?;

        if check == CategoryCheck::Unchanged {
            debug!(%category, fingerprint = %fp, "category unchanged");
            return Ok(CategorySyncReport::empty(category, Some(fp)));
        }

        let mut report = CategorySyncReport::empty(category, Some(fp));
        let reconciler = ArticleReconciler::new(self.store.as_ref());
        for candidate in &batch.articles {
            if !candidate.is_reconcilable() {
                warn!(%category, title = %candidate.title, "article without id left out of sync");
                report.excluded += 1;
                continue;
            }

            match reconciler.reconcile(candidate, Utc::now()).await {
                Ok(Reconciliation::Inserted(article)) => {
                    info!(
                        %category,
                        article_id = article.id,
                        title = %article.title,
                        "article inserted"
                    );
                    report.inserted += 1;
                    report.delta.push(article);
                }
                Ok(Reconciliation::Updated(article)) => {
                    info!(
                        %category,
                        article_id = article.id,
                        title = %article.title,
                        "article revised"
                    );
                    report.updated += 1;
                    report.delta.push(article);
                }
                Ok(Reconciliation::Skipped(reason)) => {
                    report.skipped += 1;
                    if reason == SkipReason::LostInsertRace {
                        debug!(
                            %category,
                            article_id = candidate.id,
                            "insert lost to concurrent writer"
                        );
                        report.lost_races += 1;
                    }
                }
                Err(err) => {
                    warn!(
                        %category,
                        article_id = candidate.id,
                        error = %err,
                        "article write failed"
                    );
                    report.failures.push(ArticleFailure {
                        article_id: candidate.id,
                        title: candidate.title.clone(),
                        error: err.to_string(),
                    });
                }
            }
        }

        report.outcome = if report.failures.is_empty() {
            SyncOutcome::Synced
        } else {
            SyncOutcome::PartiallyFailed
        };
        Ok(report)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CategoryFailure {
    pub category: Category,
    pub error: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Unchanged,
    Synced,
    PartiallyFailed,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncRunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub categories: Vec<CategorySyncReport>,
    pub failures: Vec<CategoryFailure>,
}

impl SyncRunSummary {
    pub fn outcome(&self) -> RunOutcome {
        if !self.failures.is_empty() && self.categories.is_empty() {
            return RunOutcome::Failed;
        }
        let partial = self
            .categories
            .iter()
            .any(|c| c.outcome == SyncOutcome::PartiallyFailed);
        if partial || !self.failures.is_empty() {
            RunOutcome::PartiallyFailed
        } else if self
            .categories
            .iter()
            .all(|c| c.outcome == SyncOutcome::Unchanged)
        {
            RunOutcome::Unchanged
        } else {
            RunOutcome::Synced
        }
    }

    pub fn has_failures(&self) -> bool {
        matches!(self.outcome(), RunOutcome::PartiallyFailed | RunOutcome::Failed)
    }

    /// Every article written during the run, category order.
    pub fn delta(&self) -> SyncDelta {
        let mut delta = SyncDelta::default();
        for report in &self.categories {
            delta.extend(report.delta.clone());
        }
        delta
    }
}

/// Scrape + sync across categories, then hand the summary to the sinks.
pub struct SyncService {
    engine: SyncEngine,
    source: Arc<dyn ListingSource>,
    categories: Vec<Category>,
    sinks: Vec<Arc<dyn DeltaSink>>,
}

impl SyncService {
    pub fn new(engine: SyncEngine, source: Arc<dyn ListingSource>) -> Self {
        Self {
            engine,
            source,
            categories: Category::ALL.to_vec(),
            sinks: Vec::new(),
        }
    }

    pub fn with_categories(mut self, categories: Vec<Category>) -> Self {
        self.categories = categories;
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn DeltaSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn engine(&self) -> &SyncEngine {
        &self.engine
    }

    pub fn categories(&self) -> &[Category] {
        &self.categories
    }

    /// Scrapes and syncs a single category. Extraction errors abort before
    /// any state is read or written.
    pub async fn sync_category(&self, category: Category) -> Result<CategorySyncReport, SyncError> {
        sync_one(self.engine.clone(), self.source.clone(), category).await
    }

    pub async fn run_once(&self) -> SyncRunSummary {
        let categories = self.categories.clone();
        self.run_categories(&categories).await
    }

    /// Categories touch disjoint keys, so they run concurrently.
    pub async fn run_categories(&self, categories: &[Category]) -> SyncRunSummary {
        let started_at = Utc::now();
        let run_id = Uuid::new_v4();

        let mut tasks = JoinSet::new();
        for &category in categories {
            let engine = self.engine.clone();
            let source = self.source.clone();
            tasks.spawn(
                async move { (category, sync_one(engine, source, category).await) }
                    .instrument(info_span!("sync_category", %run_id, %category)),
            );
        }

        let mut reports = Vec::new();
        let mut failures = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(report))) => reports.push(report),
                Ok((category, Err(err))) => {
                    warn!(%run_id, %category, error = %err, "category sync failed");
                    failures.push(CategoryFailure {
                        category,
                        error: err.to_string(),
                    });
                }
                Err(err) => warn!(%run_id, error = %err, "category sync task aborted"),
            }
        }
        // A panicked task loses its category; record it so the run is not
        // reported as clean.
        for &category in categories {
            let seen = reports.iter().any(|r: &CategorySyncReport| r.category == category)
                || failures.iter().any(|f: &CategoryFailure| f.category == category);
            if !seen {
                failures.push(CategoryFailure {
                    category,
                    error: "sync task aborted".to_string(),
                });
            }
        }
        reports.sort_by_key(|r| r.category);
        failures.sort_by_key(|f| f.category);

        let summary = SyncRunSummary {
            run_id,
            started_at,
            finished_at: Utc::now(),
            categories: reports,
            failures,
        };
        info!(
            %run_id,
            outcome = ?summary.outcome(),
            written = summary.delta().len(),
            "sync run finished"
        );

        for sink in &self.sinks {
            if let Err(err) = sink.publish(&summary).await {
                warn!(%run_id, error = %err, "delta sink failed");
            }
        }
        summary
    }
}

async fn sync_one(
    engine: SyncEngine,
    source: Arc<dyn ListingSource>,
    category: Category,
) -> Result<CategorySyncReport, SyncError> {
    let batch = source
        .scrape(category)
        .await
        .map_err(|source| SyncError::Extraction { category, source })?;
    engine.run_category(&batch).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{BTreeMap, HashSet};

    use async_trait::async_trait;
    use krc_adapters::AdapterError;
    use krc_core::{Article, ArticleCandidate, CategoryState, UNKNOWN_ARTICLE_ID};
    use krc_storage::{InsertOutcome, MemoryStore, StorageError};
    use tokio::sync::Mutex;

    fn candidate(category: Category, id: i64, title: &str) -> ArticleCandidate {
        ArticleCandidate {
            category,
            id,
            title: title.to_string(),
            description: format!("{title} details"),
            image_url: String::new(),
        }
    }

    fn batch(category: Category, entries: &[(i64, &str)]) -> ScrapedBatch {
        let articles: Vec<_> = entries
            .iter()
            .map(|(id, title)| candidate(category, *id, title))
            .collect();
        let raw_text = articles
            .iter()
            .map(|a| format!("{}{}", a.title, a.description))
            .collect();
        ScrapedBatch {
            category,
            articles,
            raw_text,
        }
    }

    fn patch_notes(first_title: &str) -> ScrapedBatch {
        batch(Category::PatchNote, &[(5, first_title), (4, "Patch 1.1")])
    }

    /// Delegates to a memory store but fails selected operations.
    #[derive(Default)]
    struct FaultyStore {
        inner: MemoryStore,
        fail_state_reads: bool,
        fail_state_writes: bool,
        fail_article_ids: HashSet<i64>,
    }

    impl FaultyStore {
        fn unavailable() -> StorageError {
            StorageError::Unavailable("injected".into())
        }
    }

    #[async_trait]
    impl ArticleStore for FaultyStore {
        async fn get_article(&self, c: Category, id: i64) -> Result<Option<Article>, StorageError> {
            self.inner.get_article(c, id).await
        }
        async fn insert_article_if_absent(
            &self,
            a: &Article,
        ) -> Result<InsertOutcome, StorageError> {
            if self.fail_article_ids.contains(&a.id) {
                return Err(Self::unavailable());
            }
            self.inner.insert_article_if_absent(a).await
        }
        async fn put_article(&self, a: &Article) -> Result<(), StorageError> {
            if self.fail_article_ids.contains(&a.id) {
                return Err(Self::unavailable());
            }
            self.inner.put_article(a).await
        }
        async fn get_category_state(
            &self,
            c: Category,
        ) -> Result<Option<CategoryState>, StorageError> {
            if self.fail_state_reads {
                return Err(Self::unavailable());
            }
            self.inner.get_category_state(c).await
        }
        async fn put_category_state(&self, s: &CategoryState) -> Result<(), StorageError> {
            if self.fail_state_writes {
                return Err(Self::unavailable());
            }
            self.inner.put_category_state(s).await
        }
        async fn list_articles(&self) -> Result<Vec<Article>, StorageError> {
            self.inner.list_articles().await
        }
        async fn list_articles_by_category(
            &self,
            c: Category,
            n: usize,
        ) -> Result<Vec<Article>, StorageError> {
            self.inner.list_articles_by_category(c, n).await
        }
        async fn latest_category_state(&self) -> Result<Option<CategoryState>, StorageError> {
            self.inner.latest_category_state().await
        }
    }

    /// Serves whatever batch was last queued for a category.
    #[derive(Default)]
    struct QueuedSource {
        batches: Mutex<BTreeMap<Category, ScrapedBatch>>,
        broken: HashSet<Category>,
    }

    impl QueuedSource {
        async fn set(&self, batch: ScrapedBatch) {
            self.batches.lock().await.insert(batch.category, batch);
        }
    }

    #[async_trait]
    impl ListingSource for QueuedSource {
        async fn scrape(&self, category: Category) -> Result<ScrapedBatch, AdapterError> {
            if self.broken.contains(&category) {
                return Err(AdapterError::Selector {
                    selector: "#data-container",
                    message: "page layout changed".into(),
                });
            }
            Ok(self
                .batches
                .lock()
                .await
                .get(&category)
                .cloned()
                .unwrap_or_else(|| ScrapedBatch::empty(category)))
        }
    }

    #[tokio::test]
    async fn empty_batch_touches_nothing() {
        let store = Arc::new(MemoryStore::new());
        let engine = SyncEngine::new(store.clone());

        let report = engine.run_category(&ScrapedBatch::empty(Category::Event)).await.unwrap();

        assert_eq!(report.outcome, SyncOutcome::Unchanged);
        assert!(report.delta.is_empty());
        assert_eq!(store.stats().reads, 0);
        assert_eq!(store.stats().writes, 0);
        assert!(store.get_category_state(Category::Event).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn first_run_inserts_everything_and_tracks_representative() {
        let store = Arc::new(MemoryStore::new());
        let engine = SyncEngine::new(store.clone());
        let scraped = patch_notes("Patch 1.2");

        let report = engine.run_category(&scraped).await.unwrap();

        assert_eq!(report.outcome, SyncOutcome::Synced);
        assert_eq!(report.inserted, 2);
        let ids: Vec<i64> = report.delta.articles.iter().map(|a| a.id).collect();
        assert_eq!(ids, vec![5, 4]);

        let state = store.get_category_state(Category::PatchNote).await.unwrap().unwrap();
        assert_eq!(state.representative_id, 5);
        assert_eq!(state.fingerprint, fingerprint(&scraped.raw_text));
    }

    #[tokio::test]
    async fn identical_rerun_is_unchanged_without_writes() {
        let store = Arc::new(MemoryStore::new());
        let engine = SyncEngine::new(store.clone());
        engine.run_category(&patch_notes("Patch 1.2")).await.unwrap();
        let writes = store.stats().writes;

        let report = engine.run_category(&patch_notes("Patch 1.2")).await.unwrap();

        assert_eq!(report.outcome, SyncOutcome::Unchanged);
        assert!(report.delta.is_empty());
        assert_eq!(store.stats().writes, writes);
    }

    #[tokio::test]
    async fn retitled_article_is_revised_and_sibling_skipped() {
        let store = Arc::new(MemoryStore::new());
        let engine = SyncEngine::new(store.clone());
        let first = engine.run_category(&patch_notes("Patch 1.2")).await.unwrap();
        let created_at = first.delta.articles[0].created_at;

        let report = engine.run_category(&patch_notes("Patch 1.2 Hotfix")).await.unwrap();

        assert_eq!(report.outcome, SyncOutcome::Synced);
        assert_eq!((report.inserted, report.updated, report.skipped), (0, 1, 1));
        assert_eq!(report.delta.len(), 1);
        let revised = &report.delta.articles[0];
        assert_eq!(revised.id, 5);
        assert_eq!(revised.title, "Patch 1.2 Hotfix");
        assert_eq!(revised.created_at, created_at);

        let stored = store.get_article(Category::PatchNote, 5).await.unwrap().unwrap();
        assert_eq!(stored.created_at, created_at);
    }

    #[tokio::test]
    async fn write_failure_is_partial_and_keeps_successes() {
        let store = Arc::new(FaultyStore {
            fail_article_ids: HashSet::from([4]),
            ..Default::default()
        });
        let engine = SyncEngine::new(store.clone());

        let report = engine.run_category(&patch_notes("Patch 1.2")).await.unwrap();

        assert_eq!(report.outcome, SyncOutcome::PartiallyFailed);
        assert_eq!(report.delta.len(), 1);
        assert_eq!(report.delta.articles[0].id, 5);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].article_id, 4);
        // State reflects that the listing was examined.
        assert!(store.inner.get_category_state(Category::PatchNote).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn state_read_failure_is_fatal_not_unchanged() {
        let store = Arc::new(FaultyStore {
            fail_state_reads: true,
            ..Default::default()
        });
        let engine = SyncEngine::new(store.clone());

        let err = engine.run_category(&patch_notes("Patch 1.2")).await.unwrap_err();

        assert!(matches!(err, SyncError::State { category: Category::PatchNote, .. }));
        assert_eq!(store.inner.article_count().await, 0);
    }

    #[tokio::test]
    async fn state_write_failure_is_fatal_before_articles() {
        let store = Arc::new(FaultyStore {
            fail_state_writes: true,
            ..Default::default()
        });
        let engine = SyncEngine::new(store.clone());

        let err = engine.run_category(&patch_notes("Patch 1.2")).await.unwrap_err();

        assert!(matches!(err, SyncError::State { category: Category::PatchNote, .. }));
        assert_eq!(store.inner.article_count().await, 0);
    }

    #[tokio::test]
    async fn description_only_edit_is_a_synced_run() {
        let store = Arc::new(MemoryStore::new());
        let source = Arc::new(QueuedSource::default());
        let service = SyncService::new(SyncEngine::new(store.clone()), source.clone())
            .with_categories(vec![Category::PatchNote]);

        source.set(patch_notes("Patch 1.2")).await;
        service.run_once().await;
        let before = store.get_category_state(Category::PatchNote).await.unwrap().unwrap();

        let mut edited = patch_notes("Patch 1.2");
        edited.articles[0].description = "New heroes, balance changes and a hotfix".into();
        edited.raw_text = edited
            .articles
            .iter()
            .map(|a| format!("{}{}", a.title, a.description))
            .collect();
        source.set(edited).await;
        let summary = service.run_once().await;

        // Titles are the only revision signal, so nothing is written.
        assert!(summary.delta().is_empty());
        assert_eq!(summary.categories[0].outcome, SyncOutcome::Synced);
        assert_eq!(summary.outcome(), RunOutcome::Synced);
        let after = store.get_category_state(Category::PatchNote).await.unwrap().unwrap();
        assert_ne!(after.fingerprint, before.fingerprint);
    }

    #[tokio::test]
    async fn unknown_ids_are_excluded_from_sync() {
        let store = Arc::new(MemoryStore::new());
        let engine = SyncEngine::new(store.clone());
        let scraped = batch(
            Category::Notice,
            &[(UNKNOWN_ARTICLE_ID, "Pinned"), (30, "Maintenance")],
        );

        let report = engine.run_category(&scraped).await.unwrap();

        assert_eq!(report.excluded, 1);
        assert_eq!(report.inserted, 1);
        assert_eq!(store.article_count().await, 1);
        let state = store.get_category_state(Category::Notice).await.unwrap().unwrap();
        assert_eq!(state.representative_id, 30);
    }

    #[tokio::test]
    async fn service_aggregates_categories() {
        let store = Arc::new(MemoryStore::new());
        let source = Arc::new(QueuedSource::default());
        source.set(patch_notes("Patch 1.2")).await;
        source.set(batch(Category::Notice, &[(12, "Maintenance")])).await;
        let service = SyncService::new(SyncEngine::new(store.clone()), source.clone());

        let first = service.run_once().await;
        assert_eq!(first.outcome(), RunOutcome::Synced);
        assert_eq!(first.delta().len(), 3);
        let categories: Vec<Category> = first.categories.iter().map(|c| c.category).collect();
        assert_eq!(categories, vec![Category::Notice, Category::Event, Category::PatchNote]);

        let second = service.run_once().await;
        assert_eq!(second.outcome(), RunOutcome::Unchanged);
        assert!(second.delta().is_empty());
    }

    #[tokio::test]
    async fn extraction_failure_is_reported_without_touching_state() {
        let store = Arc::new(MemoryStore::new());
        let source = Arc::new(QueuedSource {
            broken: HashSet::from([Category::Event]),
            ..Default::default()
        });
        source.set(batch(Category::Notice, &[(12, "Maintenance")])).await;
        let service = SyncService::new(SyncEngine::new(store.clone()), source);

        let summary = service
            .run_categories(&[Category::Notice, Category::Event])
            .await;

        assert_eq!(summary.outcome(), RunOutcome::PartiallyFailed);
        assert!(summary.has_failures());
        assert_eq!(summary.failures.len(), 1);
        assert_eq!(summary.failures[0].category, Category::Event);
        assert_eq!(summary.delta().len(), 1);
        assert!(store.get_category_state(Category::Event).await.unwrap().is_none());

        let only_broken = service.sync_category(Category::Event).await.unwrap_err();
        assert!(matches!(only_broken, SyncError::Extraction { .. }));
    }

    #[test]
    fn run_outcome_when_every_category_fails() {
        let summary = SyncRunSummary {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            finished_at: Utc::now(),
            categories: vec![],
            failures: vec![CategoryFailure {
                category: Category::Notice,
                error: "down".into(),
            }],
        };
        assert_eq!(summary.outcome(), RunOutcome::Failed);
    }
}
