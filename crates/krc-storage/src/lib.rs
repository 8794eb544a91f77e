//! Persistence contract for articles and category state, plus the HTTP fetch
//! utilities used by the listing adapters.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use krc_core::{Article, Category, CategoryState};
use thiserror::Error;
use tokio::sync::Mutex;

mod http;
mod pg;

pub use http::{FetchError, FetchedResponse, HttpClientConfig, HttpFetcher};
pub use pg::PgStore;

pub const CRATE_NAME: &str = "krc-storage";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("corrupt record: {0}")]
    Corrupt(String),
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// Result of a conditional "insert only if absent".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// Another writer created the key first; its record stands.
    Conflict,
}

/// Storage seam for the sync engine and the query surface.
///
/// Implementations must give read-your-writes consistency within a run and
/// an atomic check-and-set for [`ArticleStore::insert_article_if_absent`].
#[async_trait]
pub trait ArticleStore: Send + Sync {
    async fn get_article(
        &self,
        category: Category,
        id: i64,
    ) -> Result<Option<Article>, StorageError>;

    async fn insert_article_if_absent(
        &self,
        article: &Article,
    ) -> Result<InsertOutcome, StorageError>;

    /// Overwrites title, description, image url and modified-at of the keyed
    /// article, inserting it when missing. Never rewrites an existing created-at.
    async fn put_article(&self, article: &Article) -> Result<(), StorageError>;

    async fn get_category_state(
        &self,
        category: Category,
    ) -> Result<Option<CategoryState>, StorageError>;

    async fn put_category_state(&self, state: &CategoryState) -> Result<(), StorageError>;

    async fn list_articles(&self) -> Result<Vec<Article>, StorageError>;

    /// Newest ids first.
    async fn list_articles_by_category(
        &self,
        category: Category,
        limit: usize,
    ) -> Result<Vec<Article>, StorageError>;

    /// The tracked state with the greatest representative id.
    async fn latest_category_state(&self) -> Result<Option<CategoryState>, StorageError>;
}

/// Operation counters, mostly for asserting what a run touched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub reads: usize,
    pub writes: usize,
}

#[derive(Debug, Default)]
struct MemoryTables {
    articles: BTreeMap<(Category, i64), Article>,
    states: BTreeMap<Category, CategoryState>,
}

/// Process-local store. A single lock guards both tables, which makes the
/// conditional insert a true check-and-set.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<MemoryTables>,
    reads: AtomicUsize,
    writes: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> StoreStats {
        StoreStats {
            reads: self.reads.load(Ordering::SeqCst),
            writes: self.writes.load(Ordering::SeqCst),
        }
    }

    pub async fn article_count(&self) -> usize {
        self.tables.lock().await.articles.len()
    }

    fn read(&self) {
        self.reads.fetch_add(1, Ordering::SeqCst);
    }

    fn write(&self) {
        self.writes.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl ArticleStore for MemoryStore {
    async fn get_article(
        &self,
        category: Category,
        id: i64,
    ) -> Result<Option<Article>, StorageError> {
        self.read();
        Ok(self.tables.lock().await.articles.get(&(category, id)).cloned())
    }

    async fn insert_article_if_absent(
        &self,
        article: &Article,
    ) -> Result<InsertOutcome, StorageError> {
        self.write();
        let mut tables = self.tables.lock().await;
        let key = (article.category, article.id);
        if tables.articles.contains_key(&key) {
            return Ok(InsertOutcome::Conflict);
        }
        tables.articles.insert(key, article.clone());
        Ok(InsertOutcome::Inserted)
    }

    async fn put_article(&self, article: &Article) -> Result<(), StorageError> {
        self.write();
        let mut tables = self.tables.lock().await;
        let key = (article.category, article.id);
        let mut stored = article.clone();
        if let Some(existing) = tables.articles.get(&key) {
            stored.created_at = existing.created_at;
        }
        tables.articles.insert(key, stored);
        Ok(())
    }

    async fn get_category_state(
        &self,
        category: Category,
    ) -> Result<Option<CategoryState>, StorageError> {
        self.read();
        Ok(self.tables.lock().await.states.get(&category).cloned())
    }

    async fn put_category_state(&self, state: &CategoryState) -> Result<(), StorageError> {
        self.write();
        self.tables
            .lock()
            .await
            .states
            .insert(state.category, state.clone());
        Ok(())
    }

    async fn list_articles(&self) -> Result<Vec<Article>, StorageError> {
        self.read();
        Ok(self.tables.lock().await.articles.values().cloned().collect())
    }

    async fn list_articles_by_category(
        &self,
        category: Category,
        limit: usize,
    ) -> Result<Vec<Article>, StorageError> {
        self.read();
        let tables = self.tables.lock().await;
        Ok(tables
            .articles
            .range((category, i64::MIN)..=(category, i64::MAX))
            .rev()
            .take(limit)
            .map(|(_, article)| article.clone())
            .collect())
    }

    async fn latest_category_state(&self) -> Result<Option<CategoryState>, StorageError> {
        self.read();
        let tables = self.tables.lock().await;
        Ok(tables
            .states
            .values()
            .max_by_key(|s| s.representative_id)
            .cloned())
    }
}
