use chrono::{DateTime, Utc};
use krc_core::{Article, ArticleCandidate};
use krc_storage::{ArticleStore, InsertOutcome, StorageError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Stored title matches the scraped one.
    Unchanged,
    /// A concurrent writer inserted the key between lookup and insert.
    LostInsertRace,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reconciliation {
    Inserted(Article),
    Updated(Article),
    Skipped(SkipReason),
}

/// Classifies one scraped candidate against its persisted record and issues
/// the matching write. The title is the only revision signal.
pub struct ArticleReconciler<'a> {
    store: &'a dyn ArticleStore,
}

impl<'a> ArticleReconciler<'a> {
    pub fn new(store: &'a dyn ArticleStore) -> Self {
        Self { store }
    }

    pub async fn reconcile(
        &self,
        candidate: &ArticleCandidate,
        now: DateTime<Utc>,
    ) -> Result<Reconciliation, StorageError> {
        let existing = self.store.get_article(candidate.category, candidate.id).await?;

        match existing {
            None => {
                let article = candidate.clone().into_article(now, now);
                match self.store.insert_article_if_absent(&article).await? {
                    InsertOutcome::Inserted => Ok(Reconciliation::Inserted(article)),
                    InsertOutcome::Conflict => {
                        Ok(Reconciliation::Skipped(SkipReason::LostInsertRace))
                    }
                }
            }
            Some(existing) if existing.title != candidate.title => {
                let article = candidate.clone().into_article(existing.created_at, now);
                self.store.put_article(&article).await?;
                Ok(Reconciliation::Updated(article))
            }
            Some(_) => Ok(Reconciliation::Skipped(SkipReason::Unchanged)),
        }
    }
}
