use chrono::{DateTime, Utc};
use krc_core::{Category, CategoryState, Fingerprint};
use krc_storage::{ArticleStore, StorageError};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CategoryCheck {
    Unchanged,
    Changed,
}

/// Owns the per-category fingerprint records and decides whether a listing
/// needs reconciling at all.
pub struct CategoryTracker<'a> {
    store: &'a dyn ArticleStore,
}

impl<'a> CategoryTracker<'a> {
    pub fn new(store: &'a dyn ArticleStore) -> Self {
        Self { store }
    }

    /// Compares against the stored fingerprint and overwrites it when it
    /// differs. Lookup failures surface as errors; only a missing record
    /// counts as a first observation.
    pub async fn check_and_update(
        &self,
        category: Category,
        fingerprint: &Fingerprint,
        representative_id: i64,
        now: DateTime<Utc>,
    ) -> Result<CategoryCheck, StorageError> {
        let previous = self.store.get_category_state(category).await?;
        match &previous {
            Some(state) if state.fingerprint == *fingerprint => return Ok(CategoryCheck::Unchanged),
            Some(state) => debug!(
                %category,
                previous = %state.fingerprint,
                current = %fingerprint,
                "category listing changed"
            ),
            None => debug!(%category, "first observation of category"),
        }

        self.store
            .put_category_state(&CategoryState {
                category,
                representative_id,
                fingerprint: fingerprint.clone(),
                observed_at: now,
            })
            .await?;
        Ok(CategoryCheck::Changed)
    }
}
