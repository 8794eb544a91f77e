//! Change detection and idempotent upsert for scraped cafe listings.
//!
//! A run fingerprints each category listing, skips categories whose
//! fingerprint is unchanged, and reconciles the rest article by article
//! against the store. What was written comes back as a delta.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use krc_adapters::{AdapterError, FixtureSource, ListingSource, PlugCafeSource};
use krc_core::Category;
use krc_storage::{HttpClientConfig, HttpFetcher, PgStore, StorageError};
use thiserror::Error;
use tracing::info;

pub mod config;
pub mod fingerprint;
pub mod orchestrator;
pub mod reconcile;
pub mod report;
pub mod scheduler;
pub mod tracker;

pub use config::{CategoryConfig, CategoryRegistry, ConfigError, SyncConfig};
pub use fingerprint::fingerprint;
pub use orchestrator::{
    ArticleFailure, CategoryFailure, CategorySyncReport, RunOutcome, SyncEngine, SyncOutcome,
    SyncRunSummary, SyncService,
};
pub use reconcile::{ArticleReconciler, Reconciliation, SkipReason};
pub use report::{DeltaSink, JsonReportSink, WebhookSink};
pub use scheduler::maybe_build_scheduler;
pub use tracker::{CategoryCheck, CategoryTracker};

pub const CRATE_NAME: &str = "krc-sync";

/// Errors that abort a category run. Per-article write failures are not
/// here; they are collected in the category report.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("extracting {category} listing: {source}")]
    Extraction {
        category: Category,
        source: AdapterError,
    },
    #[error("tracking {category} state: {source}")]
    State {
        category: Category,
        source: StorageError,
    },
}

/// Wires store, listing source, registry and sinks from a validated config.
pub async fn build_service(config: &SyncConfig) -> Result<SyncService> {
    let store = PgStore::connect(&config.database_url)
        .await
        .context("connecting to article database")?;
    let registry = CategoryRegistry::load_or_default(&config.categories_file).await?;
    let http = HttpFetcher::new(HttpClientConfig {
        timeout: Duration::from_secs(config.http_timeout_secs),
        user_agent: Some(config.user_agent.clone()),
        ..Default::default()
    })
    .context("building http client")?;

    let source: Arc<dyn ListingSource> = match &config.fixtures_dir {
        Some(dir) => {
            info!(dir = %dir.display(), "reading listings from fixtures");
            Arc::new(FixtureSource::new(dir.clone()))
        }
        None => {
            let mut cafe = PlugCafeSource::new(http.clone(), config.cafe_base_url.clone());
            for (category, url) in registry.listing_overrides() {
                cafe = cafe.with_listing_url(category, url);
            }
            Arc::new(cafe)
        }
    };

    let mut service = SyncService::new(SyncEngine::new(Arc::new(store)), source)
        .with_categories(registry.enabled());
    if let Some(dir) = &config.reports_dir {
        service = service.with_sink(Arc::new(JsonReportSink::new(dir.clone())));
    }
    if let Some(url) = &config.webhook_url {
        info!("delivering deltas to webhook");
        service = service.with_sink(Arc::new(WebhookSink::new(http, url.clone())));
    }
    Ok(service)
}
