use std::path::PathBuf;

use anyhow::{Context, Result};
use async_trait::async_trait;
use krc_storage::HttpFetcher;
use serde_json::{json, Value};
use tokio::fs;
use tracing::debug;

use crate::orchestrator::SyncRunSummary;

/// Downstream consumer of finished runs (notification relays, report
/// writers). Sinks never feed back into the sync.
#[async_trait]
pub trait DeltaSink: Send + Sync {
    async fn publish(&self, summary: &SyncRunSummary) -> Result<()>;
}

/// Writes `<reports>/<run_id>/articles_delta.json` for runs that wrote
/// something.
#[derive(Debug, Clone)]
pub struct JsonReportSink {
    reports_dir: PathBuf,
}

impl JsonReportSink {
    pub fn new(reports_dir: impl Into<PathBuf>) -> Self {
        Self {
            reports_dir: reports_dir.into(),
        }
    }

    pub fn run_dir(&self, summary: &SyncRunSummary) -> PathBuf {
        self.reports_dir.join(summary.run_id.to_string())
    }
}

#[async_trait]
impl DeltaSink for JsonReportSink {
    async fn publish(&self, summary: &SyncRunSummary) -> Result<()> {
        let delta = summary.delta();
        if delta.is_empty() {
            return Ok(());
        }

        let run_dir = self.run_dir(summary);
        fs::create_dir_all(&run_dir)
            .await
            .with_context(|| format!("creating {}", run_dir.display()))?;

        let body = serde_json::to_vec_pretty(&json!({
            "run": {
                "run_id": summary.run_id,
                "started_at": summary.started_at,
                "finished_at": summary.finished_at,
                "outcome": summary.outcome(),
                "failures": summary.failures,
            },
            "articles": delta.articles,
        }))
        .context("serializing articles delta")?;

        let path = run_dir.join("articles_delta.json");
        fs::write(&path, body)
            .await
            .with_context(|| format!("writing {}", path.display()))?;
        debug!(path = %path.display(), articles = delta.len(), "wrote delta report");
        Ok(())
    }
}

/// POSTs each run's written articles to a webhook as one JSON document.
#[derive(Debug, Clone)]
pub struct WebhookSink {
    http: HttpFetcher,
    url: String,
}

impl WebhookSink {
    pub fn new(http: HttpFetcher, url: impl Into<String>) -> Self {
        Self {
            http,
            url: url.into(),
        }
    }

    /// Request body for a run, or `None` when the run wrote nothing.
    pub fn payload(summary: &SyncRunSummary) -> Option<Value> {
        let delta = summary.delta();
        if delta.is_empty() {
            return None;
        }
        Some(json!({
            "content": format!("{} new or revised articles on the cafe", delta.len()),
            "run_id": summary.run_id,
            "articles": delta.articles,
        }))
    }
}

#[async_trait]
impl DeltaSink for WebhookSink {
    async fn publish(&self, summary: &SyncRunSummary) -> Result<()> {
        let Some(payload) = Self::payload(summary) else {
            return Ok(());
        };
        let body = serde_json::to_vec(&payload).context("serializing webhook payload")?;
        let status = self
            .http
            .post_json(&self.url, body)
            .await
            .with_context(|| format!("posting run {} to webhook", summary.run_id))?;
        debug!(status = status.as_u16(), "delivered delta to webhook");
        Ok(())
    }
}
