use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{info, warn};

use crate::config::SyncConfig;
use crate::orchestrator::SyncService;

/// Periodic `run_once` on `sync_cron`, or `None` when the scheduler is off.
/// The caller starts the returned scheduler.
pub async fn maybe_build_scheduler(
    config: &SyncConfig,
    service: Arc<SyncService>,
) -> Result<Option<JobScheduler>> {
    if !config.scheduler_enabled {
        return Ok(None);
    }

    let sched = JobScheduler::new().await.context("creating scheduler")?;
    let cron = &config.sync_cron;
    let job = Job::new_async(cron, move |_uuid, _l| {
        let service = service.clone();
        Box::pin(async move {
            let summary = service.run_once().await;
            if summary.has_failures() {
                warn!(
                    run_id = %summary.run_id,
                    outcome = ?summary.outcome(),
                    "scheduled sync had failures"
                );
            } else {
                info!(
                    run_id = %summary.run_id,
                    outcome = ?summary.outcome(),
                    "scheduled sync finished"
                );
            }
        })
    })
    .with_context(|| format!("creating scheduler job for cron {cron}"))?;
    sched.add(job).await.context("adding scheduler job")?;
    Ok(Some(sched))
}
