//! Periodic eviction of finished jobs.
//!
//! Without eviction the registry and the results directory grow for the
//! lifetime of the process. This task removes `COMPLETED` and `ERROR` jobs
//! that finished more than the retention period ago, together with their
//! result files. Jobs still `PROCESSING` are never touched.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use scribe_core::registry::JobRegistry;
use tokio_util::sync::CancellationToken;

/// How often the cleanup job runs.
pub const CLEANUP_INTERVAL: Duration = Duration::from_secs(300);

/// Run the job retention loop until `cancel` is triggered.
pub async fn run(
    registry: Arc<JobRegistry>,
    retention: Duration,
    interval: Duration,
    cancel: CancellationToken,
) {
    tracing::info!(
        retention_secs = retention.as_secs(),
        interval_secs = interval.as_secs(),
        "Job retention task started"
    );

    let mut ticker = tokio::time::interval(interval);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Job retention task stopping");
                break;
            }
            _ = ticker.tick() => {
                let evicted = purge_expired(&registry, retention).await;
                if evicted > 0 {
                    tracing::info!(evicted, "Job retention: evicted finished jobs");
                } else {
                    tracing::debug!("Job retention: nothing to evict");
                }
            }
        }
    }
}

/// Evict jobs that finished more than `retention` ago and delete their
/// result files. Returns the number of evicted jobs.
pub async fn purge_expired(registry: &JobRegistry, retention: Duration) -> usize {
    // A retention too large to represent means nothing is ever old enough.
    let Some(cutoff) = chrono::Duration::from_std(retention)
        .ok()
        .and_then(|r| Utc::now().checked_sub_signed(r))
    else {
        return 0;
    };

    let evicted = registry.evict_finished_before(cutoff).await;
    for job in &evicted {
        let Some(path) = job.result_path() else {
            continue;
        };
        match tokio::fs::remove_file(path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(
                    job_id = %job.id,
                    path = %path.display(),
                    error = %e,
                    "Job retention: failed to delete result file"
                );
            }
        }
    }
    evicted.len()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
