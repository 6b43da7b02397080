// src/staging/sweeper.rs

use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::staging::manager::StagingLifecycleManager;

/// Spawn the background TTL sweep loop.
///
/// Runs until the token is cancelled. Each cycle reclaims expired resources;
/// a cycle that finds nothing is silent at info level. Sweep problems never
/// propagate to executions — whatever could not be reclaimed is simply seen
/// again on the next cycle.
pub fn spawn_sweeper(
    manager: StagingLifecycleManager,
    interval: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(interval_secs = interval.as_secs(), "staging sweeper started");
        let mut ticker = tokio::time::interval(interval);
        // The first tick fires immediately; skip it so a fresh execution's
        // resources are not examined before anything could expire.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("staging sweeper stopping");
                    return;
                }
                _ = ticker.tick() => {
                    let report = manager.sweep(Utc::now());
                    if report.dropped.is_empty() && report.archived.is_empty() {
                        debug!("sweep cycle found nothing to reclaim");
                    } else {
                        info!(
                            dropped = report.dropped.len(),
                            archived = report.archived.len(),
                            "sweep cycle reclaimed staging resources"
                        );
                    }
                }
            }
        }
    })
}
