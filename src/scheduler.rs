//! # Maintenance Scheduler
//!
//! Background task that runs the maintenance tasks on a fixed interval until
//! shutdown. Runs never overlap: the next interval starts counting once the
//! previous run has finished.

use std::sync::Arc;
use std::time::Duration;

use metrics::gauge;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::manager::IntegrationManager;

pub struct MaintenanceScheduler {
    manager: Arc<IntegrationManager>,
    interval: Duration,
}

impl MaintenanceScheduler {
    pub fn new(manager: Arc<IntegrationManager>, interval: Duration) -> Self {
        Self { manager, interval }
    }

    /// Run until the shutdown token fires.
    #[instrument(skip_all, fields(interval_seconds = self.interval.as_secs()))]
    pub async fn run(self, shutdown: CancellationToken) {
        info!("Starting maintenance scheduler");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Maintenance scheduler shutdown requested");
                    break;
                }
                _ = sleep(self.interval) => {
                    let report = self.manager.run_maintenance_tasks().await;
                    gauge!("maintenance_last_run_failed_tasks")
                        .set(report.tasks_failed.len() as f64);
                    if !report.tasks_failed.is_empty() {
                        warn!(failed = ?report.tasks_failed, "Scheduled maintenance had failures");
                    }
                }
            }
        }

        info!("Maintenance scheduler stopped");
    }
}
