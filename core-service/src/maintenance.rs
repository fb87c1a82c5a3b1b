//! Periodic cleanup of process-local state.

use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::CoreService;

/// What one maintenance pass removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    pub lockouts_removed: usize,
    pub cache_entries_purged: usize,
    pub actors_pruned: usize,
}

impl MaintenanceReport {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Handle to the background maintenance task. Dropping it stops the task.
#[derive(Debug)]
pub struct MaintenanceHandle {
    task: JoinHandle<()>,
}

impl MaintenanceHandle {
    pub fn stop(self) {
        self.task.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for MaintenanceHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl CoreService {
    /// Run one cleanup pass: expired lockouts, expired cache entries and
    /// idle scheduler actors.
    pub async fn run_maintenance(&self) -> MaintenanceReport {
        let lockouts_removed = self.lockout().cleanup();

        let cache_entries_purged = match self.cache().purge_expired().await {
            Ok(purged) => purged,
            Err(e) => {
                warn!(error = %e, "Cache purge failed");
                0
            }
        };

        let actors_pruned = self.scheduler().prune_idle();

        let report = MaintenanceReport {
            lockouts_removed,
            cache_entries_purged,
            actors_pruned,
        };
        if !report.is_empty() {
            debug!(
                lockouts_removed,
                cache_entries_purged,
                actors_pruned,
                "Maintenance pass complete"
            );
        }
        report
    }

    /// Spawn the maintenance loop on the current tokio runtime, ticking every
    /// `maintenance_interval`.
    pub fn spawn_maintenance(&self) -> MaintenanceHandle {
        let period = self.config().maintenance_interval;
        let service = self.clone();

        info!(period_secs = period.as_secs(), "Starting maintenance task");
        let task = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;

            loop {
                ticker.tick().await;
                service.run_maintenance().await;
            }
        });

        MaintenanceHandle { task }
    }
}
