//! Periodic Maintenance
//!
//! One background task sweeps expired Tier-1 entries, prunes idle stampede
//! locks and drops finished rate-limit windows on a fixed interval.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::cache_manager::CacheManager;
use crate::rate_limit::RateLimitService;

/// Handle to the running maintenance loop
pub struct MaintenanceTask {
    shutdown_tx: broadcast::Sender<()>,
    handle: JoinHandle<()>,
}

impl MaintenanceTask {
    /// Start the loop; the first pass runs one `interval` after startup
    #[must_use]
    pub fn spawn(
        cache: Arc<CacheManager>,
        limiter: Arc<RateLimitService>,
        window_seconds: u64,
        interval: Duration,
    ) -> Self {
        let (shutdown_tx, mut shutdown_rx) = broadcast::channel(1);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let report = cache.run_maintenance();
                        let windows = limiter.cleanup_expired(window_seconds);
                        debug!(
                            expired_entries = report.expired_entries,
                            pruned_locks = report.pruned_locks,
                            expired_windows = windows,
                            "Maintenance pass complete"
                        );
                    }
                    _ = shutdown_rx.recv() => {
                        info!("Maintenance task shutting down");
                        break;
                    }
                }
            }
        });

        info!(interval_secs = interval.as_secs_f64(), "Maintenance task started");
        Self { shutdown_tx, handle }
    }

    /// Signal the loop and wait for it to finish
    pub async fn stop(self) {
        // An error only means the loop already exited
        let _ = self.shutdown_tx.send(());
        if let Err(e) = self.handle.await {
            warn!(error = %e, "Maintenance task ended abnormally");
        }
    }
}
