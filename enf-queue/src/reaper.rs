use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::backend::QueueBackend;

/// Fails jobs whose claim outlived the lease.
///
/// A worker that dies mid-job never reports; without the reaper its job would
/// stay Processing forever. Expired jobs become Failed, so a late report from
/// the original worker is refused like any other second write.
pub struct LeaseReaper {
    backend: Arc<dyn QueueBackend>,
    lease: Duration,
    interval: Duration,
}

impl LeaseReaper {
    /// Sweeps twice per lease, at most every 30 seconds
    pub fn new(backend: Arc<dyn QueueBackend>, lease: Duration) -> Self {
        let interval = (lease / 2).clamp(Duration::from_millis(1), Duration::from_secs(30));
        Self {
            backend,
            lease,
            interval,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Sweep until shutdown is signalled.
    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        debug!(lease = ?self.lease, interval = ?self.interval, "lease reaper started");

        loop {
            if *shutdown_rx.borrow() {
                break;
            }
            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    self.reap_once().await;
                }
            }
        }
        debug!("lease reaper stopped");
    }

    /// One sweep; returns how many jobs were failed.
    pub async fn reap_once(&self) -> usize {
        match self.backend.expire_claims(self.lease).await {
            Ok(expired) if expired.is_empty() => 0,
            Ok(expired) => {
                for job_id in &expired {
                    warn!(%job_id, "claim lease expired; job failed");
                }
                info!(count = expired.len(), "reclaimed expired leases");
                expired.len()
            }
            Err(e) => {
                warn!(error = %e, "lease sweep failed");
                0
            }
        }
    }
}
