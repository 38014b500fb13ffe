//! Periodic background sync.

use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Something that can sync every known connection.
#[async_trait]
pub trait Syncer: Send + Sync {
    /// Run one full sweep.
    async fn sync_all(&self) -> Result<()>;
}

/// Calls [`Syncer::sync_all`] once per period.
pub struct Scheduler {
    syncer: Arc<dyn Syncer>,
    period: Duration,
}

impl Scheduler {
    /// Create a scheduler. `period` must be non-zero.
    pub fn new(syncer: Arc<dyn Syncer>, period: Duration) -> Self {
        Self { syncer, period }
    }

    /// Tick until `cancel` fires. The first sweep happens one period after start.
    pub async fn run(self, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.period);
        // A slow sweep must not trigger a burst of catch-up sweeps.
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        interval.tick().await;

        tracing::info!(period = ?self.period, "Sync scheduler started");

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {}
            }

            let started = std::time::Instant::now();
            match self.syncer.sync_all().await {
                Ok(()) => tracing::info!(elapsed = ?started.elapsed(), "Scheduled sync complete"),
                Err(e) => tracing::warn!(elapsed = ?started.elapsed(), "Scheduled sync failed: {}", e),
            }
        }

        tracing::info!("Sync scheduler stopped");
    }
}
