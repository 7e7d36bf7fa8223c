//! Periodic pruning of old seen records.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tokio::time::MissedTickBehavior;

use crate::error::Result;
use crate::models::SchedulerConfig;
use crate::storage::Storage;

/// Deletes seen records older than the retention window.
pub struct RetentionSweeper {
    storage: Arc<dyn Storage>,
    retention: TimeDelta,
    interval: Duration,
}

impl RetentionSweeper {
    pub fn new(storage: Arc<dyn Storage>, config: &SchedulerConfig) -> Self {
        Self {
            storage,
            retention: TimeDelta::days(i64::from(config.retention_days)),
            interval: Duration::from_secs(config.sweep_interval_secs.max(1)),
        }
    }

    /// Prune everything first seen before `now - retention`.
    pub async fn sweep_once(&self, now: DateTime<Utc>) -> Result<usize> {
        let cutoff = now - self.retention;
        let pruned = self.storage.prune_older_than(cutoff).await?;
        if pruned > 0 {
            log::info!("Pruned {} seen listings first seen before {}", pruned, cutoff);
        } else {
            log::debug!("No seen listings older than {}", cutoff);
        }
        Ok(pruned)
    }

    /// Sweep on every interval until cancelled. Failures are logged only.
    pub async fn run(self) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            if let Err(e) = self.sweep_once(Utc::now()).await {
                log::error!("Retention sweep failed: {}", e);
            }
        }
    }
}
