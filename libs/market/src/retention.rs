use chrono::{DateTime, TimeDelta, Utc};
use tracing::debug;

use crate::{Result, TimeSeriesStore};

/// Evicts live samples older than a fixed window.
#[derive(Debug, Clone, Copy)]
pub struct RetentionPruner {
    window: TimeDelta,
}

impl RetentionPruner {
    pub fn new(window: TimeDelta) -> Self {
        Self {
            window: window.max(TimeDelta::zero()),
        }
    }

    pub fn window(&self) -> TimeDelta {
        self.window
    }

    pub fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - self.window
    }

    pub async fn prune(&self, store: &dyn TimeSeriesStore, now: DateTime<Utc>) -> Result<u64> {
        let cutoff = self.cutoff(now);
        let deleted = store.delete_older_than(cutoff).await?;

        if deleted > 0 {
            debug!(deleted, %cutoff, "pruned stale samples");
        }

        Ok(deleted)
    }
}

impl Default for RetentionPruner {
    fn default() -> Self {
        Self::new(TimeDelta::hours(25))
    }
}
