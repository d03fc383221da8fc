//! Age-based retention.

use crate::DeliveryResult;
use chrono::SubsecRound;
use edgeq_store::Database;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Retention settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionConfig {
    /// Records at least this old are deleted, delivered or not.
    pub window: Duration,
    pub sweep_interval: Duration,
}

/// Periodically deletes records older than the retention window.
///
/// Undelivered records are purged too; that is the price of bounded storage
/// on a device that may stay offline indefinitely.
pub struct RetentionReaper {
    store: Arc<Database>,
    config: RetentionConfig,
}

impl RetentionReaper {
    pub fn new(store: Arc<Database>, config: RetentionConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &RetentionConfig {
        &self.config
    }

    /// Purge every record with `now - enqueued_at >= window`. Returns the count.
    pub fn sweep(&self) -> DeliveryResult<usize> {
        let now = self.store.now();
        // Stored times are whole microseconds, so `enqueued_at <= edge` is
        // `enqueued_at < trunc(edge) + 1µs` under the store's strict cutoff.
        let Some(cutoff) = chrono::Duration::from_std(self.config.window)
            .ok()
            .and_then(|window| now.checked_sub_signed(window))
            .and_then(|edge| {
                edge.trunc_subsecs(6)
                    .checked_add_signed(chrono::Duration::microseconds(1))
            })
        else {
            return Ok(0);
        };

        let deleted = self.store.purge_older_than(cutoff)?;
        if deleted > 0 {
            info!(deleted, cutoff = %cutoff, "Purged expired records");
        } else {
            debug!(cutoff = %cutoff, "Nothing to purge");
        }
        Ok(deleted)
    }

    /// Sweep on the configured interval until cancelled.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.sweep_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep() {
                        error!(error = %e, "Retention sweep failed");
                    }
                }
            }
        }

        info!("Retention reaper stopped");
    }
}
