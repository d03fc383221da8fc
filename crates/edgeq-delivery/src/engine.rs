//! Ordered, single-flight delivery loop.

use crate::{ConnectionManager, ConnectivityEvent, DeliveryResult};
use edgeq_store::Database;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::Notify;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Delivery engine settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryConfig {
    /// Fallback wake interval.
    pub poll_interval: Duration,
    /// Upper bound on waiting for one broker acknowledgment.
    pub ack_timeout: Duration,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            ack_timeout: Duration::from_secs(10),
        }
    }
}

/// Why a cycle stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// No pending records left.
    Drained,
    /// The link was down, at the start or mid-cycle.
    NotConnected,
    /// Record `id` was not acknowledged; nothing after it was attempted.
    Halted { id: i64, reason: String },
}

/// Result of one wake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    /// Ids marked delivered during the cycle, ascending.
    pub delivered: Vec<i64>,
    pub outcome: CycleOutcome,
}

/// Drains pending records through the connection manager in ascending id
/// order, at most one publish outstanding.
pub struct DeliveryEngine {
    store: Arc<Database>,
    connection: Arc<ConnectionManager>,
    config: DeliveryConfig,
    wake: Notify,
}

impl DeliveryEngine {
    pub fn new(
        store: Arc<Database>,
        connection: Arc<ConnectionManager>,
        config: DeliveryConfig,
    ) -> Self {
        Self {
            store,
            connection,
            config,
            wake: Notify::new(),
        }
    }

    pub fn config(&self) -> &DeliveryConfig {
        &self.config
    }

    /// Request an immediate cycle from the running loop.
    ///
    /// Coalesces: several nudges before the loop wakes produce one cycle.
    pub fn nudge(&self) {
        self.wake.notify_one();
    }

    /// Deliver pending records until drained, disconnected, or halted.
    ///
    /// A store failure other than a since-purged record aborts the cycle with
    /// an error; the record stays pending and the next wake retries it.
    pub async fn run_cycle(&self) -> DeliveryResult<CycleReport> {
        let mut delivered = Vec::new();

        let outcome = loop {
            if !self.connection.is_connected() {
                break CycleOutcome::NotConnected;
            }
            let Some(message) = self.store.next_pending()? else {
                break CycleOutcome::Drained;
            };

            let published = self
                .connection
                .publish(&message.topic, &message.payload, self.config.ack_timeout)
                .await;

            if let Err(e) = published {
                warn!(id = message.id, topic = %message.topic, error = %e, "Publish not acknowledged, halting cycle");
                break CycleOutcome::Halted {
                    id: message.id,
                    reason: e.to_string(),
                };
            }

            match self.store.mark_delivered(message.id) {
                Ok(()) => {
                    debug!(id = message.id, topic = %message.topic, "Delivered");
                    delivered.push(message.id);
                }
                Err(e) if e.is_not_found() => {
                    warn!(id = message.id, "Record purged while in flight");
                }
                Err(e) => return Err(e.into()),
            }
        };

        Ok(CycleReport { delivered, outcome })
    }

    /// Wake on the poll interval, on [`nudge`](Self::nudge), and whenever the
    /// link is re-established, until cancelled.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut connectivity = self.connection.subscribe();

        info!(
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            "Delivery engine started"
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
                _ = self.wake.notified() => {}
                event = connectivity.recv() => match event {
                    Ok(ConnectivityEvent::Established) => {}
                    Ok(ConnectivityEvent::Lost(_)) => continue,
                    Err(RecvError::Lagged(skipped)) => {
                        debug!(skipped, "Connectivity events lagged");
                    }
                    Err(RecvError::Closed) => break,
                },
            }

            // A cycle dropped mid-publish leaves its record pending.
            let report = tokio::select! {
                _ = cancel.cancelled() => break,
                report = self.run_cycle() => report,
            };
            match report {
                Ok(report) if !report.delivered.is_empty() => {
                    info!(
                        delivered = report.delivered.len(),
                        outcome = ?report.outcome,
                        "Delivery cycle finished"
                    );
                }
                Ok(report) => debug!(outcome = ?report.outcome, "Delivery cycle idle"),
                Err(e) => error!(error = %e, "Delivery cycle failed"),
            }
        }

        info!("Delivery engine stopped");
    }
}
