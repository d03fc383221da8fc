//! Broker connection state machine.
//!
//! ```text
//! Disconnected -> Connecting -> Connected
//!      ^              |             |
//!      +--------------+-------------+   (connect failure / transport loss)
//! ```
//!
//! The transport reports losses through an [`EventSink`]; every `connect()`
//! hands it a sink tagged with a fresh epoch so notifications from an
//! abandoned connection are dropped instead of tearing down the current one.

use crate::{BackoffPolicy, DeliveryError, DeliveryResult};
use edgeq_transport::{ConnectOptions, EventSink, QoS, Transport, TransportEvent};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const EVENT_CAPACITY: usize = 16;

/// Current link state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Connectivity change, broadcast to every subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectivityEvent {
    Established,
    Lost(String),
}

/// Connection manager settings.
#[derive(Debug, Clone, Default)]
pub struct ConnectionConfig {
    pub options: ConnectOptions,
    pub backoff: BackoffPolicy,
}

/// Owns the transport and drives connect/backoff.
pub struct ConnectionManager {
    transport: Arc<dyn Transport>,
    config: ConnectionConfig,
    state_tx: watch::Sender<ConnectionState>,
    events_tx: broadcast::Sender<ConnectivityEvent>,
    failures: AtomicU32,
    epoch: AtomicU64,
    transport_tx: mpsc::UnboundedSender<(u64, TransportEvent)>,
    transport_rx: Mutex<Option<mpsc::UnboundedReceiver<(u64, TransportEvent)>>>,
}

impl ConnectionManager {
    pub fn new(transport: Arc<dyn Transport>, config: ConnectionConfig) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let (events_tx, _) = broadcast::channel(EVENT_CAPACITY);
        let (transport_tx, transport_rx) = mpsc::unbounded_channel();
        Self {
            transport,
            config,
            state_tx,
            events_tx,
            failures: AtomicU32::new(0),
            epoch: AtomicU64::new(0),
            transport_tx,
            transport_rx: Mutex::new(Some(transport_rx)),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Subscribe to established/lost notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectivityEvent> {
        self.events_tx.subscribe()
    }

    /// Watch the raw state; the receiver sees the current value immediately.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// Failed connects since the last successful one.
    pub fn consecutive_failures(&self) -> u32 {
        self.failures.load(Ordering::Acquire)
    }

    /// Jittered wait before the next connect attempt.
    pub fn next_retry_delay(&self) -> Duration {
        self.config
            .backoff
            .jittered_delay_for(self.consecutive_failures(), &mut rand::thread_rng())
    }

    fn set_state(&self, state: ConnectionState) {
        let changed = self.state_tx.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });
        if changed {
            debug!(?state, "Connection state changed");
        }
    }

    fn current_epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    /// Attempt a single handshake.
    pub async fn connect(&self) -> DeliveryResult<()> {
        let epoch = self.epoch.fetch_add(1, Ordering::AcqRel) + 1;
        self.set_state(ConnectionState::Connecting);

        let sink = EventSink::new(epoch, self.transport_tx.clone());
        match self.transport.connect(&self.config.options, sink).await {
            Ok(()) => {
                self.failures.store(0, Ordering::Release);
                self.set_state(ConnectionState::Connected);
                info!(
                    host = %self.config.options.host,
                    port = self.config.options.port,
                    "Connected to broker"
                );
                let _ = self.events_tx.send(ConnectivityEvent::Established);
                Ok(())
            }
            Err(e) => {
                let failures = self.failures.fetch_add(1, Ordering::AcqRel).saturating_add(1);
                self.set_state(ConnectionState::Disconnected);
                warn!(
                    host = %self.config.options.host,
                    port = self.config.options.port,
                    failures,
                    error = %e,
                    "Connect attempt failed"
                );
                Err(e.into())
            }
        }
    }

    fn mark_lost(&self, reason: String) {
        self.set_state(ConnectionState::Disconnected);
        info!(reason = %reason, "Broker connection lost");
        let _ = self.events_tx.send(ConnectivityEvent::Lost(reason));
    }

    /// Keep the link up until cancelled.
    ///
    /// The first attempt is immediate; every later one waits the backoff
    /// delay. Retries never give up.
    pub async fn run(&self, cancel: CancellationToken) {
        let Some(mut transport_events) = self.transport_rx.lock().take() else {
            warn!("Connection loop already running");
            return;
        };

        let mut first_attempt = true;
        'outer: loop {
            if !first_attempt {
                let delay = self.next_retry_delay();
                debug!(delay_ms = delay.as_millis() as u64, "Reconnect scheduled");
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            first_attempt = false;

            let attempt = tokio::select! {
                _ = cancel.cancelled() => break,
                result = self.connect() => result,
            };
            if attempt.is_err() {
                continue;
            }

            let reason = loop {
                tokio::select! {
                    _ = cancel.cancelled() => break 'outer,
                    event = transport_events.recv() => match event {
                        Some((epoch, TransportEvent::Disconnected(reason)))
                            if epoch == self.current_epoch() => break reason,
                        Some((epoch, event)) => {
                            debug!(epoch, ?event, "Ignoring transport event");
                        }
                        None => break 'outer,
                    },
                }
            };
            self.mark_lost(reason);
        }

        self.shutdown().await;
        *self.transport_rx.lock() = Some(transport_events);
        info!("Connection loop stopped");
    }

    /// Publish with at-least-once QoS, bounded by `ack_timeout`.
    ///
    /// Fails early when the link drops while waiting.
    pub async fn publish(
        &self,
        topic: &str,
        payload: &[u8],
        ack_timeout: Duration,
    ) -> DeliveryResult<()> {
        if !self.is_connected() {
            return Err(DeliveryError::Connectivity("not connected".to_string()));
        }

        let mut state = self.watch_state();
        let lost = async move {
            let _ = state
                .wait_for(|s| *s != ConnectionState::Connected)
                .await;
        };
        let exchange = tokio::time::timeout(
            ack_timeout,
            self.transport
                .publish(topic, payload, QoS::AtLeastOnce, ack_timeout),
        );

        tokio::select! {
            result = exchange => match result {
                Ok(outcome) => outcome.map_err(DeliveryError::from),
                Err(_) => Err(DeliveryError::AckTimeout(ack_timeout)),
            },
            _ = lost => Err(DeliveryError::Connectivity(
                "connection lost while awaiting acknowledgment".to_string(),
            )),
        }
    }

    /// Close the transport and move to `Disconnected`.
    pub async fn shutdown(&self) {
        // Anything the transport reports from here on is stale.
        self.epoch.fetch_add(1, Ordering::AcqRel);
        self.transport.disconnect().await;
        self.set_state(ConnectionState::Disconnected);
    }
}
