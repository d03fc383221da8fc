//! Broker transport capability.
//!
//! The delivery core talks to the broker only through the [`Transport`]
//! trait: one handshake per [`Transport::connect`], one publish per
//! [`Transport::publish`], and asynchronous connectivity notifications pushed
//! through an [`EventSink`] rather than callbacks into shared state.
//!
//! [`MqttTransport`] implements the trait on top of `rumqttc`.

mod error;
mod mqtt;

pub use error::{TransportError, TransportResult};
pub use mqtt::MqttTransport;

use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::mpsc;

/// Broker connection parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectOptions {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub client_id: String,
    pub keepalive: Duration,
    /// Upper bound on a single handshake.
    pub connect_timeout: Duration,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            username: None,
            password: None,
            client_id: String::new(),
            keepalive: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// Delivery guarantee requested for a publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QoS {
    AtMostOnce,
    AtLeastOnce,
    ExactlyOnce,
}

/// Notification raised from the transport's own execution context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Connected,
    Disconnected(String),
}

/// Sending half handed to a transport on every `connect()`.
///
/// Events are tagged with the connection epoch they belong to, so a late
/// notification from an abandoned connection can be told apart from one
/// about the current connection.
#[derive(Debug, Clone)]
pub struct EventSink {
    epoch: u64,
    tx: mpsc::UnboundedSender<(u64, TransportEvent)>,
}

impl EventSink {
    pub fn new(epoch: u64, tx: mpsc::UnboundedSender<(u64, TransportEvent)>) -> Self {
        Self { epoch, tx }
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Push an event. Returns false once the receiving side is gone.
    pub fn emit(&self, event: TransportEvent) -> bool {
        self.tx.send((self.epoch, event)).is_ok()
    }
}

/// Broker transport.
///
/// Implementations must be safe to call from several tasks, although the
/// delivery engine keeps at most one publish outstanding.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Attempt a single handshake. Later losses are reported through `events`.
    async fn connect(&self, options: &ConnectOptions, events: EventSink) -> TransportResult<()>;

    /// Publish and wait for the broker acknowledgment, at most `timeout`.
    async fn publish(
        &self,
        topic: &str,
        payload: &[u8],
        qos: QoS,
        timeout: Duration,
    ) -> TransportResult<()>;

    /// Close the current connection, if any. Best effort.
    async fn disconnect(&self);
}
