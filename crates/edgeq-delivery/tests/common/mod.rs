//! Shared helpers for delivery integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use edgeq_delivery::{
    BackoffPolicy, ConnectionConfig, ConnectionManager, DeliveryConfig, DeliveryEngine,
};
use edgeq_store::Database;
use edgeq_transport::{
    ConnectOptions, EventSink, QoS, Transport, TransportError, TransportEvent, TransportResult,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// How a scripted publish call behaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishFault {
    /// Report an acknowledgment timeout immediately.
    AckTimeout,
    /// Never complete; the caller's timeout has to fire.
    Hang,
    /// Drop the link mid-publish and fail.
    DropConnection,
}

#[derive(Default)]
struct Script {
    reachable: bool,
    failing_connects: u32,
    connect_attempts: u32,
    publish_calls: u32,
    faults: HashMap<u32, PublishFault>,
    published: Vec<(String, Vec<u8>)>,
    sink: Option<EventSink>,
    connected: bool,
    disconnects: u32,
    before_ack: Option<Arc<dyn Fn() + Send + Sync>>,
}

/// In-memory broker stand-in that records acknowledged publishes.
pub struct ScriptedTransport {
    script: Mutex<Script>,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(Script {
                reachable: true,
                ..Script::default()
            }),
        })
    }

    /// Broker that refuses every connect until [`set_reachable`] flips it.
    pub fn offline() -> Arc<Self> {
        let transport = Self::new();
        transport.set_reachable(false);
        transport
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.script.lock().reachable = reachable;
    }

    /// Fail the next `n` connect attempts.
    pub fn fail_next_connects(&self, n: u32) {
        self.script.lock().failing_connects = n;
    }

    /// Inject a fault on the `call`-th publish (1-based, counted over the
    /// transport's lifetime).
    pub fn fault_on_publish(&self, call: u32, fault: PublishFault) {
        self.script.lock().faults.insert(call, fault);
    }

    /// Run `hook` after the broker has the message but before the caller
    /// sees the acknowledgment.
    pub fn before_ack(&self, hook: impl Fn() + Send + Sync + 'static) {
        self.script.lock().before_ack = Some(Arc::new(hook));
    }

    /// Simulate a keepalive loss on the current connection.
    pub fn drop_connection(&self, reason: &str) {
        let sink = {
            let mut script = self.script.lock();
            script.connected = false;
            script.sink.clone()
        };
        if let Some(sink) = sink {
            sink.emit(TransportEvent::Disconnected(reason.to_string()));
        }
    }

    pub fn connect_attempts(&self) -> u32 {
        self.script.lock().connect_attempts
    }

    pub fn publish_calls(&self) -> u32 {
        self.script.lock().publish_calls
    }

    pub fn disconnects(&self) -> u32 {
        self.script.lock().disconnects
    }

    pub fn published(&self) -> Vec<(String, Vec<u8>)> {
        self.script.lock().published.clone()
    }

    /// Acknowledged payloads as UTF-8, in broker arrival order.
    pub fn payloads(&self) -> Vec<String> {
        self.script
            .lock()
            .published
            .iter()
            .map(|(_, payload)| String::from_utf8_lossy(payload).into_owned())
            .collect()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn connect(&self, _options: &ConnectOptions, events: EventSink) -> TransportResult<()> {
        let mut script = self.script.lock();
        script.connect_attempts += 1;

        if !script.reachable {
            return Err(TransportError::Connect("broker unreachable".to_string()));
        }
        if script.failing_connects > 0 {
            script.failing_connects -= 1;
            return Err(TransportError::Connect("connection refused".to_string()));
        }

        events.emit(TransportEvent::Connected);
        script.sink = Some(events);
        script.connected = true;
        Ok(())
    }

    async fn publish(
        &self,
        topic: &str,
        payload: &[u8],
        qos: QoS,
        timeout: Duration,
    ) -> TransportResult<()> {
        assert_eq!(qos, QoS::AtLeastOnce);

        let (fault, hook) = {
            let mut script = self.script.lock();
            script.publish_calls += 1;
            if !script.connected {
                return Err(TransportError::NotConnected);
            }
            let call = script.publish_calls;
            let fault = script.faults.get(&call).copied();
            if fault.is_none() {
                script.published.push((topic.to_string(), payload.to_vec()));
            }
            (fault, script.before_ack.clone())
        };

        let Some(fault) = fault else {
            if let Some(hook) = hook {
                hook();
            }
            return Ok(());
        };

        match fault {
            PublishFault::AckTimeout => Err(TransportError::AckTimeout(timeout)),
            PublishFault::Hang => std::future::pending().await,
            PublishFault::DropConnection => {
                self.drop_connection("connection reset by peer");
                Err(TransportError::Publish("connection reset by peer".to_string()))
            }
        }
    }

    async fn disconnect(&self) {
        let mut script = self.script.lock();
        script.connected = false;
        script.sink = None;
        script.disconnects += 1;
    }
}

/// Backoff without jitter, so delays are exact under paused time.
pub fn fixed_backoff() -> BackoffPolicy {
    BackoffPolicy::new(Duration::from_secs(1), Duration::from_secs(60), 0.0)
}

pub fn connection(transport: Arc<ScriptedTransport>) -> Arc<ConnectionManager> {
    Arc::new(ConnectionManager::new(
        transport,
        ConnectionConfig {
            options: ConnectOptions::default(),
            backoff: fixed_backoff(),
        },
    ))
}

pub fn delivery_config() -> DeliveryConfig {
    DeliveryConfig {
        poll_interval: Duration::from_secs(5),
        ack_timeout: Duration::from_secs(2),
    }
}

pub fn engine(store: Arc<Database>, connection: Arc<ConnectionManager>) -> DeliveryEngine {
    DeliveryEngine::new(store, connection, delivery_config())
}

/// Append `m0..m{n-1}` to `topic`.
pub fn append_numbered(store: &Database, topic: &str, n: usize) -> Vec<i64> {
    (0..n)
        .map(|i| store.append(topic, format!("m{i}").as_bytes()).unwrap())
        .collect()
}

pub fn numbered(range: std::ops::Range<usize>) -> Vec<String> {
    range.map(|i| format!("m{i}")).collect()
}

pub fn pending_ids(store: &Database) -> Vec<i64> {
    store.list_pending().unwrap().iter().map(|m| m.id).collect()
}

/// Yield to the runtime until `condition` holds, advancing paused time.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..1_000 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached");
}
