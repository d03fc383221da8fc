//! MQTT adapter over `rumqttc`.
//!
//! Each `connect()` builds a fresh client and event loop, polls the loop until
//! the broker's CONNACK arrives, then hands the loop to a driver task. The
//! driver never reconnects on its own: when the loop errors it reports
//! `Disconnected` through the event sink and stops, leaving reconnection
//! policy to the caller.

use crate::{
    ConnectOptions, EventSink, QoS, Transport, TransportError, TransportEvent, TransportResult,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use rumqttc::{
    AsyncClient, ConnectReturnCode, ConnectionError, Event, EventLoop, MqttOptions, Outgoing,
    Packet,
};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

const REQUEST_CAPACITY: usize = 16;
const DISCONNECT_GRACE: Duration = Duration::from_secs(1);

impl From<QoS> for rumqttc::QoS {
    fn from(qos: QoS) -> Self {
        match qos {
            QoS::AtMostOnce => rumqttc::QoS::AtMostOnce,
            QoS::AtLeastOnce => rumqttc::QoS::AtLeastOnce,
            QoS::ExactlyOnce => rumqttc::QoS::ExactlyOnce,
        }
    }
}

type AckSender = oneshot::Sender<TransportResult<()>>;

struct Ticket {
    id: u64,
    qos: QoS,
    done: AckSender,
    /// The PUBLISH request reached the client's queue.
    queued: bool,
    /// The caller gave up after queueing; the slot still owns the next pkid.
    abandoned: bool,
}

/// Publishes waiting for their packet id, then for their acknowledgment.
#[derive(Default)]
struct Inflight {
    next_ticket: u64,
    unassigned: VecDeque<Ticket>,
    by_pkid: HashMap<u16, Ticket>,
    closed: Option<String>,
}

impl Inflight {
    fn enqueue(
        &mut self,
        qos: QoS,
    ) -> TransportResult<(u64, oneshot::Receiver<TransportResult<()>>)> {
        if let Some(reason) = &self.closed {
            return Err(TransportError::Publish(reason.clone()));
        }
        self.next_ticket += 1;
        let (done, rx) = oneshot::channel();
        self.unassigned.push_back(Ticket {
            id: self.next_ticket,
            qos,
            done,
            queued: false,
            abandoned: false,
        });
        Ok((self.next_ticket, rx))
    }

    fn mark_queued(&mut self, id: u64) {
        if let Some(ticket) = self.unassigned.iter_mut().find(|t| t.id == id) {
            ticket.queued = true;
        }
    }

    /// The event loop wrote a PUBLISH; bind it to the oldest waiting ticket.
    fn assign(&mut self, pkid: u16) {
        let Some(ticket) = self.unassigned.pop_front() else {
            trace!(pkid, "Outgoing publish with no waiting caller");
            return;
        };
        if ticket.abandoned {
            trace!(pkid, "Outgoing publish for an abandoned caller");
            return;
        }
        if ticket.qos == QoS::AtMostOnce {
            let _ = ticket.done.send(Ok(()));
        } else {
            self.by_pkid.insert(pkid, ticket);
        }
    }

    fn acknowledge(&mut self, pkid: u16) {
        match self.by_pkid.remove(&pkid) {
            Some(ticket) => {
                let _ = ticket.done.send(Ok(()));
            }
            None => trace!(pkid, "Acknowledgment for unknown packet id"),
        }
    }

    /// Forget a ticket whose caller gave up.
    ///
    /// A ticket already handed to the client stays queued as an abandoned
    /// slot so its packet id is never bound to a later caller.
    fn cancel(&mut self, id: u64) {
        self.unassigned.retain_mut(|t| {
            if t.id != id {
                return true;
            }
            t.abandoned = true;
            t.queued
        });
        self.by_pkid.retain(|_, t| t.id != id);
    }

    fn fail_all(&mut self, reason: &str) {
        self.closed = Some(reason.to_string());
        let pending = self
            .unassigned
            .drain(..)
            .chain(self.by_pkid.drain().map(|(_, t)| t));
        for ticket in pending {
            let _ = ticket
                .done
                .send(Err(TransportError::Publish(reason.to_string())));
        }
    }

    fn len(&self) -> usize {
        self.unassigned.iter().filter(|t| !t.abandoned).count() + self.by_pkid.len()
    }
}

struct Session {
    client: AsyncClient,
    inflight: Arc<Mutex<Inflight>>,
    driver: JoinHandle<()>,
}

/// [`Transport`] backed by an MQTT 3.1.1 broker.
#[derive(Default)]
pub struct MqttTransport {
    session: Mutex<Option<Session>>,
    publish_lock: tokio::sync::Mutex<()>,
}

impl MqttTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn mqtt_options(options: &ConnectOptions) -> TransportResult<MqttOptions> {
        let client_id = if options.client_id.is_empty() {
            format!("edgeq-{}", std::process::id())
        } else {
            options.client_id.clone()
        };
        if client_id.starts_with(' ') {
            return Err(TransportError::Connect(format!(
                "invalid client identity {client_id:?}"
            )));
        }

        let mut mqtt = MqttOptions::new(client_id, options.host.clone(), options.port);
        mqtt.set_keep_alive(options.keepalive);
        mqtt.set_clean_session(true);
        if let Some(username) = &options.username {
            mqtt.set_credentials(
                username.clone(),
                options.password.clone().unwrap_or_default(),
            );
        }
        Ok(mqtt)
    }

    async fn handshake(eventloop: &mut EventLoop) -> TransportResult<()> {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    return if ack.code == ConnectReturnCode::Success {
                        Ok(())
                    } else {
                        Err(TransportError::Rejected(format!("{:?}", ack.code)))
                    };
                }
                Ok(event) => trace!(?event, "Event before CONNACK"),
                Err(ConnectionError::ConnectionRefused(code)) => {
                    return Err(TransportError::Rejected(format!("{code:?}")));
                }
                Err(e) => return Err(TransportError::Connect(e.to_string())),
            }
        }
    }

    fn take_session(&self) -> Option<Session> {
        self.session.lock().take()
    }
}

async fn drive(mut eventloop: EventLoop, inflight: Arc<Mutex<Inflight>>, events: EventSink) {
    let reason = loop {
        match eventloop.poll().await {
            Ok(Event::Outgoing(Outgoing::Publish(pkid))) => inflight.lock().assign(pkid),
            Ok(Event::Incoming(Packet::PubAck(ack))) => inflight.lock().acknowledge(ack.pkid),
            Ok(Event::Incoming(Packet::PubComp(comp))) => inflight.lock().acknowledge(comp.pkid),
            Ok(Event::Incoming(Packet::Disconnect)) => break "disconnected by broker".to_string(),
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                debug!("Local disconnect sent, driver stopping");
                inflight.lock().fail_all("connection closed");
                return;
            }
            Ok(_) => {}
            Err(e) => break e.to_string(),
        }
    };

    warn!(epoch = events.epoch(), reason = %reason, "Broker connection lost");
    inflight.lock().fail_all(&reason);
    events.emit(TransportEvent::Disconnected(reason));
}

#[async_trait]
impl Transport for MqttTransport {
    async fn connect(&self, options: &ConnectOptions, events: EventSink) -> TransportResult<()> {
        if let Some(previous) = self.take_session() {
            previous.driver.abort();
            previous.inflight.lock().fail_all("connection replaced");
        }

        let mqtt = Self::mqtt_options(options)?;
        let (client, mut eventloop) = AsyncClient::new(mqtt, REQUEST_CAPACITY);

        debug!(host = %options.host, port = options.port, "Connecting to broker");
        match tokio::time::timeout(options.connect_timeout, Self::handshake(&mut eventloop)).await
        {
            Ok(result) => result?,
            Err(_) => return Err(TransportError::ConnectTimeout(options.connect_timeout)),
        }
        info!(
            host = %options.host,
            port = options.port,
            epoch = events.epoch(),
            "Broker handshake complete"
        );

        events.emit(TransportEvent::Connected);
        let inflight = Arc::new(Mutex::new(Inflight::default()));
        let driver = tokio::spawn(drive(eventloop, Arc::clone(&inflight), events));
        *self.session.lock() = Some(Session {
            client,
            inflight,
            driver,
        });
        Ok(())
    }

    async fn publish(
        &self,
        topic: &str,
        payload: &[u8],
        qos: QoS,
        timeout: Duration,
    ) -> TransportResult<()> {
        let (client, inflight) = {
            let guard = self.session.lock();
            let session = guard.as_ref().ok_or(TransportError::NotConnected)?;
            (session.client.clone(), Arc::clone(&session.inflight))
        };

        // One PUBLISH hits the request queue at a time so tickets line up
        // with outgoing packet ids.
        let _serial = self.publish_lock.lock().await;
        let (ticket, ack) = inflight.lock().enqueue(qos)?;

        let exchange = async {
            client
                .publish(topic, qos.into(), false, payload.to_vec())
                .await
                .map_err(|e| TransportError::Publish(e.to_string()))?;
            inflight.lock().mark_queued(ticket);
            match ack.await {
                Ok(result) => result,
                Err(_) => Err(TransportError::Publish(
                    "connection dropped before acknowledgment".to_string(),
                )),
            }
        };

        let result = match tokio::time::timeout(timeout, exchange).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::AckTimeout(timeout)),
        };
        if result.is_err() {
            inflight.lock().cancel(ticket);
        }
        result
    }

    async fn disconnect(&self) {
        let Some(mut session) = self.take_session() else {
            return;
        };

        if let Err(e) = session.client.disconnect().await {
            debug!(error = %e, "Disconnect request not delivered");
        }
        if tokio::time::timeout(DISCONNECT_GRACE, &mut session.driver)
            .await
            .is_err()
        {
            session.driver.abort();
        }

        let mut inflight = session.inflight.lock();
        if inflight.len() > 0 {
            inflight.fail_all("connection closed");
        }
        info!("Disconnected from broker");
    }
}
