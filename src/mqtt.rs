//! [`BusClient`] over `rumqttc`'s synchronous client.
//!
//! The rumqttc event loop runs on a dedicated `mqtt-net` thread and forwards
//! connection and publish events over a bounded channel, so the recorder sees
//! them strictly in arrival order. Reconnection after a dropped link is left
//! to rumqttc; the loop only reports the loss and backs off briefly.
use crate::client::{BusClient, BusEvent, IncomingMessage};
use crate::config::MqttConfig;
use crate::error::TransportError;
use crate::record::{MAX_PAYLOAD_LEN, Qos};
use crossbeam_channel::{Receiver, Sender, bounded};
use rumqttc::{Client, Connection, Event, MqttOptions, Outgoing, Packet, QoS};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant, SystemTime};
use tracing::{debug, trace, warn};

const REQUEST_QUEUE: usize = 64;
const EVENT_QUEUE: usize = 8192;
const RECONNECT_DELAY: Duration = Duration::from_secs(1);
const DISCONNECT_GRACE: Duration = Duration::from_secs(2);
/// Payload limit plus room for the fixed header, topic and packet id.
const MAX_PACKET_SIZE: usize = MAX_PAYLOAD_LEN + 64 * 1024;

fn to_rumqttc(qos: Qos) -> QoS {
    match qos {
        Qos::AtMostOnce => QoS::AtMostOnce,
        Qos::AtLeastOnce => QoS::AtLeastOnce,
        Qos::ExactlyOnce => QoS::ExactlyOnce,
    }
}

fn from_rumqttc(qos: QoS) -> Qos {
    match qos {
        QoS::AtMostOnce => Qos::AtMostOnce,
        QoS::AtLeastOnce => Qos::AtLeastOnce,
        QoS::ExactlyOnce => Qos::ExactlyOnce,
    }
}

pub struct MqttSession {
    client: Client,
    closing: Arc<AtomicBool>,
    net: Option<JoinHandle<()>>,
    endpoint: String,
}

impl MqttSession {
    /// Connect and block until the broker acknowledges the session or
    /// `timeout` elapses. The returned receiver yields every event from the
    /// network loop, starting with the initial [`BusEvent::Connected`].
    /// Dropping it is fine when the caller only publishes.
    pub fn connect(
        cfg: &MqttConfig,
        timeout: Duration,
    ) -> Result<(Self, Receiver<BusEvent>), TransportError> {
        let endpoint = cfg.endpoint();
        let mut opts = MqttOptions::new(cfg.client_id.clone(), cfg.broker.clone(), cfg.port);
        opts.set_keep_alive(cfg.keepalive);
        opts.set_clean_session(cfg.clean_session);
        opts.set_max_packet_size(MAX_PACKET_SIZE, MAX_PACKET_SIZE);

        let (client, connection) = Client::new(opts, REQUEST_QUEUE);
        let (tx, rx) = bounded(EVENT_QUEUE);
        let (ready_tx, ready_rx) = bounded(1);
        let closing = Arc::new(AtomicBool::new(false));

        let net_closing = Arc::clone(&closing);
        let net = thread::Builder::new()
            .name("mqtt-net".into())
            .spawn(move || network_loop(connection, tx, ready_tx, net_closing))
            .map_err(|e| TransportError::Connect { broker: endpoint.clone(), reason: e.to_string() })?;

        let session = Self { client, closing, net: Some(net), endpoint: endpoint.clone() };
        match ready_rx.recv_timeout(timeout) {
            Ok(Ok(())) => {
                debug!(broker = %endpoint, client_id = %cfg.client_id, "connected");
                Ok((session, rx))
            }
            Ok(Err(reason)) => {
                session.closing.store(true, Ordering::Release);
                Err(TransportError::Connect { broker: endpoint, reason })
            }
            Err(_) => {
                // Dropping the session closes the request channel, which ends
                // the network loop once rumqttc notices.
                session.closing.store(true, Ordering::Release);
                Err(TransportError::Connect {
                    broker: endpoint,
                    reason: format!("no CONNACK within {timeout:?}"),
                })
            }
        }
    }
}

fn network_loop(
    mut connection: Connection,
    tx: Sender<BusEvent>,
    ready: Sender<Result<(), String>>,
    closing: Arc<AtomicBool>,
) {
    let mut connected_once = false;
    for notification in connection.iter() {
        match notification {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                let (wall, at) = (SystemTime::now(), Instant::now());
                trace!(?ack, "connack");
                if !connected_once {
                    connected_once = true;
                    let _ = ready.send(Ok(()));
                }
                // Nobody listening is fine: the player never consumes events.
                let _ = tx.send(BusEvent::Connected { wall, at });
            }
            Ok(Event::Incoming(Packet::Publish(p))) => {
                let at = Instant::now();
                let msg = IncomingMessage {
                    topic: p.topic.clone(),
                    payload: p.payload.to_vec(),
                    qos: from_rumqttc(p.qos),
                    retain: p.retain,
                };
                let _ = tx.send(BusEvent::Message { msg, at });
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) if closing.load(Ordering::Acquire) => {
                trace!("disconnect sent");
                break;
            }
            Ok(ev) => trace!(?ev, "mqtt event"),
            Err(e) => {
                if closing.load(Ordering::Acquire) {
                    break;
                }
                if !connected_once {
                    let _ = ready.send(Err(e.to_string()));
                    break;
                }
                warn!(error = %e, "connection lost, reconnecting");
                let _ = tx.send(BusEvent::ConnectionLost(e.to_string()));
                thread::sleep(RECONNECT_DELAY);
            }
        }
    }
    trace!("network loop finished");
}

impl BusClient for MqttSession {
    fn subscribe(&mut self, filter: &str, qos: Qos) -> Result<(), TransportError> {
        self.client
            .subscribe(filter, to_rumqttc(qos))
            .map_err(|e| TransportError::Subscribe { filter: filter.to_string(), reason: e.to_string() })
    }

    fn publish(
        &mut self,
        topic: &str,
        payload: &[u8],
        qos: Qos,
        retain: bool,
    ) -> Result<(), TransportError> {
        self.client
            .publish(topic, to_rumqttc(qos), retain, payload.to_vec())
            .map_err(|e| TransportError::Publish { topic: topic.to_string(), reason: e.to_string() })
    }

    /// Queue a DISCONNECT behind any pending publishes and give the network
    /// thread a short grace period to flush them.
    fn disconnect(&mut self) -> Result<(), TransportError> {
        if self.closing.swap(true, Ordering::AcqRel) && self.net.is_none() {
            return Ok(());
        }
        let res = self.client.disconnect().map_err(|e| TransportError::Disconnect(e.to_string()));
        if let Some(net) = self.net.take() {
            let deadline = Instant::now() + DISCONNECT_GRACE;
            while !net.is_finished() && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(10));
            }
            if net.is_finished() {
                let _ = net.join();
            } else {
                warn!(broker = %self.endpoint, "network thread still busy after disconnect");
            }
        }
        res
    }
}

impl Drop for MqttSession {
    fn drop(&mut self) {
        self.closing.store(true, Ordering::Release);
    }
}
