//! The message-bus capability the recorder and player are written against.
//!
//! [`crate::mqtt::MqttSession`] implements it over a real broker; tests use an
//! in-memory fake.
use crate::error::TransportError;
use crate::record::Qos;
use std::time::{Instant, SystemTime};

/// A publish event delivered by the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: Qos,
    pub retain: bool,
}

/// Events forwarded from the client's network loop, in arrival order.
///
/// Timestamps are taken by the network loop when the packet arrives, not when
/// the consumer dequeues the event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusEvent {
    /// The broker acknowledged a (re)connection.
    Connected { wall: SystemTime, at: Instant },
    Message { msg: IncomingMessage, at: Instant },
    /// The link dropped; the client library will try to reconnect.
    ConnectionLost(String),
}

pub trait BusClient {
    fn subscribe(&mut self, filter: &str, qos: Qos) -> Result<(), TransportError>;

    fn publish(
        &mut self,
        topic: &str,
        payload: &[u8],
        qos: Qos,
        retain: bool,
    ) -> Result<(), TransportError>;

    fn disconnect(&mut self) -> Result<(), TransportError>;
}
