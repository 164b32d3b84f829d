#![allow(dead_code)]

use mqtt_recorder::client::BusClient;
use mqtt_recorder::error::TransportError;
use mqtt_recorder::record::Qos;
use mqtt_recorder::shutdown::ShutdownHandle;
use std::io::{self, Write};
use std::sync::{Arc, Mutex};
use std::time::Instant;

#[derive(Debug, Clone)]
pub struct Published {
    pub at: Instant,
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: Qos,
    pub retain: bool,
}

/// In-memory bus that remembers every call.
#[derive(Default)]
pub struct FakeBus {
    pub published: Vec<Published>,
    pub subscriptions: Vec<(String, Qos)>,
    pub disconnected: bool,
    /// Fail the n-th publish call (0-based).
    pub fail_publish_at: Option<usize>,
    /// Trigger shutdown once this many publishes went through.
    pub stop_after: Option<(usize, ShutdownHandle)>,
    pub calls: usize,
}

impl FakeBus {
    pub fn topics(&self) -> Vec<&str> {
        self.published.iter().map(|p| p.topic.as_str()).collect()
    }
}

impl BusClient for FakeBus {
    fn subscribe(&mut self, filter: &str, qos: Qos) -> Result<(), TransportError> {
        self.subscriptions.push((filter.to_string(), qos));
        Ok(())
    }

    fn publish(
        &mut self,
        topic: &str,
        payload: &[u8],
        qos: Qos,
        retain: bool,
    ) -> Result<(), TransportError> {
        let call = self.calls;
        self.calls += 1;
        if self.fail_publish_at == Some(call) {
            return Err(TransportError::Publish { topic: topic.to_string(), reason: "broker gone".into() });
        }
        self.published.push(Published {
            at: Instant::now(),
            topic: topic.to_string(),
            payload: payload.to_vec(),
            qos,
            retain,
        });
        if let Some((n, handle)) = &self.stop_after {
            if self.published.len() >= *n {
                handle.trigger();
            }
        }
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), TransportError> {
        self.disconnected = true;
        Ok(())
    }
}

/// Writer whose contents stay visible to the test while a recorder owns it.
#[derive(Clone, Default)]
pub struct SharedBuf(pub Arc<Mutex<Vec<u8>>>);

impl SharedBuf {
    pub fn text(&self) -> String {
        String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
    }
}

impl Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
