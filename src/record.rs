//! In-memory model of the capture log and the player's status message.
//!
//! Times are kept as [`Duration`]s: the header's start time is measured from
//! the Unix epoch, a record's time from the moment the recorder's connection
//! became ready. Both are stored on disk with microsecond resolution.
use std::fmt;
use std::time::Duration;

/// Largest payload accepted by the codec (MQTT maximum remaining length).
pub const MAX_PAYLOAD_LEN: usize = 268_435_455;

/// Status code of the message published at the start of every pass.
pub const BEGIN_PLAY: u8 = 0x1;

/// Delivery guarantee of a captured message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Qos {
    AtMostOnce = 0,
    AtLeastOnce = 1,
    ExactlyOnce = 2,
}

impl Qos {
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for Qos {
    type Error = u8;

    fn try_from(v: u8) -> Result<Self, u8> {
        match v {
            0 => Ok(Qos::AtMostOnce),
            1 => Ok(Qos::AtLeastOnce),
            2 => Ok(Qos::ExactlyOnce),
            other => Err(other),
        }
    }
}

impl fmt::Display for Qos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u8())
    }
}

/// Optional first line of a log: when the recording started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LogHeader {
    /// Wall-clock time since the Unix epoch.
    pub record_start: Duration,
}

/// One captured publish event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    /// Offset from the recorder's connection-ready instant.
    pub relative_time: Duration,
    pub qos: Qos,
    pub retain: bool,
    pub topic: String,
    pub payload: Vec<u8>,
}

/// Truncate a duration to whole microseconds, the resolution of the log.
pub fn to_micros(d: Duration) -> Duration {
    Duration::new(d.as_secs(), d.subsec_micros() * 1_000)
}

/// Binary status message published to the status topic before each pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusMessage {
    pub status: u8,
    pub sec: u64,
    pub usec: u64,
}

impl StatusMessage {
    pub const LEN: usize = 17;

    /// BEGIN_PLAY for the given header (0/0 when the log has none).
    pub fn begin_play(header: Option<&LogHeader>) -> Self {
        let start = header.map(|h| h.record_start).unwrap_or_default();
        Self {
            status: BEGIN_PLAY,
            sec: start.as_secs(),
            usec: u64::from(start.subsec_micros()),
        }
    }

    /// Packed big-endian layout: status, seconds, microseconds.
    pub fn encode(&self) -> [u8; Self::LEN] {
        let mut out = [0u8; Self::LEN];
        out[0] = self.status;
        out[1..9].copy_from_slice(&self.sec.to_be_bytes());
        out[9..17].copy_from_slice(&self.usec.to_be_bytes());
        out
    }

    pub fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != Self::LEN {
            return None;
        }
        let mut sec = [0u8; 8];
        let mut usec = [0u8; 8];
        sec.copy_from_slice(&bytes[1..9]);
        usec.copy_from_slice(&bytes[9..17]);
        Some(Self {
            status: bytes[0],
            sec: u64::from_be_bytes(sec),
            usec: u64::from_be_bytes(usec),
        })
    }
}
