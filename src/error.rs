//! Typed errors for the log codec and the bus capability.
use std::io;

/// Failure reading or writing a capture log.
#[derive(Debug, thiserror::Error)]
pub enum LogError {
    #[error("log i/o: {0}")]
    Io(#[from] io::Error),

    /// The log is corrupt at `line` (1-based).
    #[error("format error at line {line}: {reason}")]
    Format { line: usize, reason: String },

    /// The payload line holds fewer bytes than the metadata line declared.
    #[error("truncated payload at line {line}: expected {expected} bytes, found {found}")]
    TruncatedPayload { line: usize, expected: usize, found: usize },

    #[error("topic {0:?} cannot be stored in the log (empty or contains whitespace)")]
    InvalidTopic(String),

    #[error("payload of {0} bytes exceeds the log limit")]
    PayloadTooLarge(usize),
}

impl LogError {
    pub(crate) fn format(line: usize, reason: impl Into<String>) -> Self {
        LogError::Format { line, reason: reason.into() }
    }

    /// True when the error means the log content itself is bad.
    pub fn is_corrupt(&self) -> bool {
        matches!(self, LogError::Format { .. } | LogError::TruncatedPayload { .. })
    }
}

/// Failure reported by the message-bus client.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("connect to {broker}: {reason}")]
    Connect { broker: String, reason: String },

    #[error("subscribe {filter}: {reason}")]
    Subscribe { filter: String, reason: String },

    #[error("publish {topic}: {reason}")]
    Publish { topic: String, reason: String },

    #[error("disconnect: {0}")]
    Disconnect(String),

    #[error("connection closed")]
    Closed,
}
