//! Replay loop: re-publishes a capture log with its original timing.
//!
//! Each pass takes a fresh `pass_start` and publishes every record at
//! `pass_start + relative_time`. Targets are computed from the fixed pass
//! start rather than the previous publish, so scheduling jitter does not add
//! up over a long log. Before the first record of every pass a BEGIN_PLAY
//! [`StatusMessage`] goes to the status topic.
use crate::client::BusClient;
use crate::codec::LogReader;
use crate::config::PlayerConfig;
use crate::error::{LogError, TransportError};
use crate::mqtt::MqttSession;
use crate::record::{LogRecord, Qos, StatusMessage};
use crate::shutdown::Shutdown;
use anyhow::{Context, Result};
use std::fs::File;
use std::io::{BufRead, BufReader, Seek, Write};
use std::time::{Duration, Instant};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::{debug, info, warn};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayState {
    Idle,
    ReadHeader,
    EmitBeginPlay,
    ReplayRecords,
    Terminated,
    Cancelled,
    Failed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlayStats {
    /// Passes started (BEGIN_PLAY messages sent).
    pub passes: u64,
    /// Records handed to the client, over all passes.
    pub published: u64,
    pub cancelled: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum PlayerError {
    #[error(transparent)]
    Log(#[from] LogError),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl PlayerError {
    pub fn is_corrupt_log(&self) -> bool {
        matches!(self, PlayerError::Log(e) if e.is_corrupt())
    }
}

pub struct Player<R> {
    reader: LogReader<R>,
    status_topic: String,
    ignore_timing: bool,
    repeat: bool,
    state: PlayState,
}

impl<R: BufRead + Seek> Player<R> {
    pub fn new(log: R, status_topic: impl Into<String>) -> Self {
        Self {
            reader: LogReader::new(log),
            status_topic: status_topic.into(),
            ignore_timing: false,
            repeat: false,
            state: PlayState::Idle,
        }
    }

    /// Publish records back to back, ignoring their timestamps.
    pub fn ignore_timing(mut self, on: bool) -> Self {
        self.ignore_timing = on;
        self
    }

    /// Start over at end of file until cancelled.
    pub fn repeat(mut self, on: bool) -> Self {
        self.repeat = on;
        self
    }

    pub fn state(&self) -> PlayState {
        self.state
    }

    pub fn run<C: BusClient>(
        &mut self,
        client: &mut C,
        shutdown: &Shutdown,
    ) -> Result<PlayStats, PlayerError> {
        let res = self.run_passes(client, shutdown);
        self.state = match &res {
            Ok(s) if s.cancelled => PlayState::Cancelled,
            Ok(_) => PlayState::Terminated,
            Err(_) => PlayState::Failed,
        };
        res
    }

    fn run_passes<C: BusClient>(
        &mut self,
        client: &mut C,
        shutdown: &Shutdown,
    ) -> Result<PlayStats, PlayerError> {
        let mut stats = PlayStats::default();
        loop {
            let pass_start = Instant::now();

            self.state = PlayState::ReadHeader;
            self.reader.rewind()?;
            let header = self.reader.read_header()?;
            if let Some(h) = &header {
                debug!(record_time = %format_wall(h.record_start), "record time");
            }
            if shutdown.is_triggered() {
                stats.cancelled = true;
                return Ok(stats);
            }

            self.state = PlayState::EmitBeginPlay;
            let status = StatusMessage::begin_play(header.as_ref());
            client.publish(&self.status_topic, &status.encode(), Qos::ExactlyOnce, false)?;
            stats.passes += 1;
            info!(pass = stats.passes, "start playing");

            self.state = PlayState::ReplayRecords;
            let mut in_pass = 0u64;
            while let Some(rec) = self.reader.next_record()? {
                if self.wait_for(&rec, pass_start, shutdown) {
                    stats.cancelled = true;
                    return Ok(stats);
                }
                debug!(
                    t = ?rec.relative_time,
                    qos = %rec.qos,
                    retain = rec.retain,
                    len = rec.payload.len(),
                    topic = %rec.topic,
                    "publish"
                );
                client.publish(&rec.topic, &rec.payload, rec.qos, rec.retain)?;
                in_pass += 1;
                stats.published += 1;
            }

            if !self.repeat {
                return Ok(stats);
            }
            if in_pass == 0 {
                warn!("log holds no records, not repeating");
                return Ok(stats);
            }
        }
    }

    /// Sleep until the record is due. Returns true if shutdown was requested.
    fn wait_for(&self, rec: &LogRecord, pass_start: Instant, shutdown: &Shutdown) -> bool {
        if self.ignore_timing {
            return shutdown.is_triggered();
        }
        let delay = match pass_start.checked_add(rec.relative_time) {
            Some(target) => target.saturating_duration_since(Instant::now()),
            None => rec.relative_time,
        };
        if delay.is_zero() {
            shutdown.is_triggered()
        } else {
            shutdown.wait(delay)
        }
    }
}

/// RFC 3339 rendering of a Unix-epoch offset for diagnostics.
pub fn format_wall(since_epoch: Duration) -> String {
    OffsetDateTime::from_unix_timestamp_nanos(since_epoch.as_nanos() as i128)
        .ok()
        .and_then(|t| t.format(&Rfc3339).ok())
        .unwrap_or_else(|| format!("{}.{:06}", since_epoch.as_secs(), since_epoch.subsec_micros()))
}

/// Decode a whole log and print it, without touching a broker.
pub fn dump<R: BufRead, W: Write>(log: R, mut out: W) -> Result<u64> {
    let mut reader = LogReader::new(log);
    if let Some(h) = reader.read_header()? {
        writeln!(
            out,
            "record time: {}.{:06} ({})",
            h.record_start.as_secs(),
            h.record_start.subsec_micros(),
            format_wall(h.record_start)
        )?;
    }
    let mut n = 0u64;
    while let Some(rec) = reader.next_record()? {
        writeln!(
            out,
            "time: {:3}.{:06} qos: {} retain: {} len: {} topic: {}",
            rec.relative_time.as_secs(),
            rec.relative_time.subsec_micros(),
            rec.qos,
            u8::from(rec.retain),
            rec.payload.len(),
            rec.topic
        )?;
        n += 1;
    }
    Ok(n)
}

/// Open the log, connect, replay until done or `shutdown`, then disconnect.
pub fn play(cfg: &PlayerConfig, shutdown: &Shutdown) -> Result<PlayStats> {
    let file = File::open(&cfg.log_file).with_context(|| format!("open {:?}", cfg.log_file))?;
    info!(path = ?cfg.log_file, broker = %cfg.mqtt.endpoint(), "playing");

    let (mut session, _) = MqttSession::connect(&cfg.mqtt, CONNECT_TIMEOUT)
        .context("could not connect MQTT broker")?;

    let mut player = Player::new(BufReader::new(file), cfg.status_topic.clone())
        .ignore_timing(cfg.ignore_timing)
        .repeat(cfg.repeat);
    let outcome = player.run(&mut session, shutdown);
    if let Err(e) = session.disconnect() {
        warn!(error = %e, "disconnect failed");
    }
    outcome.with_context(|| format!("replaying {:?}", cfg.log_file))
}
