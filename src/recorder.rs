//! Capture loop: turns broker events into log records.
use crate::client::{BusClient, BusEvent, IncomingMessage};
use crate::codec::LogWriter;
use crate::config::RecorderConfig;
use crate::error::{LogError, TransportError};
use crate::mqtt::MqttSession;
use crate::record::{LogHeader, LogRecord, Qos, to_micros};
use crate::shutdown::Shutdown;
use anyhow::{Context, Result};
use crossbeam_channel::{Receiver, select};
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Counters reported when a capture ends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecordStats {
    pub written: u64,
    pub skipped: u64,
    pub reconnects: u64,
}

pub struct Recorder<W: Write> {
    writer: LogWriter<W>,
    filter: String,
    qos: Qos,
    ready_at: Option<Instant>,
    stats: RecordStats,
}

impl<W: Write> Recorder<W> {
    pub fn new(out: W, filter: impl Into<String>, qos: Qos) -> Self {
        Self {
            writer: LogWriter::new(out),
            filter: filter.into(),
            qos,
            ready_at: None,
            stats: RecordStats::default(),
        }
    }

    pub fn stats(&self) -> RecordStats {
        self.stats
    }

    /// Handle a CONNACK. The first one fixes the time origin and writes the
    /// header; every one (re)subscribes, since a clean session drops
    /// subscriptions on reconnect.
    pub fn on_connected<C: BusClient>(
        &mut self,
        client: &mut C,
        wall: SystemTime,
        mono: Instant,
    ) -> Result<(), RecorderError> {
        if self.ready_at.is_none() {
            let record_start = to_micros(wall.duration_since(UNIX_EPOCH).unwrap_or_default());
            self.writer.write_header(&LogHeader { record_start })?;
            self.ready_at = Some(mono);
            info!(filter = %self.filter, qos = %self.qos, "connection ready, recording");
        } else {
            self.stats.reconnects += 1;
            info!(filter = %self.filter, "reconnected, resubscribing");
        }
        client.subscribe(&self.filter, self.qos)?;
        Ok(())
    }

    /// Append one record for `msg` received at `at`.
    pub fn on_message(&mut self, msg: &IncomingMessage, at: Instant) -> Result<(), RecorderError> {
        let Some(ready_at) = self.ready_at else {
            warn!(topic = %msg.topic, "message before connection ready, not recorded");
            self.stats.skipped += 1;
            return Ok(());
        };
        let rec = LogRecord {
            relative_time: to_micros(at.saturating_duration_since(ready_at)),
            qos: msg.qos,
            retain: msg.retain,
            topic: msg.topic.clone(),
            payload: msg.payload.clone(),
        };
        match self.writer.write_record(&rec) {
            Ok(()) => {
                self.stats.written += 1;
                debug!(
                    t = ?rec.relative_time,
                    qos = %rec.qos,
                    retain = rec.retain,
                    len = rec.payload.len(),
                    topic = %rec.topic,
                    "recorded"
                );
                Ok(())
            }
            Err(e @ (LogError::InvalidTopic(_) | LogError::PayloadTooLarge(_))) => {
                warn!(topic = %msg.topic, error = %e, "message not recorded");
                self.stats.skipped += 1;
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Process events until shutdown is requested or the event source closes.
    ///
    /// Shutdown is only observed between events, so every record is either
    /// fully written or not started.
    pub fn run<C: BusClient>(
        &mut self,
        client: &mut C,
        events: &Receiver<BusEvent>,
        shutdown: &Shutdown,
    ) -> Result<RecordStats, RecorderError> {
        loop {
            if shutdown.is_triggered() {
                break;
            }
            let next = select! {
                recv(shutdown.receiver()) -> _ => None,
                recv(events) -> ev => Some(ev),
            };
            let Some(ev) = next else {
                shutdown.trip();
                break;
            };
            match ev {
                Ok(BusEvent::Connected { wall, at }) => {
                    self.on_connected(client, wall, at)?;
                }
                Ok(BusEvent::Message { msg, at }) => {
                    if shutdown.is_triggered() {
                        break;
                    }
                    self.on_message(&msg, at)?;
                }
                Ok(BusEvent::ConnectionLost(reason)) => {
                    warn!(%reason, "broker connection lost");
                }
                Err(_) => return Err(TransportError::Closed.into()),
            }
        }
        self.writer.flush()?;
        Ok(self.stats)
    }

    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RecorderError {
    #[error(transparent)]
    Log(#[from] LogError),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Open the log, connect, record until `shutdown`, then disconnect and close
/// the log on every path.
pub fn record(cfg: &RecorderConfig, shutdown: &Shutdown) -> Result<RecordStats> {
    if let Some(parent) = cfg.log_file.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).with_context(|| format!("create {parent:?}"))?;
        }
    }
    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(&cfg.log_file)
        .with_context(|| format!("open {:?}", cfg.log_file))?;
    info!(path = ?cfg.log_file, broker = %cfg.mqtt.endpoint(), "recording");

    let (mut session, events) = MqttSession::connect(&cfg.mqtt, CONNECT_TIMEOUT)
        .context("could not connect MQTT broker")?;

    let mut recorder = Recorder::new(BufWriter::<File>::new(file), cfg.topic.clone(), cfg.qos);
    let outcome = recorder.run(&mut session, &events, shutdown);
    if let Err(e) = session.disconnect() {
        warn!(error = %e, "disconnect failed");
    }
    let stats = outcome.with_context(|| format!("recording to {:?}", cfg.log_file))?;
    recorder
        .into_inner()
        .into_inner()
        .map_err(|e| e.into_error())
        .with_context(|| format!("close {:?}", cfg.log_file))?;
    Ok(stats)
}
