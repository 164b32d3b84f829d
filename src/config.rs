//! Validated configuration handed to the recorder and player entry points.
use crate::record::Qos;
use std::path::PathBuf;
use std::time::Duration;
use time::OffsetDateTime;

pub const DEFAULT_BROKER: &str = "localhost";
pub const DEFAULT_PORT: u16 = 1883;
pub const DEFAULT_KEEPALIVE_SECS: u64 = 60;
pub const DEFAULT_RECORDER_CLIENT_ID: &str = "recorder";
pub const DEFAULT_RECORDER_TOPIC: &str = "#";
pub const DEFAULT_PLAYER_CLIENT_ID: &str = "mqtt-player";
pub const DEFAULT_STATUS_TOPIC: &str = "mqtt-player/status";

/// Broker connection settings shared by both tools.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MqttConfig {
    pub broker: String,
    pub port: u16,
    pub client_id: String,
    pub clean_session: bool,
    pub keepalive: Duration,
}

impl MqttConfig {
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            broker: DEFAULT_BROKER.to_string(),
            port: DEFAULT_PORT,
            client_id: client_id.into(),
            clean_session: true,
            keepalive: Duration::from_secs(DEFAULT_KEEPALIVE_SECS),
        }
    }

    /// `host:port` for diagnostics.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.broker, self.port)
    }
}

#[derive(Debug, Clone)]
pub struct RecorderConfig {
    pub mqtt: MqttConfig,
    /// Subscription filter.
    pub topic: String,
    /// Highest QoS requested from the broker.
    pub qos: Qos,
    pub log_file: PathBuf,
}

#[derive(Debug, Clone)]
pub struct PlayerConfig {
    pub mqtt: MqttConfig,
    /// Where BEGIN_PLAY status messages are published.
    pub status_topic: String,
    pub log_file: PathBuf,
    pub ignore_timing: bool,
    pub repeat: bool,
}

/// Parse the `on|off` switch used for the clean-session option.
pub fn parse_on_off(s: &str) -> Result<bool, String> {
    match s {
        "on" => Ok(true),
        "off" => Ok(false),
        other => Err(format!("expected 'on' or 'off', got '{other}'")),
    }
}

/// Parse a QoS level given on the command line.
pub fn parse_qos(s: &str) -> Result<Qos, String> {
    s.parse::<u8>()
        .ok()
        .and_then(|v| Qos::try_from(v).ok())
        .ok_or_else(|| format!("invalid QoS level '{s}', expected 0-2"))
}

/// Default capture path, `captures/mqtt_YYYY_MM_DD_HHMMSS.log`, using local
/// time when the offset can be determined and UTC otherwise.
pub fn default_log_path() -> PathBuf {
    let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
    log_path_for(now)
}

fn log_path_for(at: OffsetDateTime) -> PathBuf {
    let fname = format!(
        "mqtt_{}_{:02}_{:02}_{:02}{:02}{:02}.log",
        at.year(),
        at.month() as u8,
        at.day(),
        at.hour(),
        at.minute(),
        at.second()
    );
    let mut p = PathBuf::from("captures");
    p.push(fname);
    p
}
