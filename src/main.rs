use anyhow::{Context, Result};
use clap::Parser;
use dotenvy::dotenv;
use mqtt_recorder::config::{
    DEFAULT_BROKER, DEFAULT_KEEPALIVE_SECS, DEFAULT_PORT, DEFAULT_RECORDER_CLIENT_ID,
    DEFAULT_RECORDER_TOPIC, MqttConfig, RecorderConfig, default_log_path, parse_on_off, parse_qos,
};
use mqtt_recorder::record::Qos;
use mqtt_recorder::{recorder, shutdown};
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(version, about = "Record MQTT messages into a replayable log")]
struct Args {
    /// Log file the received messages are written to; defaults to
    /// captures/mqtt_YYYY_MM_DD_HHMMSS.log
    #[arg(env = "LOG_FILE")]
    logfile: Option<PathBuf>,

    /// Topic filter to record
    #[arg(long, short = 't', env = "MQTT_TOPIC", default_value = DEFAULT_RECORDER_TOPIC)]
    topic: String,

    /// Hostname of the MQTT broker
    #[arg(long, short = 'b', env = "MQTT_BROKER", default_value = DEFAULT_BROKER)]
    broker: String,

    /// Port of the MQTT broker
    #[arg(long, short = 'p', env = "MQTT_PORT", default_value_t = DEFAULT_PORT,
          value_parser = clap::value_parser!(u16).range(1..))]
    port: u16,

    /// MQTT client id
    #[arg(long, short = 'c', env = "MQTT_CLIENT_ID", default_value = DEFAULT_RECORDER_CLIENT_ID)]
    client_id: String,

    /// Connect with a clean session (on|off)
    #[arg(long, short = 'x', default_value = "on", value_parser = parse_on_off, action = clap::ArgAction::Set)]
    clean_session: bool,

    /// Keepalive interval in seconds
    #[arg(long, short = 'k', default_value_t = DEFAULT_KEEPALIVE_SECS,
          value_parser = clap::value_parser!(u64).range(5..=65535))]
    keep_alive: u64,

    /// Highest QoS level the messages are subscribed with (0-2)
    #[arg(long, short = 'q', default_value = "2", value_parser = parse_qos)]
    qos: Qos,

    /// Log every recorded message and client event
    #[arg(long, short = 'v', default_value_t = false)]
    verbose: bool,
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)))
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    // Load environment variables from .env if present
    let _ = dotenv();
    let args = Args::parse();
    init_tracing(args.verbose);

    let cfg = RecorderConfig {
        mqtt: MqttConfig {
            broker: args.broker,
            port: args.port,
            client_id: args.client_id,
            clean_session: args.clean_session,
            keepalive: Duration::from_secs(args.keep_alive),
        },
        topic: args.topic,
        qos: args.qos,
        log_file: args.logfile.unwrap_or_else(default_log_path),
    };

    // Ctrl+C stops the capture loop between records; the log is closed and
    // the session disconnected before `record` returns.
    let (handle, shutdown) = shutdown::channel();
    ctrlc::set_handler(move || handle.trigger()).context("install Ctrl+C handler")?;

    let stats = recorder::record(&cfg, &shutdown)?;
    info!(
        written = stats.written,
        skipped = stats.skipped,
        reconnects = stats.reconnects,
        path = ?cfg.log_file,
        "recording finished"
    );
    Ok(())
}
