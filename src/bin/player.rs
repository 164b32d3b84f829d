use anyhow::{Context, Result};
use clap::Parser;
use dotenvy::dotenv;
use mqtt_recorder::config::{
    DEFAULT_BROKER, DEFAULT_KEEPALIVE_SECS, DEFAULT_PLAYER_CLIENT_ID, DEFAULT_PORT,
    DEFAULT_STATUS_TOPIC, MqttConfig, PlayerConfig, parse_on_off,
};
use mqtt_recorder::{player, shutdown};
use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(version, about = "Replay a recorded MQTT log with its original timing")]
struct Args {
    /// Log file the messages are loaded from
    #[arg(env = "LOG_FILE")]
    logfile: PathBuf,

    /// Topic the player posts its status messages to
    #[arg(long, short = 't', env = "MQTT_TOPIC", default_value = DEFAULT_STATUS_TOPIC)]
    topic: String,

    /// Hostname of the MQTT broker
    #[arg(long, short = 'b', env = "MQTT_BROKER", default_value = DEFAULT_BROKER)]
    broker: String,

    /// Port of the MQTT broker
    #[arg(long, short = 'p', env = "MQTT_PORT", default_value_t = DEFAULT_PORT,
          value_parser = clap::value_parser!(u16).range(1..))]
    port: u16,

    /// MQTT client id
    #[arg(long, short = 'c', env = "MQTT_CLIENT_ID", default_value = DEFAULT_PLAYER_CLIENT_ID)]
    client_id: String,

    /// Connect with a clean session (on|off)
    #[arg(long, short = 'x', default_value = "on", value_parser = parse_on_off, action = clap::ArgAction::Set)]
    clean_session: bool,

    /// Keepalive interval in seconds
    #[arg(long, short = 'k', default_value_t = DEFAULT_KEEPALIVE_SECS,
          value_parser = clap::value_parser!(u64).range(5..=65535))]
    keep_alive: u64,

    /// Ignore the timing in the log and replay it as fast as possible
    #[arg(long, short = 'i', default_value_t = false)]
    ignore_timing: bool,

    /// Repeat the log endlessly
    #[arg(long, short = 'r', default_value_t = false)]
    repeat: bool,

    /// Print the decoded log and exit without connecting
    #[arg(long, default_value_t = false)]
    dump: bool,

    /// Log the header and every record as it is published
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
    let _ = dotenv();
    let args = Args::parse();
    init_tracing(args.verbose);

    if args.dump {
        let f = File::open(&args.logfile).with_context(|| format!("open {:?}", args.logfile))?;
        let n = player::dump(BufReader::new(f), std::io::stdout().lock())
            .with_context(|| format!("decode {:?}", args.logfile))?;
        eprintln!("Read {n} records.");
        return Ok(());
    }

    let cfg = PlayerConfig {
        mqtt: MqttConfig {
            broker: args.broker,
            port: args.port,
            client_id: args.client_id,
            clean_session: args.clean_session,
            keepalive: Duration::from_secs(args.keep_alive),
        },
        status_topic: args.topic,
        log_file: args.logfile,
        ignore_timing: args.ignore_timing,
        repeat: args.repeat,
    };

    let (handle, shutdown) = shutdown::channel();
    ctrlc::set_handler(move || handle.trigger()).context("install Ctrl+C handler")?;

    let stats = player::play(&cfg, &shutdown)?;
    info!(
        passes = stats.passes,
        published = stats.published,
        cancelled = stats.cancelled,
        "playback finished"
    );
    Ok(())
}
