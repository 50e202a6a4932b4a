//! mqtt-session host binary
//!
//! Loads a session configuration, connects to the broker and drives the
//! session's poll loop until interrupted.

use clap::{Parser, Subcommand};
use mqtt_session::config::SessionConfig;
use mqtt_session::observability::init_default_logging;
use mqtt_session::session::{MqttSession, QoS};
use mqtt_session::{mqtt_span, RumqttTransport, TokioResolver};
use std::path::PathBuf;
use std::process;
use std::time::Instant;
use tokio::signal;
use tokio::time::{interval, sleep, Duration, MissedTickBehavior};
use tracing::{debug, error, info, warn, Instrument, Level};

/// Interval between two session polls
const POLL_INTERVAL: Duration = Duration::from_millis(16);

/// Time given to the transport to flush the shutdown message
const SHUTDOWN_FLUSH: Duration = Duration::from_millis(250);

/// Exit code asking a supervisor to restart the device
const EXIT_REBOOT: i32 = 2;

/// Single-owner MQTT client session
#[derive(Parser)]
#[command(name = "mqtt-session")]
#[command(about = "Keep an MQTT session alive and route its messages")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE", global = true, env = "MQTT_SESSION_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect and run the session until interrupted
    Run {
        /// Log every message received on TOPIC (repeatable)
        #[arg(long, value_name = "TOPIC")]
        watch: Vec<String>,
    },
    /// Validate the configuration file
    Config {
        /// Show the effective configuration
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();

    init_default_logging();

    info!("Starting mqtt-session v{}", env!("CARGO_PKG_VERSION"));

    let config = match load_configuration(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Run { watch } => run_session(config, watch).await,
        Commands::Config { show } => handle_config_command(config, show),
    };

    match result {
        Ok(code) => {
            info!("Application shutdown complete");
            if code != 0 {
                process::exit(code);
            }
        }
        Err(e) => {
            error!("Command failed: {}", e);
            process::exit(1);
        }
    }
}

fn load_configuration(config_path: &Option<PathBuf>) -> Result<SessionConfig, Box<dyn std::error::Error>> {
    match config_path {
        Some(path) => {
            info!("Loading configuration from: {}", path.display());
            Ok(SessionConfig::load_from_file(path)?)
        }
        None => {
            let default_paths = ["mqtt-session.toml", "config/mqtt-session.toml"];

            for path_str in default_paths {
                let path = PathBuf::from(path_str);
                if path.exists() {
                    info!("Loading configuration from: {}", path.display());
                    return Ok(SessionConfig::load_from_file(&path)?);
                }
            }

            Err("No configuration file found. Provide one with -c/--config or create mqtt-session.toml".into())
        }
    }
}

fn build_session(config: &SessionConfig) -> Result<MqttSession<RumqttTransport, TokioResolver>, Box<dyn std::error::Error>> {
    let options = config.to_options()?;
    Ok(MqttSession::new(
        options,
        RumqttTransport::from_current()?,
        TokioResolver::from_current()?,
    ))
}

fn handle_config_command(config: SessionConfig, show: bool) -> Result<i32, Box<dyn std::error::Error>> {
    let session = build_session(&config)?;
    info!("Configuration is valid");
    if show {
        session.dump_config();
    }
    Ok(0)
}

async fn run_session(config: SessionConfig, watch: Vec<String>) -> Result<i32, Box<dyn std::error::Error>> {
    let mut session = build_session(&config)?;
    session.dump_config();

    for topic in &watch {
        session.subscribe(
            topic,
            |topic, payload| info!(%topic, %payload, "Message received"),
            QoS::AtMostOnce,
        )?;
    }

    let span = mqtt_span!(operation = "session", client_id = %session.credentials().client_id());
    let code = drive(&mut session).instrument(span).await;
    Ok(code)
}

/// Poll the session until Ctrl-C or until the broker has been gone too long
async fn drive(session: &mut MqttSession<RumqttTransport, TokioResolver>) -> i32 {
    let mut ticker = interval(POLL_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut was_connected = false;

    loop {
        tokio::select! {
            _ = signal::ctrl_c() => {
                info!("Received Ctrl-C, shutting down gracefully...");
                session.shutdown();
                sleep(SHUTDOWN_FLUSH).await;
                return 0;
            }
            _ = ticker.tick() => {
                let now = Instant::now();
                session.poll(now);

                let connected = session.is_connected();
                if connected && !was_connected {
                    if let Err(e) = session.publish_log(Level::INFO, "session connected") {
                        debug!(error = %e, "Log line not forwarded");
                    }
                }
                was_connected = connected;

                if session.reboot_due(now) {
                    warn!(
                        reason = ?session.disconnect_reason(),
                        "Broker unreachable past the reboot timeout, exiting"
                    );
                    return EXIT_REBOOT;
                }
            }
        }
    }
}
