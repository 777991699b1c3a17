//! `evse` command line runner.
//!
//! Connects an [`EvseController`] to a serial port and drives it until Ctrl-C.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};
use evse_at_protocol::Catalog;
use evse_client::{
    describe_metrics, ClientConfig, ClientError, ConfigError, EntityRegistry, EvseController,
    SerialTransport, StateChanged, DEFAULT_BAUD_RATE,
};
use thiserror::Error;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const TICK_PERIOD: Duration = Duration::from_millis(10);
const SERIAL_READ_TIMEOUT: Duration = Duration::from_millis(5);

#[derive(Debug, Parser)]
#[command(name = "evse", version, about = "ESP32 EVSE serial client")]
struct Cli {
    /// Increase log verbosity (-v debug, -vv trace). RUST_LOG takes precedence.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Connect to the controller and keep its entities up to date.
    Run {
        /// Configuration file (YAML).
        #[arg(short, long)]
        config: PathBuf,
        /// Serial device, overrides the configured port.
        #[arg(short, long)]
        port: Option<String>,
        /// Baud rate, overrides the configured rate.
        #[arg(short, long)]
        baud: Option<u32>,
    },
    /// Print the command catalog.
    Catalog,
    /// Validate a configuration file and print the effective timing.
    Check {
        #[arg(short, long)]
        config: PathBuf,
    },
}

#[derive(Debug, Error)]
enum RunnerError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Client(#[from] ClientError),

    #[error("no serial port configured (use --port or serial.port)")]
    NoPort,

    #[error("failed to open serial port {port}: {source}")]
    Serial {
        port: String,
        #[source]
        source: serialport::Error,
    },

    #[error("failed to install Ctrl-C handler: {0}")]
    Signal(#[from] ctrlc::Error),
}

/// Registry that reports entity updates to the log.
struct LogRegistry;

impl EntityRegistry for LogRegistry {
    fn state_changed(&mut self, change: &StateChanged) {
        info!(entity = %change.key, "{}", change.value);
    }

    fn connectivity_changed(&mut self, connected: bool) {
        if connected {
            info!("Controller connected");
        } else {
            warn!("Controller unreachable");
        }
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).init();
}

fn open_port(port: &str, baud_rate: u32) -> Result<Box<dyn serialport::SerialPort>, RunnerError> {
    let mut builder = serialport::new(port, baud_rate).timeout(SERIAL_READ_TIMEOUT);
    #[cfg(unix)]
    {
        builder = builder
            .data_bits(serialport::DataBits::Eight)
            .stop_bits(serialport::StopBits::One)
            .parity(serialport::Parity::None);
    }
    builder.open().map_err(|source| RunnerError::Serial {
        port: port.to_string(),
        source,
    })
}

fn run(config_path: &Path, port: Option<String>, baud: Option<u32>) -> Result<(), RunnerError> {
    let config = ClientConfig::load(config_path)?;
    let serial = config.serial.as_ref();
    let port = port
        .or_else(|| serial.map(|s| s.port.clone()))
        .ok_or(RunnerError::NoPort)?;
    let baud_rate = baud
        .or_else(|| serial.map(|s| s.baud_rate))
        .unwrap_or(DEFAULT_BAUD_RATE);

    info!("Opening {} at {} baud", port, baud_rate);
    let transport = SerialTransport::new(open_port(&port, baud_rate)?);
    let mut evse = EvseController::from_config(&config, transport, LogRegistry)?;

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })?;

    let timing = evse.timing();
    info!(
        "Running: update interval {:?}, response timeout {:?}, liveness timeout {:?}",
        timing.update_interval, timing.response_timeout, timing.liveness_timeout
    );

    while running.load(Ordering::SeqCst) {
        if let Err(e) = evse.tick(Instant::now()) {
            warn!("{}", e);
        }
        thread::sleep(TICK_PERIOD);
    }

    info!("Shutting down, cancelling subscriptions");
    evse.unsubscribe_all();
    let deadline = Instant::now() + timing.response_timeout;
    while Instant::now() < deadline {
        if let Err(e) = evse.tick(Instant::now()) {
            warn!("{}", e);
            break;
        }
        if evse.is_idle() {
            break;
        }
        thread::sleep(TICK_PERIOD);
    }

    let stats = evse.stats();
    info!(
        "Sent {} command(s): {} acked, {} rejected, {} timed out",
        stats.commands_sent,
        stats.commands_acked,
        stats.commands_rejected,
        stats.commands_timed_out
    );
    info!(
        "Received {} line(s), {} decode error(s)",
        stats.lines_received,
        stats.decode_errors
    );
    Ok(())
}

fn print_catalog() {
    let catalog = Catalog::evse();
    println!(
        "{:<30} {:<18} {:<7} {:<10} {:>6}",
        "KEY", "MNEMONIC", "DIR", "KIND", "SCALE"
    );
    for (_, descriptor) in catalog.iter() {
        let mnemonic = match descriptor.field {
            Some(field) => format!("{}[{}]", descriptor.command, field),
            None => descriptor.command.clone(),
        };
        println!(
            "{:<30} {:<18} {:<7} {:<10} {:>6}",
            descriptor.key,
            mnemonic,
            descriptor.direction.as_str(),
            descriptor.value_kind.name(),
            descriptor.scale
        );
    }
}

fn check(config_path: &Path) -> Result<(), RunnerError> {
    let config = ClientConfig::load(config_path)?;
    let catalog = config.build_catalog()?;
    config.validate(&catalog)?;
    let timing = config.timing()?;
    let enabled = config.enabled_mask(&catalog)?;

    println!("{}: OK", config_path.display());
    println!(
        "  entities:          {} of {}",
        enabled.iter().filter(|&&e| e).count(),
        catalog.len()
    );
    println!("  subscriptions:     {}", config.subscriptions.len());
    println!("  update interval:   {:?}", timing.update_interval);
    println!("  response timeout:  {:?}", timing.response_timeout);
    println!("  liveness timeout:  {:?}", timing.liveness_timeout);
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    describe_metrics();

    let result = match cli.command {
        Commands::Run { config, port, baud } => run(&config, port, baud),
        Commands::Catalog => {
            print_catalog();
            Ok(())
        }
        Commands::Check { config } => check(&config),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_run() {
        let cli = Cli::try_parse_from([
            "evse", "-vv", "run", "--config", "evse.yaml", "--port", "/dev/ttyUSB1",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Commands::Run { config, port, baud } => {
                assert_eq!(config, PathBuf::from("evse.yaml"));
                assert_eq!(port.as_deref(), Some("/dev/ttyUSB1"));
                assert_eq!(baud, None);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_check_requires_config() {
        assert!(Cli::try_parse_from(["evse", "check"]).is_err());
    }
}
