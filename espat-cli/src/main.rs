//! ESP-AT Modem Simulator
//!
//! Serves a simulated ESP8266 running AT firmware to a host program over
//! stdin/stdout, a serial port, or WebSocket. Connections the host opens with
//! `AT+CIPSTART` and `AT+CIPSERVER` are real sockets on this machine.
//!
//! # Usage
//!
//! ```bash
//! # Drive the modem from a pipe
//! printf 'AT\r\nAT+GMR\r\n' | esp-at-sim pipe
//!
//! # Pretend to be the ESP module on a USB-UART adapter
//! esp-at-sim serial /dev/ttyUSB0 --baud 115200
//!
//! # Browser or test harness clients
//! esp-at-sim websocket --bind 127.0.0.1:3000
//!
//! # Verbose logging (always on stderr)
//! RUST_LOG=debug esp-at-sim pipe
//! ```

mod cli;
mod pipe;
mod serial;
mod websocket;

use std::path::Path;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use espat_sim::{AtModem, ModemSettings};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use cli::{Cli, Command};

/// Filter used when neither `--log-level` nor `RUST_LOG` is set
const DEFAULT_LOG_FILTER: &str =
    "esp_at_sim=info,espat_protocol=info,espat_net=info,espat_sim=info,espat_detect=info";

/// How long blocked stdin reads may delay exit
const RUNTIME_SHUTDOWN_GRACE: Duration = Duration::from_millis(250);

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = init_logging(cli.log_level.as_deref()) {
        eprintln!("esp-at-sim: {:#}", e);
        return ExitCode::FAILURE;
    }

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to start async runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };
    let result = runtime.block_on(run(cli));
    // Tokio's stdin reader sits on a blocking thread that never returns by itself
    runtime.shutdown_timeout(RUNTIME_SHUTDOWN_GRACE);

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

/// Install the stderr log subscriber
fn init_logging(level: Option<&str>) -> Result<()> {
    let filter = match level {
        Some(directives) => EnvFilter::try_new(directives)
            .with_context(|| format!("Invalid log filter {:?}", directives))?,
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init()
        .context("Failed to install log subscriber")
}

fn load_settings(path: Option<&Path>) -> Result<ModemSettings> {
    match path {
        Some(path) => {
            let settings = ModemSettings::load(path)?;
            info!("Loaded settings from {}", path.display());
            Ok(settings)
        }
        None => Ok(ModemSettings::default()),
    }
}

async fn run(cli: Cli) -> Result<()> {
    if cli.command == Command::ListPorts {
        return serial::list_ports();
    }

    let modem = AtModem::new(load_settings(cli.config.as_deref())?);
    info!("Starting esp-at-sim {}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Command::Pipe => pipe::run(modem).await,
        Command::Serial {
            port: Some(port),
            baud,
        } => serial::run(&port, baud, modem).await,
        Command::Serial { port: None, .. } => {
            serial::list_ports()?;
            bail!("No serial port given")
        }
        Command::Websocket { bind } => websocket::run(bind, modem).await,
        Command::ListPorts => serial::list_ports(),
    }
}
