//! Command-line interface

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Default baud rate of ESP8266 AT firmware
pub const DEFAULT_BAUD: u32 = 115_200;

/// Simulated ESP8266 modem speaking the AT command set over real sockets
#[derive(Parser, Debug)]
#[command(name = "esp-at-sim")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Modem settings file (JSON)
    #[arg(short, long, global = true, env = "ESP_AT_SIM_CONFIG", value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Log filter, e.g. `debug` or `espat_net=trace` (overrides RUST_LOG)
    #[arg(short, long, global = true, env = "ESP_AT_SIM_LOG_LEVEL")]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

/// Where the host talks to the modem
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Serve the modem on stdin/stdout
    Pipe,

    /// Attach the modem to a serial port
    Serial {
        /// Serial port, e.g. /dev/ttyUSB0 or COM3 (lists ports when omitted)
        port: Option<String>,

        /// Baud rate
        #[arg(short, long, default_value_t = DEFAULT_BAUD)]
        baud: u32,
    },

    /// Serve the modem to WebSocket clients
    Websocket {
        /// Address to listen on
        #[arg(short, long, default_value = "0.0.0.0:3000")]
        bind: SocketAddr,
    },

    /// List available serial ports
    ListPorts,
}
