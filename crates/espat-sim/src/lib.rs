//! ESP8266 AT Modem Simulation Library
//!
//! This crate provides the command engine of a simulated ESP8266 running AT
//! firmware. Commands arrive as text lines on a host byte stream and are
//! carried out against real sockets:
//!
//! - **AtModem**: the engine, owning the modem configuration and connection table
//! - **run_modem_task**: an actor driving an `AtModem` from any async byte stream
//! - **ModemSettings**: tunables loaded from a JSON file
//!
//! # Example
//!
//! ```rust
//! use espat_sim::AtModem;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let mut modem = AtModem::default();
//! let reply = modem.feed(b"AT+CWMODE?\r\n").await;
//! assert_eq!(reply, b"\r\n+CWMODE:1\r\n\r\nOK\r\n");
//! # }
//! ```

pub mod modem;
pub mod modem_task;
pub mod settings;
pub mod state;

pub use modem::{AtModem, ModemEvent, RawCapture};
pub use modem_task::{run_modem_task, ModemTaskCommand};
pub use settings::{ModemSettings, SettingsError};
pub use state::ModemConfig;
