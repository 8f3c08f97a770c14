//! ESP-AT Protocol Library
//!
//! Pure, I/O-free pieces of the ESP8266 AT command set as spoken by the
//! simulator:
//!
//! - **Framing**: [`LineCodec`] splits the host byte stream into command lines,
//!   or into fixed-size raw payloads while an `AT+CIPSEND` is outstanding
//! - **Parsing**: [`AtCommand::parse`] turns a line into a typed command with
//!   validated arguments
//! - **Encoding**: [`response`] renders replies and unsolicited notifications
//!   byte-for-byte as the firmware does
//!
//! # Example
//!
//! ```rust
//! use espat_protocol::{AtCommand, Frame, LineCodec};
//!
//! let mut codec = LineCodec::new();
//! codec.push_bytes(b"AT+CWMODE=1\r\n");
//!
//! if let Some(Frame::Line(line)) = codec.next_frame() {
//!     assert_eq!(AtCommand::parse(&line), Ok(AtCommand::SetWifiMode(1)));
//! }
//! ```

pub mod codec;
pub mod command;
pub mod display;
pub mod error;
pub mod params;
pub mod response;

pub use codec::{Frame, LineCodec};
pub use command::{AtCommand, StartParams, TransportKind};
pub use display::HexDump;
pub use error::ParseError;
pub use response::StatusEntry;

/// Number of link slots (link IDs `0..MAX_CONNECTIONS`)
pub const MAX_CONNECTIONS: usize = 5;

/// Largest payload accepted by one `AT+CIPSEND`
pub const MAX_SEND_SIZE: usize = 2048;

/// Server idle timeout applied after reset, in seconds
pub const DEFAULT_SERVER_TIMEOUT_SECS: u16 = 180;

/// Upper bound for `AT+CIPSTO` and the CIPSTART keep-alive, in seconds
pub const MAX_SERVER_TIMEOUT_SECS: u16 = 7200;
