//! Serial Port Detection for the ESP-AT Simulator
//!
//! Lists the serial ports the simulator can be attached to, tagging the
//! USB-UART bridges commonly found on ESP8266 boards.
//!
//! # Example
//!
//! ```rust,no_run
//! use espat_detect::PortScanner;
//!
//! for port in PortScanner::new().enumerate_ports()? {
//!     println!("{}", port);
//! }
//! # Ok::<(), espat_detect::DetectError>(())
//! ```

pub mod error;
pub mod scanner;
pub mod usb_ids;

pub use error::DetectError;
pub use scanner::{PortScanner, ScannerConfig, SerialPortInfo, UsbDetails};
