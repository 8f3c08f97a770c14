//! Serial port enumeration
//!
//! Ports are reported USB bridges first, so the adapter an ESP board is
//! plugged into usually heads the list.

use std::fmt;

use serialport::{available_ports, SerialPortType, UsbPortInfo};
use tracing::{debug, info};

use crate::error::DetectError;
use crate::usb_ids::bridge_name;

/// USB identity of a port
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsbDetails {
    pub vid: u16,
    pub pid: u16,
    pub serial_number: Option<String>,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
}

impl From<&UsbPortInfo> for UsbDetails {
    fn from(usb: &UsbPortInfo) -> Self {
        Self {
            vid: usb.vid,
            pid: usb.pid,
            serial_number: usb.serial_number.clone(),
            manufacturer: usb.manufacturer.clone(),
            product: usb.product.clone(),
        }
    }
}

/// A port the modem can be attached to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialPortInfo {
    /// OS device name (e.g., /dev/ttyUSB0, COM3)
    pub port: String,
    /// Present for USB serial adapters
    pub usb: Option<UsbDetails>,
}

impl SerialPortInfo {
    fn new(port: String, port_type: &SerialPortType) -> Self {
        let usb = match port_type {
            SerialPortType::UsbPort(usb) => Some(UsbDetails::from(usb)),
            _ => None,
        };
        Self { port, usb }
    }

    /// Bridge chip, if this is a known USB-UART adapter
    pub fn bridge(&self) -> Option<&'static str> {
        self.usb.as_ref().and_then(|usb| bridge_name(usb.vid, usb.pid))
    }
}

impl fmt::Display for SerialPortInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.port)?;
        let Some(usb) = &self.usb else {
            return Ok(());
        };
        match (usb.product.as_deref(), self.bridge()) {
            (Some(product), Some(chip)) => write!(f, "  {} ({})", product, chip)?,
            (Some(label), None) | (None, Some(label)) => write!(f, "  {}", label)?,
            (None, None) => {}
        }
        write!(f, " [{:04X}:{:04X}]", usb.vid, usb.pid)
    }
}

/// Options for [`PortScanner`]
#[derive(Debug, Clone)]
pub struct ScannerConfig {
    /// Port names containing any of these are hidden
    pub skip_patterns: Vec<String>,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            // macOS exposes paired Bluetooth devices and a debug console as ttys
            skip_patterns: vec!["Bluetooth".into(), "debug".into()],
        }
    }
}

/// Lists serial ports
#[derive(Debug, Default)]
pub struct PortScanner {
    config: ScannerConfig,
}

impl PortScanner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: ScannerConfig) -> Self {
        Self { config }
    }

    /// Enumerate available ports, USB adapters first
    pub fn enumerate_ports(&self) -> Result<Vec<SerialPortInfo>, DetectError> {
        let mut ports: Vec<SerialPortInfo> = available_ports()?
            .into_iter()
            .map(|p| SerialPortInfo::new(p.port_name, &p.port_type))
            .filter(|p| self.keep(p))
            .collect();
        ports.sort_by_key(|p| (p.usb.is_none(), p.port.clone()));

        info!("Found {} serial port(s)", ports.len());
        Ok(ports)
    }

    fn keep(&self, port: &SerialPortInfo) -> bool {
        let skipped = self
            .config
            .skip_patterns
            .iter()
            .any(|pattern| port.port.contains(pattern.as_str()));
        if skipped {
            debug!("Skipping {}", port.port);
        }
        !skipped
    }
}
