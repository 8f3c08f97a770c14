//! Modem configuration state

use espat_protocol::DEFAULT_SERVER_TIMEOUT_SECS;

/// WiFi role reported by `AT+CWMODE` for access-point-only operation
pub const WIFI_MODE_SOFTAP: u8 = 2;

/// Configuration owned by the modem engine
///
/// Mutated only by command handlers and restored to defaults by `AT+RST`.
/// The reported IP and MAC survive a reset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModemConfig {
    /// Associated with an access point (`AT+CWJAP`)
    pub wifi_connected: bool,
    /// WiFi role: 0 off, 1 station, 2 soft-AP, 3 both
    pub wifi_mode: u8,
    /// Transmission mode (0 normal; passthrough is not simulated)
    pub transmission_mode: u8,
    /// Multiple connections enabled (`AT+CIPMUX=1`)
    pub multiplex: bool,
    /// Listening server running
    pub server_active: bool,
    /// Listening port of the server
    pub server_port: u16,
    /// SSID given to `AT+CWJAP`
    pub ssid: String,
    /// Passphrase given to `AT+CWJAP`
    pub password: String,
    /// Station IP reported by `AT+CIFSR`
    pub ip: String,
    /// Station MAC reported by `AT+CIFSR`
    pub mac: String,
    /// Idle timeout of server-accepted links, seconds
    pub server_timeout: u16,
}

impl ModemConfig {
    /// Power-on configuration
    pub fn new(ip: impl Into<String>, mac: impl Into<String>) -> Self {
        Self {
            wifi_connected: false,
            wifi_mode: 1,
            transmission_mode: 0,
            multiplex: false,
            server_active: false,
            server_port: 0,
            ssid: String::new(),
            password: String::new(),
            ip: ip.into(),
            mac: mac.into(),
            server_timeout: DEFAULT_SERVER_TIMEOUT_SECS,
        }
    }

    /// Restore defaults, keeping the station addressing
    pub fn reset(&mut self) {
        *self = Self::new(std::mem::take(&mut self.ip), std::mem::take(&mut self.mac));
    }

    /// True in access-point-only mode, where station commands are refused
    pub fn is_softap_only(&self) -> bool {
        self.wifi_mode == WIFI_MODE_SOFTAP
    }
}
