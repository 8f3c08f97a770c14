//! Simulator settings loaded from a JSON file

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors loading a settings file
#[derive(Debug, Error)]
pub enum SettingsError {
    /// File could not be read
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// File is not valid settings JSON
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Tunables of the simulated modem
///
/// Every field is optional in the file; missing fields take their defaults.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ModemSettings {
    /// IP reported by `AT+CIFSR`
    #[serde(default = "default_station_ip")]
    pub station_ip: String,
    /// MAC reported by `AT+CIFSR`
    #[serde(default = "default_station_mac")]
    pub station_mac: String,
    /// Delay between `AT+RST` and the boot banner
    #[serde(default = "default_boot_delay_ms")]
    pub boot_delay_ms: u64,
    /// How long a `AT+CIPSEND` waits for its payload (0 waits forever)
    #[serde(default = "default_raw_capture_timeout_ms")]
    pub raw_capture_timeout_ms: u64,
}

fn default_station_ip() -> String {
    "127.0.0.1".to_string()
}

fn default_station_mac() -> String {
    "11:22:33:44:55:66".to_string()
}

fn default_boot_delay_ms() -> u64 {
    500
}

fn default_raw_capture_timeout_ms() -> u64 {
    10_000
}

impl Default for ModemSettings {
    fn default() -> Self {
        Self {
            station_ip: default_station_ip(),
            station_mac: default_station_mac(),
            boot_delay_ms: default_boot_delay_ms(),
            raw_capture_timeout_ms: default_raw_capture_timeout_ms(),
        }
    }
}

impl ModemSettings {
    /// Load settings from a JSON file
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let text = std::fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Delay before the boot banner
    pub fn boot_delay(&self) -> Duration {
        Duration::from_millis(self.boot_delay_ms)
    }

    /// Payload wait bound, `None` if disabled
    pub fn raw_capture_timeout(&self) -> Option<Duration> {
        (self.raw_capture_timeout_ms > 0).then(|| Duration::from_millis(self.raw_capture_timeout_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_partial_file_uses_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"station_ip": "192.168.4.1", "raw_capture_timeout_ms": 0}}"#).unwrap();

        let settings = ModemSettings::load(file.path()).unwrap();
        assert_eq!(settings.station_ip, "192.168.4.1");
        assert_eq!(settings.station_mac, "11:22:33:44:55:66");
        assert_eq!(settings.boot_delay(), Duration::from_millis(500));
        assert_eq!(settings.raw_capture_timeout(), None);
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = ModemSettings::load(&dir.path().join("absent.json")).unwrap_err();
        assert!(matches!(err, SettingsError::Read { .. }));
    }

    #[test]
    fn test_invalid_json() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{ not json").unwrap();
        let err = ModemSettings::load(file.path()).unwrap_err();
        assert!(matches!(err, SettingsError::Parse { .. }));
    }

    #[test]
    fn test_defaults() {
        let settings = ModemSettings::default();
        assert_eq!(settings.raw_capture_timeout(), Some(Duration::from_secs(10)));
        let json = serde_json::to_string(&settings).unwrap();
        let parsed: ModemSettings = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, settings);
    }
}
