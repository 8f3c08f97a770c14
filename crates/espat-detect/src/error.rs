//! Error types for port detection

use thiserror::Error;

/// Errors that can occur while listing ports
#[derive(Debug, Error)]
pub enum DetectError {
    /// Failed to enumerate serial ports
    #[error("failed to enumerate ports: {0}")]
    EnumerationFailed(#[from] serialport::Error),
}
