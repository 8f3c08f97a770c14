//! Error types for ESP-AT command parsing

use thiserror::Error;

/// Errors that can occur while parsing a command line
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// Command is not part of the supported set
    #[error("unknown command: {0}")]
    UnknownCommand(String),

    /// Wrong number of parameters for the command
    #[error("{command}: expected {expected} parameter(s), got {actual}")]
    ParameterCount {
        command: &'static str,
        expected: &'static str,
        actual: usize,
    },

    /// Parameter could not be interpreted
    #[error("invalid parameter {name}: {value:?}")]
    InvalidParameter { name: &'static str, value: String },

    /// Parameter parsed but lies outside its allowed range
    #[error("parameter {name} out of range: {value}")]
    OutOfRange { name: &'static str, value: i64 },

    /// A quoted string was opened but never closed
    #[error("unterminated quoted string")]
    UnterminatedQuote,
}
