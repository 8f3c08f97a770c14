//! Error types for the connection manager

use thiserror::Error;

use crate::connection::LinkId;

/// Errors raised while opening or driving a transport
#[derive(Debug, Error)]
pub enum NetError {
    /// Link ID outside `0..MAX_CONNECTIONS`
    #[error("link {0} out of range")]
    InvalidLink(LinkId),

    /// Every link slot is in use
    #[error("no free link slot")]
    NoFreeSlot,

    /// The requested link already has a live connection
    #[error("link {0} already connected")]
    LinkOccupied(LinkId),

    /// Listening port is held by another socket
    #[error("port {port} is already in use")]
    PortInUse {
        /// Port that failed the availability probe
        port: u16,
    },

    /// Host name did not resolve to any address
    #[error("could not resolve {0}")]
    Resolve(String),

    /// Local bind hint is not a valid IP address
    #[error("invalid local address: {0}")]
    InvalidLocalAddress(String),

    /// Connect or handshake did not finish within the connect timeout
    #[error("timed out connecting to {host}:{port}")]
    Timeout {
        /// Remote host as given
        host: String,
        /// Remote port
        port: u16,
    },

    /// TLS configuration error
    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),

    /// Host name is not usable as a TLS server name
    #[error("invalid TLS server name: {0}")]
    ServerName(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
