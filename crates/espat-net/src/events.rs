//! Events flowing out of the connection manager
//!
//! Socket tasks report raw activity as [`LinkEvent`]s on an internal channel.
//! The manager applies them to its slot table and queues the protocol-level
//! [`ConnectionEvent`]s that the modem engine turns into notifications.

use std::net::SocketAddr;

use tokio::net::TcpStream;

use crate::connection::LinkId;

/// Connection activity reported to the modem engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// The listening server accepted a connection
    ServerConnectionEstablished {
        /// Slot assigned to the new connection
        link_id: LinkId,
    },

    /// Bytes were appended to a link's receive buffer
    DataAvailable {
        /// Link the bytes arrived on
        link_id: LinkId,
        /// Size of this chunk
        len: usize,
    },

    /// A link was closed and its record removed
    ConnectionClosed {
        /// Link that closed
        link_id: LinkId,
    },

    /// A socket failed on an established link
    ConnectionError {
        /// Link whose socket failed
        link_id: LinkId,
        /// Error description
        error: String,
    },
}

impl ConnectionEvent {
    /// Link the event refers to
    pub fn link_id(&self) -> LinkId {
        match self {
            ConnectionEvent::ServerConnectionEstablished { link_id }
            | ConnectionEvent::DataAvailable { link_id, .. }
            | ConnectionEvent::ConnectionClosed { link_id }
            | ConnectionEvent::ConnectionError { link_id, .. } => *link_id,
        }
    }
}

/// Raw activity from listener and link tasks
#[derive(Debug)]
pub(crate) enum LinkEvent {
    /// Listener accepted a stream; a slot has not been assigned yet
    Accepted {
        stream: TcpStream,
        peer: SocketAddr,
        local_port: u16,
        /// Generation of the listener that accepted it
        server: u64,
    },
    /// Bytes read from a link
    Data {
        link_id: LinkId,
        generation: u64,
        data: Vec<u8>,
    },
    /// Peer closed the link
    Closed { link_id: LinkId, generation: u64 },
    /// Read or write failed
    Failed {
        link_id: LinkId,
        generation: u64,
        error: String,
    },
    /// Server link saw no inbound bytes for the idle timeout
    IdleTimeout { link_id: LinkId, generation: u64 },
}
