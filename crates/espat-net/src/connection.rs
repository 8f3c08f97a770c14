//! Connection records and link addressing

use std::fmt;
use std::time::Instant;

use espat_protocol::{TransportKind, MAX_CONNECTIONS};
use tokio::sync::{mpsc, oneshot};
use tokio::task::AbortHandle;

/// Protocol-level address of one multiplexed connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LinkId(pub u8);

impl LinkId {
    /// Validate a raw link number
    pub fn new(id: u8) -> Option<Self> {
        ((id as usize) < MAX_CONNECTIONS).then_some(Self(id))
    }

    /// Slot index of this link
    pub fn index(&self) -> usize {
        self.0 as usize
    }

    /// All link IDs in slot order
    pub fn all() -> impl Iterator<Item = LinkId> {
        (0..MAX_CONNECTIONS as u8).map(LinkId)
    }
}

impl fmt::Display for LinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How a connection came to exist
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Accepted by the local listening server
    Server,
    /// Dialed by `AT+CIPSTART`
    Client,
}

/// Outbound transfer armed by `AT+CIPSEND`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingSend {
    /// Byte count promised to the host (after clamping)
    pub expected: usize,
    /// Bytes collected so far
    pub received: usize,
    /// Collected payload
    pub payload: Vec<u8>,
}

impl PendingSend {
    pub(crate) fn new(expected: usize) -> Self {
        Self {
            expected,
            received: 0,
            payload: Vec::with_capacity(expected),
        }
    }
}

/// Write request handed to a link task
#[derive(Debug)]
pub(crate) struct Outbound {
    pub data: Vec<u8>,
    /// Resolves to whether the write reached the socket
    pub done: oneshot::Sender<bool>,
}

/// Owning handle to a link's socket task
///
/// Dropping the handle aborts the task, which closes the socket.
#[derive(Debug)]
pub(crate) struct LinkHandle {
    pub outbound: mpsc::Sender<Outbound>,
    pub task: AbortHandle,
}

impl Drop for LinkHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// One multiplexed transport endpoint
///
/// The record outlives its socket while inbound bytes remain unread, so the
/// host can still drain them with `AT+CIPRECVDATA` after the peer hangs up.
#[derive(Debug)]
pub struct Connection {
    /// Slot this connection occupies
    pub link_id: LinkId,
    /// Transport type
    pub kind: TransportKind,
    /// Accepted or dialed
    pub role: Role,
    /// Remote IP address
    pub remote_addr: String,
    /// Remote port
    pub remote_port: u16,
    /// Local port of the socket, if known
    pub local_port: Option<u16>,
    /// Last time bytes arrived from the peer
    pub last_activity: Instant,
    pub(crate) socket: Option<LinkHandle>,
    pub(crate) pending_send: Option<PendingSend>,
    pub(crate) pending_receive: Vec<u8>,
    pub(crate) generation: u64,
}

impl Connection {
    pub(crate) fn new(
        link_id: LinkId,
        kind: TransportKind,
        role: Role,
        remote_addr: String,
        remote_port: u16,
        local_port: Option<u16>,
        generation: u64,
    ) -> Self {
        Self {
            link_id,
            kind,
            role,
            remote_addr,
            remote_port,
            local_port,
            last_activity: Instant::now(),
            socket: None,
            pending_send: None,
            pending_receive: Vec::new(),
            generation,
        }
    }

    /// True while the underlying socket is open
    pub fn is_open(&self) -> bool {
        self.socket.is_some()
    }

    /// Bytes waiting to be drained
    pub fn pending_receive_len(&self) -> usize {
        self.pending_receive.len()
    }

    /// Armed outbound transfer, if any
    pub fn pending_send(&self) -> Option<&PendingSend> {
        self.pending_send.as_ref()
    }

    /// Close the socket while keeping buffered data
    pub(crate) fn detach_socket(&mut self) {
        self.socket = None;
    }
}
