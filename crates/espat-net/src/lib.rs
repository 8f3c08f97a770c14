//! ESP-AT Connection Manager
//!
//! This crate owns the network side of the modem simulator: up to
//! [`MAX_CONNECTIONS`] TCP, UDP or TLS transports addressed by small integer
//! link IDs, plus an optional listening TCP server.
//!
//! # Architecture
//!
//! - [`ConnectionManager`] holds the slot table of [`Connection`] records and
//!   is the only code that mutates it
//! - Every open socket is driven by its own spawned task, which reports reads,
//!   closes, errors and idle timeouts back over a channel
//! - Inbound bytes are never pushed to the host directly. They accumulate in
//!   the record's receive buffer and are drained on request
//!   (`AT+CIPRECVDATA`), which is the passive receive mode of the firmware
//!
//! # Example
//!
//! ```rust,no_run
//! use espat_net::{ConnectionEvent, ConnectionManager, LinkId};
//! use espat_protocol::TransportKind;
//!
//! # async fn demo() {
//! let mut manager = ConnectionManager::new();
//! if manager
//!     .dial(LinkId(0), TransportKind::Tcp, "127.0.0.1", 9000, None, None)
//!     .await
//! {
//!     manager.send(LinkId(0), b"ping").await;
//!     if let ConnectionEvent::DataAvailable { link_id, len } = manager.next_event().await {
//!         let data = manager.take_pending_receive(link_id, len);
//!         println!("{:?}", data);
//!     }
//! }
//! # }
//! ```

pub mod connection;
pub mod error;
pub mod events;
mod link;
pub mod manager;
pub mod tls;

use std::time::Duration;

pub use connection::{Connection, LinkId, PendingSend, Role};
pub use error::NetError;
pub use events::ConnectionEvent;
pub use manager::ConnectionManager;

pub use espat_protocol::MAX_CONNECTIONS;

/// Upper bound on TCP connect plus TLS handshake
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Upper bound on a single socket write before `SEND FAIL`
pub const SEND_TIMEOUT: Duration = Duration::from_secs(10);

/// TCP keep-alive idle time when `AT+CIPSTART` gives none
pub const DEFAULT_KEEP_ALIVE: Duration = Duration::from_secs(60);
