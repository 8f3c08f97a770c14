//! Connection manager
//!
//! Owns the link slot table and every socket behind it. Socket tasks report
//! activity over an internal channel; [`ConnectionManager::next_event`]
//! applies those reports to the table and yields protocol-level
//! [`ConnectionEvent`]s. Because the table is only mutated from `&mut self`
//! methods, the modem engine can interleave command handling with event
//! processing without locks.

use std::collections::VecDeque;
use std::future::pending;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::{Duration, Instant};

use espat_protocol::{
    response, HexDump, TransportKind, DEFAULT_SERVER_TIMEOUT_SECS, MAX_CONNECTIONS,
};
use socket2::{SockRef, TcpKeepalive};
use tokio::net::{lookup_host, TcpListener, TcpSocket, TcpStream, UdpSocket};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::AbortHandle;
use tokio_rustls::client::TlsStream;
use tracing::{debug, info, warn};

use crate::connection::{Connection, LinkHandle, LinkId, Outbound, PendingSend, Role};
use crate::error::NetError;
use crate::events::{ConnectionEvent, LinkEvent};
use crate::link::{
    run_datagram_link, run_listener, run_stream_link, IdleTimer, LinkTag, OUTBOUND_QUEUE,
};
use crate::{tls, CONNECT_TIMEOUT, DEFAULT_KEEP_ALIVE, SEND_TIMEOUT};

/// Listening server state
#[derive(Debug)]
struct ServerHandle {
    port: u16,
    generation: u64,
    task: AbortHandle,
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Socket produced by a successful dial
enum Transport {
    Tcp(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
    Udp(UdpSocket),
}

/// Multiplexes up to [`MAX_CONNECTIONS`] transports behind link IDs
#[derive(Debug)]
pub struct ConnectionManager {
    slots: [Option<Connection>; MAX_CONNECTIONS],
    events_tx: mpsc::UnboundedSender<LinkEvent>,
    events_rx: mpsc::UnboundedReceiver<LinkEvent>,
    pending: VecDeque<ConnectionEvent>,
    server: Option<ServerHandle>,
    idle_timeout: watch::Sender<u16>,
    send_timeout: Duration,
    next_generation: u64,
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionManager {
    /// Create a manager with no connections and no server
    pub fn new() -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (idle_timeout, _) = watch::channel(DEFAULT_SERVER_TIMEOUT_SECS);
        Self {
            slots: Default::default(),
            events_tx,
            events_rx,
            pending: VecDeque::new(),
            server: None,
            idle_timeout,
            send_timeout: SEND_TIMEOUT,
            next_generation: 1,
        }
    }

    fn generation(&mut self) -> u64 {
        let generation = self.next_generation;
        self.next_generation += 1;
        generation
    }

    fn slot(&self, link_id: LinkId) -> Option<&Connection> {
        self.slots.get(link_id.index())?.as_ref()
    }

    fn slot_mut(&mut self, link_id: LinkId) -> Option<&mut Connection> {
        self.slots.get_mut(link_id.index())?.as_mut()
    }

    /// Record for `link_id` only if it still belongs to `generation`
    fn live_mut(&mut self, link_id: LinkId, generation: u64) -> Option<&mut Connection> {
        self.slot_mut(link_id)
            .filter(|conn| conn.generation == generation)
    }

    fn remove(&mut self, link_id: LinkId) -> Option<Connection> {
        self.slots.get_mut(link_id.index())?.take()
    }

    /// Lowest free link ID
    fn free_slot(&self) -> Result<LinkId, NetError> {
        LinkId::all()
            .find(|id| self.slot(*id).is_none())
            .ok_or(NetError::NoFreeSlot)
    }

    // -------------------------------------------------------------------------
    // Server
    // -------------------------------------------------------------------------

    /// Start listening for TCP connections on `port`
    ///
    /// The port is probed first; `false` means it was in use or the bind
    /// failed. Port 0 picks an ephemeral port (see [`Self::server_port`]).
    pub async fn start_server(&mut self, port: u16) -> bool {
        match self.try_start_server(port).await {
            Ok(bound) => {
                info!("TCP server started on port {}", bound);
                true
            }
            Err(e) => {
                warn!("Failed to start TCP server on port {}: {}", port, e);
                false
            }
        }
    }

    async fn try_start_server(&mut self, port: u16) -> Result<u16, NetError> {
        if let Some(server) = &self.server {
            if port != 0 && server.port == port {
                return Ok(port);
            }
        }
        // A running listener stays up until its replacement is bound
        if !port_available(port).await {
            return Err(NetError::PortInUse { port });
        }

        let listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, port)).await?;
        let bound = listener.local_addr()?.port();
        let generation = self.generation();
        let task = tokio::spawn(run_listener(
            listener,
            bound,
            generation,
            self.events_tx.clone(),
        ));

        // Replacing the listener keeps already accepted links
        self.server = Some(ServerHandle {
            port: bound,
            generation,
            task: task.abort_handle(),
        });
        Ok(bound)
    }

    /// Stop the listener and close every server-accepted link
    pub fn stop_server(&mut self) {
        if let Some(server) = self.server.take() {
            info!("Stopping TCP server on port {}", server.port);
        }

        let accepted: Vec<LinkId> = self
            .all_connections()
            .filter(|conn| conn.role == Role::Server)
            .map(|conn| conn.link_id)
            .collect();
        for link_id in accepted {
            self.close_connection(link_id);
            self.pending
                .push_back(ConnectionEvent::ConnectionClosed { link_id });
        }
    }

    /// Port the server is listening on
    pub fn server_port(&self) -> Option<u16> {
        self.server.as_ref().map(|s| s.port)
    }

    /// Change the idle timeout of server-accepted links (0 disables)
    ///
    /// Open links restart their countdown with the new value.
    pub fn set_server_idle_timeout(&mut self, secs: u16) {
        debug!("Server idle timeout set to {}s", secs);
        self.idle_timeout.send_replace(secs);
    }

    /// Current server idle timeout in seconds
    pub fn server_idle_timeout(&self) -> u16 {
        *self.idle_timeout.borrow()
    }

    // -------------------------------------------------------------------------
    // Client links
    // -------------------------------------------------------------------------

    /// Open an outbound link
    ///
    /// TCP and TLS wait for the connect and handshake, bounded by
    /// [`CONNECT_TIMEOUT`]. UDP only binds and associates the socket with the
    /// peer. `keep_alive_secs` of `Some(0)` disables TCP keep-alive; `None`
    /// uses [`DEFAULT_KEEP_ALIVE`].
    pub async fn dial(
        &mut self,
        link_id: LinkId,
        kind: TransportKind,
        remote_host: &str,
        remote_port: u16,
        keep_alive_secs: Option<u16>,
        local_ip: Option<&str>,
    ) -> bool {
        match self
            .try_dial(link_id, kind, remote_host, remote_port, keep_alive_secs, local_ip)
            .await
        {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    "Link {} {} connect to {}:{} failed: {}",
                    link_id, kind, remote_host, remote_port, e
                );
                false
            }
        }
    }

    async fn try_dial(
        &mut self,
        link_id: LinkId,
        kind: TransportKind,
        remote_host: &str,
        remote_port: u16,
        keep_alive_secs: Option<u16>,
        local_ip: Option<&str>,
    ) -> Result<(), NetError> {
        if link_id.index() >= MAX_CONNECTIONS {
            return Err(NetError::InvalidLink(link_id));
        }
        if self.slot(link_id).is_some() {
            return Err(NetError::LinkOccupied(link_id));
        }
        let local_ip = local_ip
            .map(|ip| {
                ip.parse::<IpAddr>()
                    .map_err(|_| NetError::InvalidLocalAddress(ip.to_string()))
            })
            .transpose()?;

        let keep_alive = match keep_alive_secs {
            Some(secs) => Duration::from_secs(u64::from(secs)),
            None => DEFAULT_KEEP_ALIVE,
        };

        let (transport, remote) = tokio::time::timeout(
            CONNECT_TIMEOUT,
            open_transport(kind, remote_host, remote_port, keep_alive, local_ip),
        )
        .await
        .map_err(|_| NetError::Timeout {
            host: remote_host.to_string(),
            port: remote_port,
        })??;

        let generation = self.generation();
        let tag = LinkTag {
            link_id,
            generation,
        };
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_QUEUE);
        let events = self.events_tx.clone();

        let (task, local_port) = match transport {
            Transport::Tcp(stream) => {
                let local_port = stream.local_addr().ok().map(|a| a.port());
                let task = tokio::spawn(run_stream_link(stream, tag, outbound_rx, None, events));
                (task, local_port)
            }
            Transport::Tls(stream) => {
                let local_port = stream.get_ref().0.local_addr().ok().map(|a| a.port());
                let task = tokio::spawn(run_stream_link(stream, tag, outbound_rx, None, events));
                (task, local_port)
            }
            Transport::Udp(socket) => {
                let local_port = socket.local_addr().ok().map(|a| a.port());
                let task = tokio::spawn(run_datagram_link(socket, tag, outbound_rx, events));
                (task, local_port)
            }
        };

        let mut conn = Connection::new(
            link_id,
            kind,
            Role::Client,
            remote.ip().to_string(),
            remote.port(),
            local_port,
            generation,
        );
        conn.socket = Some(LinkHandle {
            outbound: outbound_tx,
            task: task.abort_handle(),
        });
        self.slots[link_id.index()] = Some(conn);

        info!("Link {} connected ({} to {})", link_id, kind, remote);
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Lookups
    // -------------------------------------------------------------------------

    /// True if `link_id` has a record (open, or closed with unread data)
    pub fn has_connection(&self, link_id: LinkId) -> bool {
        self.slot(link_id).is_some()
    }

    /// Record for `link_id`
    pub fn get_connection(&self, link_id: LinkId) -> Option<&Connection> {
        self.slot(link_id)
    }

    /// All records in link order
    pub fn all_connections(&self) -> impl Iterator<Item = &Connection> {
        self.slots.iter().flatten()
    }

    // -------------------------------------------------------------------------
    // Teardown
    // -------------------------------------------------------------------------

    /// Close and remove a link, discarding buffered data
    ///
    /// Returns `false` if there was no such link. No close event is queued;
    /// the caller reports the close itself.
    pub fn close_connection(&mut self, link_id: LinkId) -> bool {
        match self.remove(link_id) {
            Some(conn) => {
                info!("Link {} closed", link_id);
                drop(conn);
                self.pending.retain(|ev| ev.link_id() != link_id);
                true
            }
            None => false,
        }
    }

    /// Close every link without queuing events
    pub fn close_all(&mut self) {
        for link_id in LinkId::all() {
            self.close_connection(link_id);
        }
    }

    /// Stop the server, drop every link and forget queued events
    pub fn reset(&mut self) {
        self.server = None;
        self.close_all();
        self.pending.clear();
        self.set_server_idle_timeout(DEFAULT_SERVER_TIMEOUT_SECS);
    }

    // -------------------------------------------------------------------------
    // Outbound data
    // -------------------------------------------------------------------------

    /// Limit on how long a write may wait for the peer
    pub fn set_send_timeout(&mut self, timeout: Duration) {
        self.send_timeout = timeout;
    }

    /// Write bytes to a link
    ///
    /// Resolves once the socket write finished; `false` if the link has no
    /// open socket, the write failed, or the peer did not take the bytes
    /// within the send timeout.
    pub async fn send(&self, link_id: LinkId, data: &[u8]) -> bool {
        let Some(outbound) = self
            .slot(link_id)
            .and_then(|conn| conn.socket.as_ref())
            .map(|socket| socket.outbound.clone())
        else {
            return false;
        };

        debug!(
            "Link {} sending {} bytes\n{}",
            link_id,
            data.len(),
            HexDump(data)
        );

        let (done, done_rx) = oneshot::channel();
        let request = Outbound {
            data: data.to_vec(),
            done,
        };
        let write = async move {
            outbound.send(request).await.is_ok() && done_rx.await.unwrap_or(false)
        };
        match tokio::time::timeout(self.send_timeout, write).await {
            Ok(written) => written,
            Err(_) => {
                warn!(
                    "Link {} write stalled for {:?}, giving up",
                    link_id, self.send_timeout
                );
                false
            }
        }
    }

    /// Arm an outbound transfer of `expected` bytes
    ///
    /// Returns `false` if the link does not exist. Arming again replaces the
    /// previous descriptor.
    pub fn begin_pending_send(&mut self, link_id: LinkId, expected: usize) -> bool {
        match self.slot_mut(link_id) {
            Some(conn) => {
                conn.pending_send = Some(PendingSend::new(expected));
                true
            }
            None => false,
        }
    }

    /// Deliver the payload of an armed transfer
    ///
    /// Returns the acknowledgement to show the host, or `None` when nothing
    /// was armed on this link.
    pub async fn complete_pending_send(&mut self, link_id: LinkId, data: &[u8]) -> Option<Vec<u8>> {
        let mut pending_send = self.slot_mut(link_id)?.pending_send.take()?;
        pending_send.payload.extend_from_slice(data);
        pending_send.received = pending_send.payload.len();

        if pending_send.received != pending_send.expected {
            debug!(
                "Link {} payload is {} bytes, {} were announced",
                link_id, pending_send.received, pending_send.expected
            );
        }

        if self.send(link_id, &pending_send.payload).await {
            Some(response::send_ack(pending_send.received))
        } else {
            warn!("Link {} send failed", link_id);
            Some(response::SEND_FAIL.to_vec())
        }
    }

    /// Disarm a transfer without sending anything
    pub fn cancel_pending_send(&mut self, link_id: LinkId) -> bool {
        self.slot_mut(link_id)
            .and_then(|conn| conn.pending_send.take())
            .is_some()
    }

    // -------------------------------------------------------------------------
    // Inbound data
    // -------------------------------------------------------------------------

    /// Bytes buffered for `link_id`
    pub fn peek_pending_length(&self, link_id: LinkId) -> usize {
        self.slot(link_id)
            .map(Connection::pending_receive_len)
            .unwrap_or(0)
    }

    /// Drain up to `len` buffered bytes, oldest first
    ///
    /// `None` if the link has nothing buffered. Draining the last byte of a
    /// link whose socket already closed removes the record and queues
    /// [`ConnectionEvent::ConnectionClosed`].
    pub fn take_pending_receive(&mut self, link_id: LinkId, len: usize) -> Option<Vec<u8>> {
        let conn = self.slot_mut(link_id)?;
        if conn.pending_receive.is_empty() {
            return None;
        }

        let n = len.min(conn.pending_receive.len());
        let chunk: Vec<u8> = conn.pending_receive.drain(..n).collect();

        if conn.pending_receive.is_empty() && !conn.is_open() {
            info!("Link {} drained after close, removing", link_id);
            self.remove(link_id);
            self.pending
                .push_back(ConnectionEvent::ConnectionClosed { link_id });
        }

        Some(chunk)
    }

    // -------------------------------------------------------------------------
    // Events
    // -------------------------------------------------------------------------

    /// Wait for the next connection event
    ///
    /// Cancel safe: socket reports are applied to the table as soon as they
    /// are received, so dropping this future loses nothing.
    pub async fn next_event(&mut self) -> ConnectionEvent {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return event;
            }
            match self.events_rx.recv().await {
                Some(event) => self.apply(event),
                // The manager holds a sender, so the channel never closes
                None => pending::<()>().await,
            }
        }
    }

    /// Next connection event if one is ready
    pub fn try_next_event(&mut self) -> Option<ConnectionEvent> {
        while self.pending.is_empty() {
            let event = self.events_rx.try_recv().ok()?;
            self.apply(event);
        }
        self.pending.pop_front()
    }

    fn apply(&mut self, event: LinkEvent) {
        match event {
            LinkEvent::Accepted {
                stream,
                peer,
                local_port,
                server,
            } => self.accept(stream, peer, local_port, server),

            LinkEvent::Data {
                link_id,
                generation,
                data,
            } => {
                let Some(conn) = self.live_mut(link_id, generation) else {
                    return;
                };
                debug!(
                    "Link {} received {} bytes\n{}",
                    link_id,
                    data.len(),
                    HexDump(&data)
                );
                conn.last_activity = Instant::now();
                conn.pending_receive.extend_from_slice(&data);
                self.pending.push_back(ConnectionEvent::DataAvailable {
                    link_id,
                    len: data.len(),
                });
            }

            LinkEvent::Closed {
                link_id,
                generation,
            } => {
                if self.detach(link_id, generation) {
                    self.pending
                        .push_back(ConnectionEvent::ConnectionClosed { link_id });
                }
            }

            LinkEvent::Failed {
                link_id,
                generation,
                error,
            } => {
                if self.live_mut(link_id, generation).is_none() {
                    return;
                }
                self.detach(link_id, generation);
                self.pending
                    .push_back(ConnectionEvent::ConnectionError { link_id, error });
            }

            LinkEvent::IdleTimeout {
                link_id,
                generation,
            } => {
                if self.live_mut(link_id, generation).is_some() {
                    self.close_connection(link_id);
                    self.pending
                        .push_back(ConnectionEvent::ConnectionClosed { link_id });
                }
            }
        }
    }

    /// Drop a link's socket, removing the record unless data is still buffered
    ///
    /// Returns `true` if the record was removed.
    fn detach(&mut self, link_id: LinkId, generation: u64) -> bool {
        let Some(conn) = self.live_mut(link_id, generation) else {
            return false;
        };
        conn.detach_socket();
        if conn.pending_receive.is_empty() {
            self.remove(link_id);
            true
        } else {
            info!(
                "Link {} socket closed, keeping {} unread bytes",
                link_id,
                conn.pending_receive.len()
            );
            false
        }
    }

    fn accept(&mut self, stream: TcpStream, peer: SocketAddr, local_port: u16, server: u64) {
        if self.server.as_ref().map(|s| s.generation) != Some(server) {
            debug!("Dropping connection from {} accepted by a stopped server", peer);
            return;
        }
        let link_id = match self.free_slot() {
            Ok(link_id) => link_id,
            Err(e) => {
                warn!("Rejecting connection from {}: {}", peer, e);
                return;
            }
        };

        let generation = self.generation();
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_QUEUE);
        let idle = IdleTimer::new(self.idle_timeout.subscribe());
        let task = tokio::spawn(run_stream_link(
            stream,
            LinkTag {
                link_id,
                generation,
            },
            outbound_rx,
            Some(idle),
            self.events_tx.clone(),
        ));

        let mut conn = Connection::new(
            link_id,
            TransportKind::Tcp,
            Role::Server,
            peer.ip().to_string(),
            peer.port(),
            Some(local_port),
            generation,
        );
        conn.socket = Some(LinkHandle {
            outbound: outbound_tx,
            task: task.abort_handle(),
        });
        self.slots[link_id.index()] = Some(conn);

        info!("Link {} accepted from {}", link_id, peer);
        self.pending
            .push_back(ConnectionEvent::ServerConnectionEstablished { link_id });
    }
}

/// Check that `port` can be bound, releasing it immediately
async fn port_available(port: u16) -> bool {
    TcpListener::bind((Ipv4Addr::UNSPECIFIED, port)).await.is_ok()
}

async fn resolve(host: &str, port: u16) -> Result<SocketAddr, NetError> {
    lookup_host((host, port))
        .await?
        .next()
        .ok_or_else(|| NetError::Resolve(host.to_string()))
}

async fn open_transport(
    kind: TransportKind,
    host: &str,
    port: u16,
    keep_alive: Duration,
    local_ip: Option<IpAddr>,
) -> Result<(Transport, SocketAddr), NetError> {
    let remote = resolve(host, port).await?;

    let transport = match kind {
        TransportKind::Tcp => Transport::Tcp(connect_tcp(remote, local_ip, keep_alive).await?),
        TransportKind::Ssl => {
            let connector = tls::insecure_connector()?;
            let name = tls::server_name(host)?;
            let tcp = connect_tcp(remote, local_ip, keep_alive).await?;
            Transport::Tls(Box::new(connector.connect(name, tcp).await?))
        }
        TransportKind::Udp => {
            let local = match (local_ip, remote) {
                (Some(ip), _) => SocketAddr::new(ip, 0),
                (None, SocketAddr::V4(_)) => SocketAddr::new(Ipv4Addr::UNSPECIFIED.into(), 0),
                (None, SocketAddr::V6(_)) => SocketAddr::new(Ipv6Addr::UNSPECIFIED.into(), 0),
            };
            let socket = UdpSocket::bind(local).await?;
            socket.connect(remote).await?;
            Transport::Udp(socket)
        }
    };

    Ok((transport, remote))
}

async fn connect_tcp(
    remote: SocketAddr,
    local_ip: Option<IpAddr>,
    keep_alive: Duration,
) -> Result<TcpStream, NetError> {
    let socket = match remote {
        SocketAddr::V4(_) => TcpSocket::new_v4()?,
        SocketAddr::V6(_) => TcpSocket::new_v6()?,
    };
    if let Some(ip) = local_ip {
        socket.bind(SocketAddr::new(ip, 0))?;
    }
    let stream = socket.connect(remote).await?;

    let sock = SockRef::from(&stream);
    if keep_alive.is_zero() {
        sock.set_keepalive(false)?;
    } else {
        sock.set_tcp_keepalive(&TcpKeepalive::new().with_time(keep_alive))?;
    }
    Ok(stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    async fn expect_event(manager: &mut ConnectionManager) -> ConnectionEvent {
        tokio::time::timeout(Duration::from_secs(5), manager.next_event())
            .await
            .expect("timed out waiting for connection event")
    }

    async fn dial_loopback(manager: &mut ConnectionManager, link: u8) -> TcpStream {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        assert!(
            manager
                .dial(LinkId(link), TransportKind::Tcp, "127.0.0.1", port, None, None)
                .await
        );
        let (peer, _) = listener.accept().await.unwrap();
        peer
    }

    #[tokio::test]
    async fn test_server_slot_allocation_and_reuse() {
        let mut manager = ConnectionManager::new();
        assert!(manager.start_server(0).await);
        let port = manager.server_port().unwrap();

        let mut clients = Vec::new();
        for expected in 0..MAX_CONNECTIONS as u8 {
            clients.push(TcpStream::connect(("127.0.0.1", port)).await.unwrap());
            assert_eq!(
                expect_event(&mut manager).await,
                ConnectionEvent::ServerConnectionEstablished {
                    link_id: LinkId(expected)
                }
            );
        }

        // Table full: the next client is dropped
        let mut rejected = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        let mut buf = [0u8; 1];
        let read = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let _ = manager.try_next_event();
                match tokio::time::timeout(Duration::from_millis(20), rejected.read(&mut buf)).await {
                    Ok(result) => break result,
                    Err(_) => continue,
                }
            }
        })
        .await
        .unwrap();
        assert!(matches!(read, Ok(0) | Err(_)));

        // Freed slot 2 is handed out before any higher ID
        assert!(manager.close_connection(LinkId(2)));
        let _c = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        assert_eq!(
            expect_event(&mut manager).await,
            ConnectionEvent::ServerConnectionEstablished { link_id: LinkId(2) }
        );

        let conn = manager.get_connection(LinkId(2)).unwrap();
        assert_eq!(conn.role, Role::Server);
        assert_eq!(conn.local_port, Some(port));
    }

    #[tokio::test]
    async fn test_port_in_use() {
        let holder = TcpListener::bind((Ipv4Addr::UNSPECIFIED, 0)).await.unwrap();
        let port = holder.local_addr().unwrap().port();

        let mut manager = ConnectionManager::new();
        assert!(!manager.start_server(port).await);
        assert_eq!(manager.server_port(), None);
    }

    #[tokio::test]
    async fn test_failed_restart_keeps_listener() {
        let mut manager = ConnectionManager::new();
        assert!(manager.start_server(0).await);
        let port = manager.server_port().unwrap();

        let holder = TcpListener::bind((Ipv4Addr::UNSPECIFIED, 0)).await.unwrap();
        let busy = holder.local_addr().unwrap().port();
        assert!(!manager.start_server(busy).await);
        assert_eq!(manager.server_port(), Some(port));

        let _client = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        assert_eq!(
            expect_event(&mut manager).await,
            ConnectionEvent::ServerConnectionEstablished { link_id: LinkId(0) }
        );
    }

    #[tokio::test]
    async fn test_tls_handshake_failure() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        // Plain TCP peer that hangs up instead of answering the ClientHello
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                drop(stream);
            }
        });

        let mut manager = ConnectionManager::new();
        assert!(
            !manager
                .dial(LinkId(1), TransportKind::Ssl, "127.0.0.1", port, None, None)
                .await
        );
        assert!(!manager.has_connection(LinkId(1)));
    }

    #[tokio::test]
    async fn test_stalled_write_times_out() {
        let mut manager = ConnectionManager::new();
        manager.set_send_timeout(Duration::from_millis(200));
        // Peer never reads, so the socket buffers fill up
        let _peer = dial_loopback(&mut manager, 0).await;

        let payload = vec![0u8; 64 * 1024 * 1024];
        let sent = tokio::time::timeout(Duration::from_secs(5), manager.send(LinkId(0), &payload))
            .await
            .expect("send was not bounded");
        assert!(!sent);
    }

    #[tokio::test]
    async fn test_dial_send_and_receive() {
        let mut manager = ConnectionManager::new();
        let mut peer = dial_loopback(&mut manager, 0).await;
        assert!(manager.has_connection(LinkId(0)));

        assert!(manager.send(LinkId(0), b"ping").await);
        let mut buf = [0u8; 4];
        peer.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");

        peer.write_all(b"pong").await.unwrap();
        assert_eq!(
            expect_event(&mut manager).await,
            ConnectionEvent::DataAvailable {
                link_id: LinkId(0),
                len: 4
            }
        );
        assert_eq!(manager.peek_pending_length(LinkId(0)), 4);
        assert_eq!(manager.take_pending_receive(LinkId(0), 2), Some(b"po".to_vec()));
        assert_eq!(manager.take_pending_receive(LinkId(0), 10), Some(b"ng".to_vec()));
        assert_eq!(manager.take_pending_receive(LinkId(0), 10), None);
        // Socket still open, so the record stays
        assert!(manager.has_connection(LinkId(0)));
    }

    #[tokio::test]
    async fn test_record_retained_until_drained() {
        let mut manager = ConnectionManager::new();
        let mut peer = dial_loopback(&mut manager, 1).await;

        peer.write_all(b"last words").await.unwrap();
        drop(peer);

        assert!(matches!(
            expect_event(&mut manager).await,
            ConnectionEvent::DataAvailable { .. }
        ));
        // Close arrives, but the buffered bytes keep the record alive
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(manager.try_next_event(), None);
        let conn = manager.get_connection(LinkId(1)).unwrap();
        assert!(!conn.is_open());

        assert_eq!(
            manager.take_pending_receive(LinkId(1), 100),
            Some(b"last words".to_vec())
        );
        assert!(!manager.has_connection(LinkId(1)));
        assert_eq!(
            manager.try_next_event(),
            Some(ConnectionEvent::ConnectionClosed { link_id: LinkId(1) })
        );
    }

    #[tokio::test]
    async fn test_socket_error_keeps_buffered_record() {
        let mut manager = ConnectionManager::new();
        let mut peer = dial_loopback(&mut manager, 2).await;

        peer.write_all(b"partial").await.unwrap();
        assert_eq!(
            expect_event(&mut manager).await,
            ConnectionEvent::DataAvailable {
                link_id: LinkId(2),
                len: 7
            }
        );

        let generation = manager.get_connection(LinkId(2)).unwrap().generation;
        manager
            .events_tx
            .send(LinkEvent::Failed {
                link_id: LinkId(2),
                generation,
                error: "connection reset".into(),
            })
            .unwrap();
        assert_eq!(
            expect_event(&mut manager).await,
            ConnectionEvent::ConnectionError {
                link_id: LinkId(2),
                error: "connection reset".into()
            }
        );

        let conn = manager.get_connection(LinkId(2)).unwrap();
        assert!(!conn.is_open());
        assert_eq!(conn.pending_receive_len(), 7);

        assert_eq!(
            manager.take_pending_receive(LinkId(2), 7),
            Some(b"partial".to_vec())
        );
        assert!(!manager.has_connection(LinkId(2)));
        assert_eq!(
            manager.try_next_event(),
            Some(ConnectionEvent::ConnectionClosed { link_id: LinkId(2) })
        );
    }

    #[tokio::test]
    async fn test_socket_error_without_data_removes_record() {
        let mut manager = ConnectionManager::new();
        let _peer = dial_loopback(&mut manager, 0).await;

        let generation = manager.get_connection(LinkId(0)).unwrap().generation;
        manager
            .events_tx
            .send(LinkEvent::Failed {
                link_id: LinkId(0),
                generation,
                error: "broken pipe".into(),
            })
            .unwrap();
        assert!(matches!(
            expect_event(&mut manager).await,
            ConnectionEvent::ConnectionError { .. }
        ));
        assert!(!manager.has_connection(LinkId(0)));
    }

    #[tokio::test]
    async fn test_peer_close_without_data_removes_record() {
        let mut manager = ConnectionManager::new();
        let peer = dial_loopback(&mut manager, 0).await;
        drop(peer);

        assert_eq!(
            expect_event(&mut manager).await,
            ConnectionEvent::ConnectionClosed { link_id: LinkId(0) }
        );
        assert!(!manager.has_connection(LinkId(0)));
        assert!(!manager.send(LinkId(0), b"x").await);
    }

    #[tokio::test]
    async fn test_duplicate_dial_keeps_existing() {
        let mut manager = ConnectionManager::new();
        let _peer = dial_loopback(&mut manager, 3).await;
        let generation = manager.get_connection(LinkId(3)).unwrap().generation;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        assert!(
            !manager
                .dial(LinkId(3), TransportKind::Tcp, "127.0.0.1", port, None, None)
                .await
        );
        assert_eq!(manager.get_connection(LinkId(3)).unwrap().generation, generation);
    }

    #[tokio::test]
    async fn test_dial_refused() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };
        let mut manager = ConnectionManager::new();
        assert!(
            !manager
                .dial(LinkId(0), TransportKind::Tcp, "127.0.0.1", port, None, None)
                .await
        );
        assert!(!manager.has_connection(LinkId(0)));
    }

    #[tokio::test]
    async fn test_udp_link() {
        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = peer.local_addr().unwrap().port();

        let mut manager = ConnectionManager::new();
        assert!(
            manager
                .dial(LinkId(0), TransportKind::Udp, "127.0.0.1", port, None, None)
                .await
        );
        assert!(manager.send(LinkId(0), b"hello").await);

        let mut buf = [0u8; 16];
        let (n, from) = peer.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"hello");

        peer.send_to(b"world", from).await.unwrap();
        assert_eq!(
            expect_event(&mut manager).await,
            ConnectionEvent::DataAvailable {
                link_id: LinkId(0),
                len: 5
            }
        );
        let conn = manager.get_connection(LinkId(0)).unwrap();
        assert_eq!(conn.kind, TransportKind::Udp);
        assert_eq!(conn.remote_port, port);
    }

    #[tokio::test]
    async fn test_pending_send_lifecycle() {
        let mut manager = ConnectionManager::new();
        let mut peer = dial_loopback(&mut manager, 0).await;

        assert_eq!(manager.complete_pending_send(LinkId(0), b"x").await, None);
        assert!(!manager.begin_pending_send(LinkId(4), 4));

        assert!(manager.begin_pending_send(LinkId(0), 4));
        assert_eq!(
            manager.get_connection(LinkId(0)).unwrap().pending_send().map(|p| p.expected),
            Some(4)
        );
        let ack = manager.complete_pending_send(LinkId(0), b"ping").await;
        assert_eq!(ack, Some(b"\r\nRecv 4 bytes\r\n\r\nSEND OK\r\n".to_vec()));
        assert!(manager.get_connection(LinkId(0)).unwrap().pending_send().is_none());

        let mut buf = [0u8; 4];
        peer.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let mut manager = ConnectionManager::new();
        let _peer = dial_loopback(&mut manager, 0).await;
        assert!(manager.close_connection(LinkId(0)));
        assert!(!manager.close_connection(LinkId(0)));
        assert!(!manager.close_connection(LinkId(4)));
    }

    #[tokio::test]
    async fn test_idle_timeout_closes_server_link() {
        let mut manager = ConnectionManager::new();
        manager.set_server_idle_timeout(1);
        assert!(manager.start_server(0).await);
        let port = manager.server_port().unwrap();

        let _client = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        assert_eq!(
            expect_event(&mut manager).await,
            ConnectionEvent::ServerConnectionEstablished { link_id: LinkId(0) }
        );
        assert_eq!(
            expect_event(&mut manager).await,
            ConnectionEvent::ConnectionClosed { link_id: LinkId(0) }
        );
        assert!(!manager.has_connection(LinkId(0)));
    }

    #[tokio::test]
    async fn test_stop_server_closes_accepted_links_only() {
        let mut manager = ConnectionManager::new();
        let _peer = dial_loopback(&mut manager, 0).await;
        assert!(manager.start_server(0).await);
        let port = manager.server_port().unwrap();
        let _client = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        assert_eq!(
            expect_event(&mut manager).await,
            ConnectionEvent::ServerConnectionEstablished { link_id: LinkId(1) }
        );

        manager.stop_server();
        assert_eq!(manager.server_port(), None);
        assert!(manager.has_connection(LinkId(0)));
        assert!(!manager.has_connection(LinkId(1)));
        assert_eq!(
            manager.try_next_event(),
            Some(ConnectionEvent::ConnectionClosed { link_id: LinkId(1) })
        );
    }

    fn buffered_record(data: &[u8]) -> ConnectionManager {
        let mut manager = ConnectionManager::new();
        let mut conn = Connection::new(
            LinkId(0),
            TransportKind::Tcp,
            Role::Client,
            "127.0.0.1".into(),
            9000,
            None,
            1,
        );
        conn.pending_receive = data.to_vec();
        manager.slots[0] = Some(conn);
        manager
    }

    proptest! {
        #[test]
        fn drain_is_chunk_independent(
            data in proptest::collection::vec(any::<u8>(), 1..256),
            sizes in proptest::collection::vec(1usize..64, 1..64),
        ) {
            let mut manager = buffered_record(&data);
            let mut drained = Vec::new();
            for size in sizes.iter().cycle() {
                match manager.take_pending_receive(LinkId(0), *size) {
                    Some(chunk) => drained.extend(chunk),
                    None => break,
                }
            }
            prop_assert_eq!(drained, data);
            // Socket was never open, so draining removes the record
            prop_assert!(!manager.has_connection(LinkId(0)));
        }
    }
}
