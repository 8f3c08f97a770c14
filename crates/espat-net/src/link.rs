//! Per-link socket tasks
//!
//! Each live connection is driven by one spawned task that owns the socket.
//! The task forwards inbound bytes to the manager, performs writes requested
//! through its [`Outbound`] channel, and enforces the server idle timeout.
//! Tasks never touch the slot table; every report carries the link's
//! generation so the manager can discard events from a link it has already
//! replaced.

use std::future::pending;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, UdpSocket};
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

use crate::connection::{LinkId, Outbound};
use crate::events::LinkEvent;

/// Read buffer size for stream links
const STREAM_BUF_LEN: usize = 4096;

/// Largest UDP datagram
const DATAGRAM_BUF_LEN: usize = 65_536;

/// Depth of a link's write queue
pub(crate) const OUTBOUND_QUEUE: usize = 16;

/// Identity of the link a task is serving
#[derive(Debug, Clone, Copy)]
pub(crate) struct LinkTag {
    pub link_id: LinkId,
    pub generation: u64,
}

impl LinkTag {
    fn data(&self, data: Vec<u8>) -> LinkEvent {
        LinkEvent::Data {
            link_id: self.link_id,
            generation: self.generation,
            data,
        }
    }

    fn closed(&self) -> LinkEvent {
        LinkEvent::Closed {
            link_id: self.link_id,
            generation: self.generation,
        }
    }

    fn failed(&self, error: impl ToString) -> LinkEvent {
        LinkEvent::Failed {
            link_id: self.link_id,
            generation: self.generation,
            error: error.to_string(),
        }
    }

    fn idle(&self) -> LinkEvent {
        LinkEvent::IdleTimeout {
            link_id: self.link_id,
            generation: self.generation,
        }
    }
}

/// Idle-timeout tracking for server-accepted links
///
/// The timeout in seconds comes from a watch channel so `AT+CIPSTO` applies
/// to links that are already open. Zero disables the timer.
pub(crate) struct IdleTimer {
    timeout_rx: watch::Receiver<u16>,
    deadline: Option<Instant>,
}

impl IdleTimer {
    pub(crate) fn new(mut timeout_rx: watch::Receiver<u16>) -> Self {
        let secs = *timeout_rx.borrow_and_update();
        Self {
            timeout_rx,
            deadline: deadline_after(secs),
        }
    }

    /// Restart the countdown from now
    fn touch(&mut self) {
        self.deadline = deadline_after(*self.timeout_rx.borrow());
    }

    /// Wait for the link to go idle
    ///
    /// Returns `false` early when the timeout setting changes; the countdown
    /// then restarts with the new value.
    async fn wait(&mut self) -> bool {
        let deadline = self.deadline;
        let expire = async move {
            match deadline {
                Some(deadline) => sleep_until(deadline).await,
                None => pending().await,
            }
        };

        tokio::select! {
            _ = expire => true,
            Ok(()) = self.timeout_rx.changed() => {
                self.deadline = deadline_after(*self.timeout_rx.borrow_and_update());
                false
            }
        }
    }
}

fn deadline_after(secs: u16) -> Option<Instant> {
    (secs > 0).then(|| Instant::now() + Duration::from_secs(u64::from(secs)))
}

async fn idle_wait(idle: &mut Option<IdleTimer>) -> bool {
    match idle {
        Some(timer) => timer.wait().await,
        None => pending().await,
    }
}

/// Drive a TCP or TLS link until it closes
pub(crate) async fn run_stream_link<S>(
    mut stream: S,
    tag: LinkTag,
    mut outbound_rx: mpsc::Receiver<Outbound>,
    mut idle: Option<IdleTimer>,
    events: mpsc::UnboundedSender<LinkEvent>,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    debug!("Link {} task started", tag.link_id);
    let mut buffer = vec![0u8; STREAM_BUF_LEN];

    loop {
        tokio::select! {
            result = stream.read(&mut buffer) => {
                match result {
                    Ok(0) => {
                        info!("Link {} closed by peer", tag.link_id);
                        let _ = events.send(tag.closed());
                        break;
                    }
                    Ok(n) => {
                        if let Some(timer) = idle.as_mut() {
                            timer.touch();
                        }
                        let _ = events.send(tag.data(buffer[..n].to_vec()));
                    }
                    Err(e) => {
                        warn!("Read error on link {}: {}", tag.link_id, e);
                        let _ = events.send(tag.failed(e));
                        break;
                    }
                }
            }

            msg = outbound_rx.recv() => {
                let Some(Outbound { data, done }) = msg else {
                    // Record dropped by the manager
                    break;
                };
                let result = async {
                    stream.write_all(&data).await?;
                    stream.flush().await
                }
                .await;
                let _ = done.send(result.is_ok());
                if let Err(e) = result {
                    warn!("Write error on link {}: {}", tag.link_id, e);
                    let _ = events.send(tag.failed(e));
                    break;
                }
            }

            expired = idle_wait(&mut idle) => {
                if !expired {
                    debug!("Link {} idle timeout updated", tag.link_id);
                    continue;
                }
                info!("Link {} timed out after inactivity", tag.link_id);
                let _ = events.send(tag.idle());
                break;
            }
        }
    }

    let _ = stream.shutdown().await;
    debug!("Link {} task ended", tag.link_id);
}

/// Drive a connected UDP socket until its record is dropped
pub(crate) async fn run_datagram_link(
    socket: UdpSocket,
    tag: LinkTag,
    mut outbound_rx: mpsc::Receiver<Outbound>,
    events: mpsc::UnboundedSender<LinkEvent>,
) {
    debug!("Link {} datagram task started", tag.link_id);
    let mut buffer = vec![0u8; DATAGRAM_BUF_LEN];

    loop {
        tokio::select! {
            result = socket.recv(&mut buffer) => {
                match result {
                    Ok(n) => {
                        let _ = events.send(tag.data(buffer[..n].to_vec()));
                    }
                    Err(e) => {
                        warn!("Receive error on link {}: {}", tag.link_id, e);
                        let _ = events.send(tag.failed(e));
                        break;
                    }
                }
            }

            msg = outbound_rx.recv() => {
                let Some(Outbound { data, done }) = msg else {
                    break;
                };
                match socket.send(&data).await {
                    Ok(_) => {
                        let _ = done.send(true);
                    }
                    Err(e) => {
                        let _ = done.send(false);
                        warn!("Send error on link {}: {}", tag.link_id, e);
                        let _ = events.send(tag.failed(e));
                        break;
                    }
                }
            }
        }
    }

    debug!("Link {} datagram task ended", tag.link_id);
}

/// Accept loop for the listening server
///
/// Slot assignment happens in the manager, so accepted streams are handed
/// over as-is.
pub(crate) async fn run_listener(
    listener: TcpListener,
    local_port: u16,
    server: u64,
    events: mpsc::UnboundedSender<LinkEvent>,
) {
    info!("Server listening on port {}", local_port);

    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                debug!("Accepted connection from {}", peer);
                if events
                    .send(LinkEvent::Accepted {
                        stream,
                        peer,
                        local_port,
                        server,
                    })
                    .is_err()
                {
                    break;
                }
            }
            Err(e) => {
                warn!("Accept failed on port {}: {}", local_port, e);
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }
    }

    info!("Server on port {} stopped", local_port);
}
