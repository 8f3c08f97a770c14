//! Modem actor task
//!
//! Owns an [`AtModem`] and a host byte stream. One `select!` loop reads host
//! input, writes command responses, and writes unsolicited notifications as
//! soon as they are ready, so socket activity reaches the host even while it
//! is idle.

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::modem::AtModem;

/// Host read buffer size
const READ_BUF_LEN: usize = 4096;

/// Commands that can be sent to a running modem task
#[derive(Debug, Clone)]
pub enum ModemTaskCommand {
    /// Stop the server, close every link and end the task
    Shutdown,
}

/// Run the modem actor until the host stream closes or shutdown is requested
///
/// Dropping every sender of `cmd_rx` also ends the task. The modem is shut
/// down on every exit path.
pub async fn run_modem_task<S>(
    mut stream: S,
    mut modem: AtModem,
    mut cmd_rx: mpsc::Receiver<ModemTaskCommand>,
) -> io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; READ_BUF_LEN];
    info!("Starting modem task");

    let result = loop {
        tokio::select! {
            result = stream.read(&mut buf) => {
                match result {
                    Ok(0) => {
                        debug!("Host stream closed");
                        break Ok(());
                    }
                    Ok(n) => {
                        let reply = modem.feed(&buf[..n]).await;
                        if let Err(e) = write_out(&mut stream, &reply).await {
                            warn!("Host write failed: {}", e);
                            break Err(e);
                        }
                    }
                    Err(e) => {
                        warn!("Host stream error: {}", e);
                        break Err(e);
                    }
                }
            }

            notification = modem.next_notification() => {
                if let Err(e) = write_out(&mut stream, &notification).await {
                    warn!("Host write failed: {}", e);
                    break Err(e);
                }
            }

            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(ModemTaskCommand::Shutdown) => {
                        info!("Modem task received shutdown");
                        break Ok(());
                    }
                    None => {
                        debug!("Modem task command channel closed");
                        break Ok(());
                    }
                }
            }
        }
    };

    modem.shutdown();
    info!("Modem task stopped");
    result
}

async fn write_out<S>(stream: &mut S, data: &[u8]) -> io::Result<()>
where
    S: AsyncWrite + Unpin,
{
    if data.is_empty() {
        return Ok(());
    }
    stream.write_all(data).await?;
    stream.flush().await
}
