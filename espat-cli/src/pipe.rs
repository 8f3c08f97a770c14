//! stdin/stdout adapter
//!
//! The modem task needs a single duplex stream, so stdin and stdout are
//! bridged onto one in-memory pipe. End of input shuts the modem down.

use anyhow::{Context, Result};
use espat_sim::{run_modem_task, AtModem, ModemTaskCommand};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Capacity of the in-memory pipe
const BRIDGE_BUF: usize = 8192;

/// Serve the modem on the process's standard streams until EOF or Ctrl-C
pub async fn run(modem: AtModem) -> Result<()> {
    let (host, modem_side) = tokio::io::duplex(BRIDGE_BUF);
    let (cmd_tx, cmd_rx) = mpsc::channel(1);
    let mut task = tokio::spawn(run_modem_task(modem_side, modem, cmd_rx));
    let (mut from_modem, mut to_modem) = tokio::io::split(host);

    info!("Serving modem on stdin/stdout");

    tokio::spawn(async move {
        let mut stdin = tokio::io::stdin();
        let mut buf = vec![0u8; 1024];
        loop {
            match stdin.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if to_modem.write_all(&buf[..n]).await.is_err() {
                        break;
                    }
                }
            }
        }
        debug!("stdin closed");
        let _ = to_modem.shutdown().await;
    });

    let output = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        let mut buf = vec![0u8; BRIDGE_BUF];
        while let Ok(n) = from_modem.read(&mut buf).await {
            if n == 0 {
                break;
            }
            if stdout.write_all(&buf[..n]).await.is_err() || stdout.flush().await.is_err() {
                break;
            }
        }
    });

    let result = tokio::select! {
        result = &mut task => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, shutting down");
            let _ = cmd_tx.send(ModemTaskCommand::Shutdown).await;
            task.await
        }
    };
    // Remaining output is flushed once the modem side of the pipe closes
    let _ = output.await;

    result
        .context("modem task panicked")?
        .context("modem stream failed")
}
