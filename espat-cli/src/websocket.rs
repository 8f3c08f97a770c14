//! WebSocket adapter
//!
//! Every client shares one modem. Text and binary frames from any client are
//! fed to it as host input, and everything the modem writes is broadcast to
//! all connected clients: as a text frame when it is valid UTF-8, otherwise
//! as a binary frame.

use std::future::Future;
use std::net::SocketAddr;

use anyhow::{Context, Result};
use espat_sim::{run_modem_task, AtModem, ModemTaskCommand};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

/// Capacity of the in-memory pipe to the modem task
const BRIDGE_BUF: usize = 8192;

/// Queued output chunks per client before it starts missing output
const OUTPUT_QUEUE: usize = 256;

/// Queued input chunks from all clients
const INPUT_QUEUE: usize = 64;

/// Serve the modem on `bind` until Ctrl-C
pub async fn run(bind: SocketAddr, modem: AtModem) -> Result<()> {
    let listener = TcpListener::bind(bind)
        .await
        .with_context(|| format!("Failed to bind {}", bind))?;
    info!("WebSocket server listening on {}", listener.local_addr()?);

    serve(listener, modem, async {
        let _ = tokio::signal::ctrl_c().await;
        info!("Interrupted, shutting down");
    })
    .await
}

/// Accept clients on `listener` until `shutdown` resolves or the modem stops
pub async fn serve<F>(listener: TcpListener, modem: AtModem, shutdown: F) -> Result<()>
where
    F: Future<Output = ()>,
{
    let (host, modem_side) = tokio::io::duplex(BRIDGE_BUF);
    let (cmd_tx, cmd_rx) = mpsc::channel(1);
    let mut task = tokio::spawn(run_modem_task(modem_side, modem, cmd_rx));
    let (mut from_modem, mut to_modem) = tokio::io::split(host);

    let (input_tx, mut input_rx) = mpsc::channel::<Vec<u8>>(INPUT_QUEUE);
    let (output_tx, _) = broadcast::channel::<Vec<u8>>(OUTPUT_QUEUE);

    tokio::spawn(async move {
        while let Some(data) = input_rx.recv().await {
            if to_modem.write_all(&data).await.is_err() {
                break;
            }
        }
    });

    let broadcaster = output_tx.clone();
    tokio::spawn(async move {
        let mut buf = vec![0u8; BRIDGE_BUF];
        while let Ok(n) = from_modem.read(&mut buf).await {
            if n == 0 {
                break;
            }
            // No clients connected is fine
            let _ = broadcaster.send(buf[..n].to_vec());
        }
    });

    tokio::pin!(shutdown);
    let result = loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        // Subscribe before the handshake so no output is missed
                        let output_rx = output_tx.subscribe();
                        tokio::spawn(handle_client(stream, peer, input_tx.clone(), output_rx));
                    }
                    Err(e) => warn!("Accept failed: {}", e),
                }
            }

            result = &mut task => break result,

            _ = &mut shutdown => {
                let _ = cmd_tx.send(ModemTaskCommand::Shutdown).await;
                break task.await;
            }
        }
    };

    result
        .context("modem task panicked")?
        .context("modem stream failed")
}

async fn handle_client(
    stream: TcpStream,
    peer: SocketAddr,
    input_tx: mpsc::Sender<Vec<u8>>,
    mut output_rx: broadcast::Receiver<Vec<u8>>,
) {
    let ws = match tokio_tungstenite::accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!("WebSocket handshake with {} failed: {}", peer, e);
            return;
        }
    };
    info!("Client {} connected", peer);
    let (mut sink, mut source) = ws.split();

    loop {
        tokio::select! {
            msg = source.next() => {
                let data = match msg {
                    Some(Ok(Message::Text(text))) => text.into_bytes(),
                    Some(Ok(Message::Binary(data))) => data,
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        debug!("Client {} read error: {}", peer, e);
                        break;
                    }
                };
                if input_tx.send(data).await.is_err() {
                    break;
                }
            }

            output = output_rx.recv() => {
                let data = match output {
                    Ok(data) => data,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Client {} missed {} output chunks", peer, skipped);
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                if sink.send(frame_for(data)).await.is_err() {
                    break;
                }
            }
        }
    }

    let _ = sink.close().await;
    info!("Client {} disconnected", peer);
}

/// Text frame for UTF-8 output, binary otherwise
fn frame_for(data: Vec<u8>) -> Message {
    match String::from_utf8(data) {
        Ok(text) => Message::Text(text),
        Err(e) => Message::Binary(e.into_bytes()),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use tokio::sync::oneshot;
    use tokio::time::timeout;
    use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

    type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

    const WAIT: Duration = Duration::from_secs(5);

    async fn read_until(client: &mut Client, suffix: &str) -> String {
        let mut collected = String::new();
        while !collected.ends_with(suffix) {
            let msg = timeout(WAIT, client.next())
                .await
                .expect("timed out waiting for output")
                .expect("connection closed")
                .unwrap();
            match msg {
                Message::Text(text) => collected.push_str(&text),
                other => panic!("unexpected frame {:?}", other),
            }
        }
        collected
    }

    #[test]
    fn test_frame_kind() {
        assert_eq!(frame_for(b"OK\r\n".to_vec()), Message::Text("OK\r\n".into()));
        assert_eq!(
            frame_for(vec![0xFF, 0x00]),
            Message::Binary(vec![0xFF, 0x00])
        );
    }

    #[tokio::test]
    async fn test_clients_share_one_modem() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let server = tokio::spawn(serve(listener, AtModem::default(), async {
            let _ = stop_rx.await;
        }));

        let url = format!("ws://{}", addr);
        let (mut first, _) = connect_async(url.as_str()).await.unwrap();
        let (mut second, _) = connect_async(url.as_str()).await.unwrap();

        first
            .send(Message::Text("AT+CWMODE=3\r\n".into()))
            .await
            .unwrap();
        assert_eq!(read_until(&mut first, "\r\n\r\nOK\r\n").await, "\r\n\r\nOK\r\n");
        assert_eq!(read_until(&mut second, "\r\n\r\nOK\r\n").await, "\r\n\r\nOK\r\n");

        // State set through one client is visible to the other
        second
            .send(Message::Binary(b"AT+CWMODE?\r\n".to_vec()))
            .await
            .unwrap();
        assert_eq!(
            read_until(&mut first, "+CWMODE:3\r\n\r\nOK\r\n").await,
            "\r\n+CWMODE:3\r\n\r\nOK\r\n"
        );

        stop_tx.send(()).unwrap();
        timeout(WAIT, server).await.unwrap().unwrap().unwrap();
    }
}
