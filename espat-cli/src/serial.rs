//! Serial port adapter

use anyhow::{Context, Result};
use espat_detect::PortScanner;
use espat_sim::{run_modem_task, AtModem, ModemTaskCommand};
use tokio::sync::mpsc;
use tokio_serial::SerialPortBuilderExt;
use tracing::info;

/// Attach the modem to `port_name` until the port fails or Ctrl-C
pub async fn run(port_name: &str, baud_rate: u32, modem: AtModem) -> Result<()> {
    let stream = tokio_serial::new(port_name, baud_rate)
        .open_native_async()
        .with_context(|| format!("Failed to open serial port {}", port_name))?;

    info!("Modem attached to {} @ {}", port_name, baud_rate);

    let (cmd_tx, cmd_rx) = mpsc::channel(1);
    let mut task = tokio::spawn(run_modem_task(stream, modem, cmd_rx));

    let result = tokio::select! {
        result = &mut task => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, shutting down");
            let _ = cmd_tx.send(ModemTaskCommand::Shutdown).await;
            task.await
        }
    };

    result
        .context("modem task panicked")?
        .with_context(|| format!("I/O error on {}", port_name))
}

/// Print the serial ports the modem can be attached to
pub fn list_ports() -> Result<()> {
    let ports = PortScanner::new()
        .enumerate_ports()
        .context("Failed to list serial ports")?;

    if ports.is_empty() {
        println!("No serial ports found");
    }
    for port in ports {
        println!("{}", port);
    }
    Ok(())
}
