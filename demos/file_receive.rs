//! Receive a file pushed by the device and save it to disk
//!
//! Run with: cargo run --example file_receive -- <output-file> [request-command]
//!
//! The request command (default `SEND_FILE`) is sent after the file session
//! is opened. The transfer is considered complete once no chunk has arrived
//! for three seconds.

use dyj_rust_ble::{BleLink, Error, LinkConfig, Result};
use std::io::Write;
use std::time::{Duration, Instant};

const IDLE_TIMEOUT: Duration = Duration::from_secs(3);

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt().with_env_filter("warn").init();

    let mut args = std::env::args().skip(1);
    let output = args.next().ok_or_else(|| Error::InvalidConfig {
        field: "output".to_string(),
        reason: "usage: file_receive <output-file> [request-command]".to_string(),
    })?;
    let request = args.next().unwrap_or_else(|| "SEND_FILE".to_string());

    println!("File Receive");
    println!("============\n");
    println!("Searching for a device...\n");

    let link = BleLink::platform(LinkConfig::default()).await?;
    let device = link.connect().await?;
    println!("Connected to {}", device.name);

    link.start_file_receive(&output);
    link.send(&request).await?;
    println!("Sent {:?}, waiting for data...\n", request);

    let mut last_size = 0;
    let mut last_progress = Instant::now();

    loop {
        tokio::time::sleep(Duration::from_millis(100)).await;

        let status = link.file_receive_status();
        if status.bytes_received != last_size {
            last_size = status.bytes_received;
            last_progress = Instant::now();
            print!("\rReceived: {} bytes", last_size);
            let _ = std::io::stdout().flush();
        }

        if !link.is_connected() {
            println!("\n\nDevice disconnected, transfer aborted.");
            return Ok(());
        }

        if last_size > 0 && last_progress.elapsed() > IDLE_TIMEOUT {
            break;
        }
    }

    let file = link.end_file_receive();
    std::fs::write(&output, &file.data).map_err(|e| Error::Internal(e.to_string()))?;
    println!("\n\nSaved {} ({} bytes)", file.name, file.size());

    link.disconnect().await?;
    Ok(())
}
