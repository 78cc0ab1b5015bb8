//! Interactive console: type a line to send it, received lines are printed
//!
//! Run with: cargo run --example uart_console
//!
//! Console commands:
//!   /test        send the BASE_INFO command
//!   /mtu         renegotiate and print the MTU
//!   /stats       print link diagnostics
//!   /restart     restart telemetry notifications
//!   /reconnect   reconnect to the last device
//!   /quit        disconnect and exit

use dyj_rust_ble::{BleLink, LinkConfig, Result};
use tokio::io::{AsyncBufReadExt, BufReader};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("dyj_rust_ble=info".parse().unwrap()),
        )
        .init();

    println!("DYJ UART Console");
    println!("================\n");
    println!("Searching for a device...\n");

    let link = BleLink::platform(LinkConfig::default()).await?;

    let _connection = link.on_connection_change(|connected, name| {
        if connected {
            println!("* connected to {}", name);
        } else {
            println!("* disconnected");
        }
    });
    let _messages = link.on_message(|line| println!("< {}", line));
    let _errors = link.on_error(|context| eprintln!("! {}", context));

    let device = link.connect().await?;
    let mtu = link.mtu_info();
    println!(
        "Device: {} ({}), chunk size {} bytes\n",
        device.name, device.id, mtu.max_chunk_size
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Ok(Some(line)) = lines.next_line().await {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let result = match line {
            "/quit" => break,
            "/test" => link.send_test_command().await,
            "/mtu" => link.renegotiate_mtu().await.map(|info| {
                println!(
                    "MTU {} (negotiated: {}), chunk size {}",
                    info.mtu, info.negotiated, info.max_chunk_size
                );
            }),
            "/stats" => {
                println!("{:#?}", link.debug_stats());
                Ok(())
            }
            "/restart" => link.restart_notifications().await,
            "/reconnect" => link.reconnect().await.map(|_| ()),
            message => link.send(message).await.map(|_| println!("> {}", message)),
        };

        if let Err(e) = result {
            eprintln!("Error: {}", e);
        }
    }

    link.disconnect().await?;
    Ok(())
}
