// Allow unusual byte groupings for UUIDs which have standard format
#![allow(clippy::unusual_byte_groupings)]

//! # dyj-rust-ble
//!
//! A cross-platform Rust library for exchanging text and files with DYJ-V2
//! embedded devices over Bluetooth Low Energy.
//!
//! The device exposes a Nordic UART style service with one writable
//! *command* characteristic and one notifying *telemetry* characteristic.
//! Text travels in both directions as `\n` terminated lines; the device can
//! additionally push binary file data, marked by a leading `0x00` byte on
//! each notification.
//!
//! ## Features
//!
//! - **Device Selection**: Find a device by advertised service and name prefix
//! - **Role Resolution**: Pick command and telemetry characteristics by their properties
//! - **MTU-aware Sending**: Split messages into paced chunks sized for the link
//! - **Line Reassembly**: Rebuild messages from arbitrarily fragmented notifications
//! - **File Receive**: Accumulate marked binary chunks interleaved with text
//! - **Reconnect**: Bring the link back up with the last selected device
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use dyj_rust_ble::{BleLink, LinkConfig, LinkEvent, Result};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let link = BleLink::platform(LinkConfig::default()).await?;
//!     let mut events = link.subscribe();
//!
//!     let device = link.connect().await?;
//!     println!("Connected to {}", device.name);
//!
//!     link.send("BASE_INFO").await?;
//!
//!     while let Ok(event) = events.recv().await {
//!         if let LinkEvent::Message(line) = event {
//!             println!("< {}", line);
//!             break;
//!         }
//!     }
//!
//!     link.disconnect().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Platform Notes
//!
//! ### macOS
//! Requires Bluetooth permission. Add `NSBluetoothAlwaysUsageDescription`
//! to your Info.plist for bundled apps.
//!
//! ### Linux
//! Requires BlueZ. User may need to be in the `bluetooth` group.
//!
//! ### Windows
//! Requires Windows 10 or later with Bluetooth LE support.
//!
//! The platform transport cannot read the negotiated ATT MTU, so links over
//! it always use the configured chunk size floor.
//!
//! ## Feature Flags
//!
//! - `serde`: Enable serialization of data types and TOML configuration loading

// Public modules
pub mod ble;
pub mod config;
pub mod data;
pub mod error;
pub mod events;
pub mod link;
pub mod protocol;
pub mod utils;

// Re-exports for convenience
pub use config::LinkConfig;
pub use error::{Error, Result};
pub use events::{CallbackHandle, LinkEvent};
pub use link::{BleLink, TEST_COMMAND};

// Re-export commonly used types from submodules
pub use ble::connection::ConnectionState;
pub use ble::platform::PlatformTransport;
pub use ble::transport::{DeviceFilter, DeviceInfo, Transport};
pub use ble::{CharacteristicDescriptor, CharacteristicProperties, CharacteristicRoles};
pub use data::{CharacteristicsInfo, ConnectionStatus, DebugStats, ReceiveStats};
pub use protocol::{
    FileChunk, FileReceiveStatus, MtuInfo, OrphanChunkPolicy, ReceivedFile,
};
