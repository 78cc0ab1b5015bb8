//! BLE communication module.
//!
//! This module provides the radio-facing side of the link: the
//! [`Transport`] seam, its btleplug implementation, characteristic role
//! assignment and the connection state type.

pub mod characteristics;
pub mod connection;
pub mod platform;
pub mod scanner;
pub mod transport;
pub mod uuids;

pub use characteristics::{
    resolve_roles, CharacteristicDescriptor, CharacteristicProperties, CharacteristicRoles,
};
pub use connection::ConnectionState;
pub use platform::PlatformTransport;
pub use scanner::BleScanner;
pub use transport::{DeviceFilter, DeviceInfo, DisconnectStream, NotificationStream, Transport};
pub use uuids::*;
