//! BLE Service and Characteristic UUIDs.
//!
//! DYJ-V2 firmware exposes the Nordic UART Service. The characteristic UUIDs
//! are listed for reference only: roles are assigned from capability flags,
//! not from these constants.

use uuid::Uuid;

// UART Service (Nordic NUS - Nordic UART Service)
/// Nordic UART Service UUID.
pub const UART_SERVICE_UUID: Uuid = Uuid::from_u128(0x6e40_0001_b5a3_f393_e0a9_e50e24dcca9e);
/// UART RX characteristic UUID (write to device).
pub const UART_RX_UUID: Uuid = Uuid::from_u128(0x6e40_0002_b5a3_f393_e0a9_e50e24dcca9e);
/// UART TX characteristic UUID (notifications from device).
pub const UART_TX_UUID: Uuid = Uuid::from_u128(0x6e40_0003_b5a3_f393_e0a9_e50e24dcca9e);

/// Advertised name prefixes used by DYJ devices and their XIAO dev boards.
pub const DEVICE_NAME_PREFIXES: [&str; 2] = ["DYJ", "XIAO"];
