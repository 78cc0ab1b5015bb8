//! Connection and diagnostics snapshots.

use chrono::{DateTime, Utc};

use crate::ble::characteristics::CharacteristicDescriptor;
use crate::data::stats::ReceiveStats;
use crate::protocol::mtu::MtuInfo;

/// Whether the link is up and to which device.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ConnectionStatus {
    /// Whether the link is connected.
    pub connected: bool,
    /// Name of the remembered device, empty if none.
    pub device_name: String,
    /// Identifier of the remembered device, empty if none.
    pub device_id: String,
}

/// Bound characteristics and link parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CharacteristicsInfo {
    /// Characteristic commands are written to.
    pub command: CharacteristicDescriptor,
    /// Characteristic telemetry arrives from.
    pub telemetry: CharacteristicDescriptor,
    /// Everything discovered under the primary service, in discovery order.
    pub all_characteristics: Vec<CharacteristicDescriptor>,
    /// Whether telemetry notifications are currently enabled.
    pub notifications_enabled: bool,
    /// Bytes of text waiting for a terminator.
    pub receive_buffer_length: usize,
    /// Inbound traffic counters.
    pub stats: ReceiveStats,
    /// Negotiated link parameters.
    pub mtu: MtuInfo,
}

/// Condensed diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DebugStats {
    /// Whether the link is connected.
    pub is_connected: bool,
    /// Name of the remembered device.
    pub device_name: Option<String>,
    /// Identifier of the remembered device.
    pub device_id: Option<String>,
    /// Notifications received on this connection.
    pub receive_count: u64,
    /// When the last notification arrived.
    pub last_receive_time: Option<DateTime<Utc>>,
    /// Bytes of text waiting for a terminator.
    pub receive_buffer_length: usize,
    /// Whether both roles are bound.
    pub has_characteristics: bool,
    /// Number of characteristics discovered under the primary service.
    pub characteristics_count: usize,
}
