//! The radio-facing seam of the link.
//!
//! [`Transport`] is a pure pass-through over the platform GATT client. It
//! knows nothing about framing, chunking or line reassembly; those live in
//! [`crate::protocol`] and are driven by [`crate::BleLink`].

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures::Stream;
use uuid::Uuid;

use crate::ble::characteristics::CharacteristicDescriptor;
use crate::error::Result;

/// Raw notification payloads from the telemetry characteristic, in arrival order.
pub type NotificationStream = Pin<Box<dyn Stream<Item = Vec<u8>> + Send>>;

/// Identifiers of devices the platform reports as disconnected.
pub type DisconnectStream = Pin<Box<dyn Stream<Item = String> + Send>>;

/// Identity of a selected device.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DeviceInfo {
    /// Platform identifier, stable for the lifetime of the adapter.
    pub id: String,
    /// Advertised local name, empty if the device did not advertise one.
    pub name: String,
}

impl DeviceInfo {
    /// Create a new device identity.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// Criteria for selecting a device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceFilter {
    /// A device advertising any of these services matches.
    pub services: Vec<Uuid>,
    /// A device whose name starts with any of these prefixes matches.
    pub name_prefixes: Vec<String>,
    /// How long the adapter may search before giving up.
    pub timeout: Duration,
}

impl DeviceFilter {
    /// Check an advertisement against the filter.
    pub fn matches(&self, name: Option<&str>, services: &[Uuid]) -> bool {
        let by_service = services.iter().any(|s| self.services.contains(s));
        let by_name = name
            .map(|n| self.name_prefixes.iter().any(|p| n.starts_with(p.as_str())))
            .unwrap_or(false);
        by_service || by_name
    }
}

/// Platform GATT client primitives consumed by the link.
///
/// Implementations must deliver notifications in arrival order and report
/// unsolicited disconnects through [`Transport::disconnect_events`].
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transport {
    /// Find a device matching the filter.
    async fn request_device(&self, filter: &DeviceFilter) -> Result<DeviceInfo>;

    /// Open the GATT connection to a device.
    async fn connect(&self, device: &DeviceInfo) -> Result<()>;

    /// List the characteristics of a primary service, in discovery order.
    async fn characteristics(
        &self,
        device: &DeviceInfo,
        service: Uuid,
    ) -> Result<Vec<CharacteristicDescriptor>>;

    /// Write one chunk to a characteristic.
    async fn write(
        &self,
        device: &DeviceInfo,
        characteristic: &CharacteristicDescriptor,
        data: &[u8],
    ) -> Result<()>;

    /// Enable notifications on a characteristic and return its value feed.
    async fn subscribe(
        &self,
        device: &DeviceInfo,
        characteristic: &CharacteristicDescriptor,
    ) -> Result<NotificationStream>;

    /// Disable notifications on a characteristic.
    async fn unsubscribe(
        &self,
        device: &DeviceInfo,
        characteristic: &CharacteristicDescriptor,
    ) -> Result<()>;

    /// Query the ATT MTU. `Ok(None)` means the platform cannot report it.
    async fn mtu(&self, device: &DeviceInfo) -> Result<Option<u16>>;

    /// Close the GATT connection.
    async fn disconnect(&self, device: &DeviceInfo) -> Result<()>;

    /// Feed of platform-initiated disconnects.
    async fn disconnect_events(&self) -> Result<DisconnectStream>;
}
