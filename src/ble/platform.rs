//! [`Transport`] implementation backed by btleplug.

use std::collections::HashMap;

use async_trait::async_trait;
use btleplug::api::{Central, CentralEvent, Characteristic, Peripheral as _, WriteType};
use btleplug::platform::Peripheral;
use futures::future;
use futures::stream::StreamExt;
use parking_lot::RwLock;
use tracing::{debug, trace};
use uuid::Uuid;

use crate::ble::characteristics::CharacteristicDescriptor;
use crate::ble::scanner::BleScanner;
use crate::ble::transport::{
    DeviceFilter, DeviceInfo, DisconnectStream, NotificationStream, Transport,
};
use crate::error::{Error, Result};

/// GATT client over the host's first Bluetooth adapter.
pub struct PlatformTransport {
    /// Scanner owning the adapter.
    scanner: BleScanner,
    /// Peripherals handed out by `request_device`, by identifier.
    peripherals: RwLock<HashMap<String, Peripheral>>,
}

impl PlatformTransport {
    /// Open the first host adapter.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TransportUnsupported`] if Bluetooth is not available.
    pub async fn new() -> Result<Self> {
        Ok(Self::with_scanner(BleScanner::new().await?))
    }

    /// Use an existing scanner.
    pub fn with_scanner(scanner: BleScanner) -> Self {
        Self {
            scanner,
            peripherals: RwLock::new(HashMap::new()),
        }
    }

    fn peripheral(&self, device: &DeviceInfo) -> Result<Peripheral> {
        self.peripherals
            .read()
            .get(&device.id)
            .cloned()
            .ok_or_else(|| Error::ConnectionFailed {
                reason: format!("unknown device {}", device.id),
            })
    }

    fn find_characteristic(
        peripheral: &Peripheral,
        descriptor: &CharacteristicDescriptor,
        role: &'static str,
    ) -> Result<Characteristic> {
        peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == descriptor.uuid && c.service_uuid == descriptor.service_uuid)
            .ok_or(Error::CharacteristicNotFound { role })
    }
}

#[async_trait]
impl Transport for PlatformTransport {
    async fn request_device(&self, filter: &DeviceFilter) -> Result<DeviceInfo> {
        let (peripheral, info) = self.scanner.find_device(filter).await?;
        self.peripherals.write().insert(info.id.clone(), peripheral);
        Ok(info)
    }

    async fn connect(&self, device: &DeviceInfo) -> Result<()> {
        let peripheral = self.peripheral(device)?;

        if peripheral.is_connected().await.unwrap_or(false) {
            debug!("Peripheral {} already connected at BLE level", device.id);
        } else {
            peripheral.connect().await?;
        }

        peripheral.discover_services().await?;
        Ok(())
    }

    async fn characteristics(
        &self,
        device: &DeviceInfo,
        service: Uuid,
    ) -> Result<Vec<CharacteristicDescriptor>> {
        let peripheral = self.peripheral(device)?;

        let service = peripheral
            .services()
            .into_iter()
            .find(|s| s.uuid == service)
            .ok_or_else(|| Error::ServiceNotFound {
                uuid: service.to_string(),
            })?;

        let descriptors: Vec<_> = service
            .characteristics
            .iter()
            .map(CharacteristicDescriptor::from)
            .collect();

        debug!(
            "Discovered {} characteristics in service {}",
            descriptors.len(),
            service.uuid
        );

        Ok(descriptors)
    }

    async fn write(
        &self,
        device: &DeviceInfo,
        characteristic: &CharacteristicDescriptor,
        data: &[u8],
    ) -> Result<()> {
        let peripheral = self.peripheral(device)?;
        let target = Self::find_characteristic(&peripheral, characteristic, "command")?;

        let write_type = if characteristic.properties.write {
            WriteType::WithResponse
        } else {
            WriteType::WithoutResponse
        };

        peripheral.write(&target, data, write_type).await?;

        trace!(
            "Wrote {} bytes to characteristic {}",
            data.len(),
            characteristic.uuid
        );

        Ok(())
    }

    async fn subscribe(
        &self,
        device: &DeviceInfo,
        characteristic: &CharacteristicDescriptor,
    ) -> Result<NotificationStream> {
        let peripheral = self.peripheral(device)?;
        let target = Self::find_characteristic(&peripheral, characteristic, "telemetry")?;

        peripheral.subscribe(&target).await?;
        let notifications = peripheral.notifications().await?;

        debug!(
            "Subscribed to notifications from {}",
            characteristic.uuid
        );

        let uuid = target.uuid;
        Ok(Box::pin(notifications.filter_map(move |n| {
            future::ready((n.uuid == uuid).then_some(n.value))
        })))
    }

    async fn unsubscribe(
        &self,
        device: &DeviceInfo,
        characteristic: &CharacteristicDescriptor,
    ) -> Result<()> {
        let peripheral = self.peripheral(device)?;
        let target = Self::find_characteristic(&peripheral, characteristic, "telemetry")?;

        peripheral.unsubscribe(&target).await?;
        debug!(
            "Unsubscribed from notifications from {}",
            characteristic.uuid
        );
        Ok(())
    }

    async fn mtu(&self, device: &DeviceInfo) -> Result<Option<u16>> {
        // btleplug negotiates the ATT MTU internally and does not report it.
        debug!("MTU query not supported for {}", device.id);
        Ok(None)
    }

    async fn disconnect(&self, device: &DeviceInfo) -> Result<()> {
        let peripheral = self.peripheral(device)?;
        peripheral.disconnect().await?;
        Ok(())
    }

    async fn disconnect_events(&self) -> Result<DisconnectStream> {
        let events = self.scanner.adapter().events().await?;

        Ok(Box::pin(events.filter_map(|event| {
            future::ready(match event {
                CentralEvent::DeviceDisconnected(id) => Some(id.to_string()),
                _ => None,
            })
        })))
    }
}
