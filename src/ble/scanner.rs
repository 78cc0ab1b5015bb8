//! BLE scanning functionality.
//!
//! Finds a DYJ device through the first Bluetooth adapter of the host.

use btleplug::api::{Central, CentralEvent, Manager as _, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::stream::StreamExt;
use tracing::{debug, info, trace, warn};

use crate::ble::transport::{DeviceFilter, DeviceInfo};
use crate::error::{Error, Result};

/// BLE scanner bound to one host adapter.
pub struct BleScanner {
    /// The BLE adapter to use for scanning.
    adapter: Adapter,
}

impl BleScanner {
    /// Create a new BLE scanner on the first available adapter.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TransportUnsupported`] if Bluetooth is not available.
    pub async fn new() -> Result<Self> {
        let manager = Manager::new()
            .await
            .map_err(|_e| Error::TransportUnsupported)?;

        let adapters = manager
            .adapters()
            .await
            .map_err(|_e| Error::TransportUnsupported)?;

        let adapter = adapters
            .into_iter()
            .next()
            .ok_or(Error::TransportUnsupported)?;

        info!(
            "Using Bluetooth adapter: {:?}",
            adapter.adapter_info().await.ok()
        );

        Ok(Self { adapter })
    }

    /// Create a new BLE scanner with a specific adapter.
    pub fn with_adapter(adapter: Adapter) -> Self {
        Self { adapter }
    }

    /// Get the underlying adapter.
    pub fn adapter(&self) -> &Adapter {
        &self.adapter
    }

    /// Scan until a peripheral matches the filter or the filter's timeout elapses.
    ///
    /// Peripherals the adapter already knows about are checked first.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DeviceNotFound`] on timeout.
    pub async fn find_device(&self, filter: &DeviceFilter) -> Result<(Peripheral, DeviceInfo)> {
        info!("Scanning for device (timeout {:?})", filter.timeout);

        let mut events = self.adapter.events().await?;
        self.adapter.start_scan(ScanFilter::default()).await?;

        let search = async {
            for peripheral in self.adapter.peripherals().await? {
                if let Some(info) = Self::matching(&peripheral, filter).await {
                    return Ok(Some((peripheral, info)));
                }
            }

            while let Some(event) = events.next().await {
                let id = match event {
                    CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => id,
                    CentralEvent::ServicesAdvertisement { id, .. } => id,
                    _ => continue,
                };

                let peripheral = match self.adapter.peripheral(&id).await {
                    Ok(p) => p,
                    Err(e) => {
                        trace!("Failed to get peripheral: {}", e);
                        continue;
                    }
                };

                if let Some(info) = Self::matching(&peripheral, filter).await {
                    return Ok(Some((peripheral, info)));
                }
            }

            Ok::<_, Error>(None)
        };

        let found = tokio::time::timeout(filter.timeout, search).await;

        if let Err(e) = self.adapter.stop_scan().await {
            warn!("Failed to stop scan: {}", e);
        }

        match found {
            Ok(Ok(Some((peripheral, info)))) => {
                info!("Found device: {} ({})", info.name, info.id);
                Ok((peripheral, info))
            }
            Ok(Ok(None)) | Err(_) => Err(Error::DeviceNotFound),
            Ok(Err(e)) => Err(e),
        }
    }

    /// Check a peripheral's advertisement against the filter.
    async fn matching(peripheral: &Peripheral, filter: &DeviceFilter) -> Option<DeviceInfo> {
        let properties = match peripheral.properties().await {
            Ok(Some(p)) => p,
            _ => return None,
        };

        if !filter.matches(properties.local_name.as_deref(), &properties.services) {
            return None;
        }

        debug!(
            "Peripheral {} matches filter (name: {:?})",
            peripheral.id(),
            properties.local_name
        );

        Some(DeviceInfo::new(
            peripheral.id().to_string(),
            properties.local_name.unwrap_or_default(),
        ))
    }
}
