//! Link configuration.
//!
//! [`LinkConfig`] is a typed record with a default for every field. With the
//! `serde` feature it can be loaded from TOML; unknown keys are rejected.
//!
//! ```toml
//! name_prefixes = ["DYJ"]
//! chunk_pacing_ms = 15
//! orphan_file_chunks = "discard"
//! ```

use std::time::Duration;

use uuid::Uuid;

use crate::ble::transport::DeviceFilter;
use crate::ble::uuids::{DEVICE_NAME_PREFIXES, UART_SERVICE_UUID};
use crate::error::{Error, Result};
use crate::protocol::file::OrphanChunkPolicy;
use crate::protocol::mtu::DEFAULT_CHUNK_SIZE_FLOOR;

/// Configuration of a [`crate::BleLink`].
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default, deny_unknown_fields))]
pub struct LinkConfig {
    /// Primary service carrying the command and telemetry characteristics.
    pub service_uuid: Uuid,
    /// Advertised name prefixes accepted during device search.
    pub name_prefixes: Vec<String>,
    /// Upper bound on device search, in milliseconds.
    pub scan_timeout_ms: u64,
    /// Delay between consecutive outbound chunks, in milliseconds.
    pub chunk_pacing_ms: u64,
    /// Lower clamp applied to the MTU-derived chunk size.
    pub chunk_size_floor: usize,
    /// Pause between disabling and re-enabling notifications, in milliseconds.
    pub notification_restart_delay_ms: u64,
    /// Pause after tearing down a live link before reconnecting, in milliseconds.
    pub reconnect_delay_ms: u64,
    /// Handling of file chunks received with no active transfer.
    pub orphan_file_chunks: OrphanChunkPolicy,
    /// Depth of the event channel.
    pub event_capacity: usize,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            service_uuid: UART_SERVICE_UUID,
            name_prefixes: DEVICE_NAME_PREFIXES.iter().map(|p| p.to_string()).collect(),
            scan_timeout_ms: 10_000,
            chunk_pacing_ms: 10,
            chunk_size_floor: DEFAULT_CHUNK_SIZE_FLOOR,
            notification_restart_delay_ms: 100,
            reconnect_delay_ms: 1_000,
            orphan_file_chunks: OrphanChunkPolicy::default(),
            event_capacity: 256,
        }
    }
}

impl LinkConfig {
    /// Parse and validate a TOML document.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] for malformed documents, unknown keys
    /// and values rejected by [`LinkConfig::validate`].
    #[cfg(feature = "serde")]
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text).map_err(|e| Error::InvalidConfig {
            field: "<document>".to_string(),
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Check field values.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] naming the first rejected field.
    pub fn validate(&self) -> Result<()> {
        if self.service_uuid.is_nil() {
            return Err(Error::invalid_config("service_uuid", "must not be nil"));
        }
        if self.name_prefixes.iter().any(|p| p.is_empty()) {
            return Err(Error::invalid_config(
                "name_prefixes",
                "prefixes must not be empty strings",
            ));
        }
        if self.chunk_size_floor == 0 {
            return Err(Error::invalid_config(
                "chunk_size_floor",
                "must be greater than zero",
            ));
        }
        if self.scan_timeout_ms == 0 {
            return Err(Error::invalid_config(
                "scan_timeout_ms",
                "must be greater than zero",
            ));
        }
        if self.event_capacity == 0 {
            return Err(Error::invalid_config(
                "event_capacity",
                "must be greater than zero",
            ));
        }
        Ok(())
    }

    /// Set the name prefixes.
    pub fn with_name_prefixes<I, S>(mut self, prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.name_prefixes = prefixes.into_iter().map(Into::into).collect();
        self
    }

    /// Set the inter-chunk delay.
    pub fn with_chunk_pacing(mut self, pacing: Duration) -> Self {
        self.chunk_pacing_ms = millis(pacing);
        self
    }

    /// Set the chunk size floor.
    pub fn with_chunk_size_floor(mut self, floor: usize) -> Self {
        self.chunk_size_floor = floor;
        self
    }

    /// Set the reconnect delay.
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay_ms = millis(delay);
        self
    }

    /// Set the notification restart delay.
    pub fn with_notification_restart_delay(mut self, delay: Duration) -> Self {
        self.notification_restart_delay_ms = millis(delay);
        self
    }

    /// Set the orphan chunk policy.
    pub fn with_orphan_file_chunks(mut self, policy: OrphanChunkPolicy) -> Self {
        self.orphan_file_chunks = policy;
        self
    }

    /// Delay between consecutive outbound chunks.
    pub fn chunk_pacing(&self) -> Duration {
        Duration::from_millis(self.chunk_pacing_ms)
    }

    /// Pause between disabling and re-enabling notifications.
    pub fn notification_restart_delay(&self) -> Duration {
        Duration::from_millis(self.notification_restart_delay_ms)
    }

    /// Pause after tearing down a live link before reconnecting.
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    /// Filter used to select a device.
    pub fn device_filter(&self) -> DeviceFilter {
        DeviceFilter {
            services: vec![self.service_uuid],
            name_prefixes: self.name_prefixes.clone(),
            timeout: Duration::from_millis(self.scan_timeout_ms),
        }
    }
}

/// Whole milliseconds of a duration, saturating at `u64::MAX`.
fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
