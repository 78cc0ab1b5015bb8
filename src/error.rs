//! Error types for the dyj-rust-ble crate.

use thiserror::Error;

/// The main error type for this crate.
#[derive(Error, Debug)]
pub enum Error {
    /// Bluetooth-related error from the underlying BLE library.
    #[error("Bluetooth error: {0}")]
    Bluetooth(#[from] btleplug::Error),

    /// No usable Bluetooth radio API on this system.
    #[error("Bluetooth transport not available on this system")]
    TransportUnsupported,

    /// No device matched the request filter.
    #[error("No matching device found")]
    DeviceNotFound,

    /// Failed to establish a connection to the device.
    #[error("Connection failed: {reason}")]
    ConnectionFailed {
        /// Description of why the connection failed.
        reason: String,
    },

    /// The primary service is missing on the device.
    #[error("Service not found: {uuid}")]
    ServiceNotFound {
        /// The UUID of the service that was not found.
        uuid: String,
    },

    /// No characteristic qualifies for a required role.
    #[error("Characteristic not found for {role} role")]
    CharacteristicNotFound {
        /// The role that could not be assigned ("command" or "telemetry").
        role: &'static str,
    },

    /// Operation requires a connection but the link is not connected.
    #[error("Device not connected")]
    NotConnected,

    /// `reconnect` was called before any device was ever selected.
    #[error("No remembered device to reconnect to")]
    NoRememberedDevice,

    /// An inbound text payload contained malformed UTF-8.
    #[error("Decode error: {context}")]
    Decode {
        /// Description of the malformed input.
        context: String,
    },

    /// A configuration field was rejected.
    #[error("Invalid configuration: {field}: {reason}")]
    InvalidConfig {
        /// The offending field.
        field: String,
        /// Why the value was rejected.
        reason: String,
    },

    /// An internal error occurred.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Shorthand for [`Error::InvalidConfig`].
    pub(crate) fn invalid_config(field: &str, reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field: field.to_string(),
            reason: reason.into(),
        }
    }
}

/// A specialized Result type for this crate.
pub type Result<T> = std::result::Result<T, Error>;
