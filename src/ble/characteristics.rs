//! GATT characteristic descriptors and role assignment.
//!
//! The device firmware does not pin its UART characteristics to fixed UUIDs,
//! so the link inspects capability flags of everything discovered under the
//! primary service and picks one characteristic to write commands to and one
//! to receive telemetry from.

use std::fmt;

use tracing::debug;
use uuid::Uuid;

use crate::error::{Error, Result};

/// Capability flags of a discovered characteristic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CharacteristicProperties {
    /// Write with response.
    pub write: bool,
    /// Write without response.
    pub write_without_response: bool,
    /// Notifications.
    pub notify: bool,
    /// Indications.
    pub indicate: bool,
    /// Reads.
    pub read: bool,
}

impl CharacteristicProperties {
    /// Whether the characteristic accepts writes of either kind.
    pub fn can_write(&self) -> bool {
        self.write || self.write_without_response
    }

    /// Whether the characteristic can push values to us.
    pub fn can_notify(&self) -> bool {
        self.notify || self.indicate
    }
}

impl From<btleplug::api::CharPropFlags> for CharacteristicProperties {
    fn from(flags: btleplug::api::CharPropFlags) -> Self {
        use btleplug::api::CharPropFlags;

        Self {
            write: flags.contains(CharPropFlags::WRITE),
            write_without_response: flags.contains(CharPropFlags::WRITE_WITHOUT_RESPONSE),
            notify: flags.contains(CharPropFlags::NOTIFY),
            indicate: flags.contains(CharPropFlags::INDICATE),
            read: flags.contains(CharPropFlags::READ),
        }
    }
}

impl fmt::Display for CharacteristicProperties {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = [
            (self.write, "write"),
            (self.write_without_response, "write-without-response"),
            (self.notify, "notify"),
            (self.indicate, "indicate"),
            (self.read, "read"),
        ];
        let set: Vec<&str> = names
            .iter()
            .filter(|(on, _)| *on)
            .map(|(_, name)| *name)
            .collect();
        write!(f, "[{}]", set.join(", "))
    }
}

/// A characteristic as reported by discovery. Read-only once produced.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CharacteristicDescriptor {
    /// Characteristic UUID.
    pub uuid: Uuid,
    /// UUID of the service the characteristic belongs to.
    pub service_uuid: Uuid,
    /// Capability flags.
    pub properties: CharacteristicProperties,
}

impl CharacteristicDescriptor {
    /// Create a new descriptor.
    pub fn new(uuid: Uuid, service_uuid: Uuid, properties: CharacteristicProperties) -> Self {
        Self {
            uuid,
            service_uuid,
            properties,
        }
    }
}

impl From<&btleplug::api::Characteristic> for CharacteristicDescriptor {
    fn from(characteristic: &btleplug::api::Characteristic) -> Self {
        Self {
            uuid: characteristic.uuid,
            service_uuid: characteristic.service_uuid,
            properties: characteristic.properties.into(),
        }
    }
}

/// The pair of characteristics the link talks through.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CharacteristicRoles {
    /// Outbound commands are written here.
    pub command: CharacteristicDescriptor,
    /// Inbound notifications arrive from here.
    pub telemetry: CharacteristicDescriptor,
}

/// Assign the command and telemetry roles from discovered descriptors.
///
/// The command role goes to the first write-capable descriptor in discovery
/// order. The telemetry role goes to the first notify/indicate-capable
/// descriptor that is not the command descriptor; only when no other
/// candidate exists is a single bidirectional descriptor used for both.
///
/// # Errors
///
/// Returns [`Error::CharacteristicNotFound`] when either role has no
/// candidate.
pub fn resolve_roles(descriptors: &[CharacteristicDescriptor]) -> Result<CharacteristicRoles> {
    for descriptor in descriptors {
        debug!(
            "Characteristic {}: {}",
            descriptor.uuid, descriptor.properties
        );
    }

    let command_index = descriptors
        .iter()
        .position(|d| d.properties.can_write())
        .ok_or(Error::CharacteristicNotFound { role: "command" })?;

    let telemetry_index = descriptors
        .iter()
        .enumerate()
        .position(|(i, d)| i != command_index && d.properties.can_notify())
        .or_else(|| {
            descriptors[command_index]
                .properties
                .can_notify()
                .then_some(command_index)
        })
        .ok_or(Error::CharacteristicNotFound { role: "telemetry" })?;

    let roles = CharacteristicRoles {
        command: descriptors[command_index].clone(),
        telemetry: descriptors[telemetry_index].clone(),
    };

    debug!(
        "Assigned roles: command={}, telemetry={}",
        roles.command.uuid, roles.telemetry.uuid
    );

    Ok(roles)
}
