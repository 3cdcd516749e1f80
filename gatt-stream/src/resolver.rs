//! Looking up characteristics on a connected peripheral and checking what they can do.

use crate::transport::ServiceTable;
use bitflags::bitflags;
use bluez_async::{uuid_from_u16, uuid_from_u32};
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

bitflags! {
    /// The subset of characteristic properties which matter to a GATT client.
    pub struct Capabilities: u16 {
        const BROADCAST = 0x01;
        const READ = 0x02;
        const WRITE_WITHOUT_RESPONSE = 0x04;
        const WRITE = 0x08;
        const NOTIFY = 0x10;
        const INDICATE = 0x20;
    }
}

impl Capabilities {
    const NAMES: [(Capabilities, &'static str); 6] = [
        (Capabilities::BROADCAST, "broadcast"),
        (Capabilities::READ, "read"),
        (Capabilities::WRITE_WITHOUT_RESPONSE, "write-without-response"),
        (Capabilities::WRITE, "write"),
        (Capabilities::NOTIFY, "notify"),
        (Capabilities::INDICATE, "indicate"),
    ];

    pub fn is_readable(&self) -> bool {
        self.intersects(Requirement::Readable.accepted())
    }

    pub fn is_writable(&self) -> bool {
        self.intersects(Requirement::Writable.accepted())
    }

    pub fn is_notifiable(&self) -> bool {
        self.intersects(Requirement::Notifiable.accepted())
    }
}

impl Display for Capabilities {
    /// Formats as a comma-separated list of property names, e.g. `read, notify`.
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        let names: Vec<&str> = Self::NAMES
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect();
        f.write_str(&names.join(", "))
    }
}

/// A way in which the caller intends to use a characteristic.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Requirement {
    Readable,
    /// Either a write request or a write command.
    Writable,
    /// Either notifications or indications.
    Notifiable,
}

impl Requirement {
    /// The capabilities of which at least one must be present to satisfy the requirement.
    pub fn accepted(&self) -> Capabilities {
        match self {
            Self::Readable => Capabilities::READ,
            Self::Writable => Capabilities::WRITE | Capabilities::WRITE_WITHOUT_RESPONSE,
            Self::Notifiable => Capabilities::NOTIFY | Capabilities::INDICATE,
        }
    }

    pub fn is_satisfied_by(&self, capabilities: Capabilities) -> bool {
        capabilities.intersects(self.accepted())
    }

    fn as_str(&self) -> &'static str {
        match self {
            Self::Readable => "readable",
            Self::Writable => "writable",
            Self::Notifiable => "notifiable",
        }
    }
}

impl Display for Requirement {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A characteristic which has been found on the connected peripheral.
///
/// Only valid for the connection it was resolved on.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct CharacteristicRef {
    pub uuid: Uuid,
    /// The service which the characteristic belongs to.
    pub service: Uuid,
    pub capabilities: Capabilities,
}

/// An error resolving a characteristic.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ResolveError {
    /// The session hasn't finished connecting, or has already disconnected.
    #[error("Not connected.")]
    NotConnected,
    /// The characteristic isn't in the peripheral's service table.
    #[error("Characteristic {uuid} not found.")]
    CharacteristicNotFound { uuid: Uuid },
    /// The characteristic exists but can't be used in the required way.
    #[error("Characteristic {uuid} is not {required} (properties: [{available}]).")]
    CapabilityMismatch {
        uuid: Uuid,
        required: Requirement,
        available: Capabilities,
    },
}

/// Resolves characteristic UUIDs against the service table of the connected peripheral.
#[derive(Clone, Debug, Default)]
pub struct CharacteristicResolver {
    table: Option<ServiceTable>,
}

impl CharacteristicResolver {
    /// A resolver with no service table, which will fail every lookup with `NotConnected`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the service table of a newly connected peripheral.
    pub fn load(&mut self, table: ServiceTable) {
        self.table = Some(table);
    }

    /// Forget the service table, after disconnecting.
    pub fn clear(&mut self) {
        self.table = None;
    }

    pub fn is_loaded(&self) -> bool {
        self.table.is_some()
    }

    /// Look up the given characteristic and check that it satisfies the requirement.
    pub fn resolve(
        &self,
        uuid: Uuid,
        required: Requirement,
    ) -> Result<CharacteristicRef, ResolveError> {
        let table = self.table.as_ref().ok_or(ResolveError::NotConnected)?;
        let (service, characteristic) = table
            .find(uuid)
            .ok_or(ResolveError::CharacteristicNotFound { uuid })?;
        if !required.is_satisfied_by(characteristic.capabilities) {
            return Err(ResolveError::CapabilityMismatch {
                uuid,
                required,
                available: characteristic.capabilities,
            });
        }
        Ok(CharacteristicRef {
            uuid,
            service: service.uuid,
            capabilities: characteristic.capabilities,
        })
    }
}

/// An error parsing a characteristic identifier.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("Invalid UUID '{0}'")]
pub struct ParseUuidError(String);

/// Parse a characteristic or service identifier.
///
/// Accepts a 16-bit alias (`fff3`), a 32-bit alias (`0000fff3`) or a full 128-bit UUID. Aliases
/// are expanded with the Bluetooth base UUID.
pub fn parse_uuid(s: &str) -> Result<Uuid, ParseUuidError> {
    let trimmed = s.trim().trim_start_matches("0x");
    let error = || ParseUuidError(s.to_owned());
    match trimmed.len() {
        4 => u16::from_str_radix(trimmed, 16)
            .map(uuid_from_u16)
            .map_err(|_| error()),
        8 => u32::from_str_radix(trimmed, 16)
            .map(uuid_from_u32)
            .map_err(|_| error()),
        _ => Uuid::from_str(trimmed).map_err(|_| error()),
    }
}
