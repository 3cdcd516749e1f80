//! The operations which a session needs from the underlying Bluetooth stack.

use crate::resolver::Capabilities;
use crate::sink::ChunkSender;
use async_trait::async_trait;
use bluez_async::{BluetoothError, MacAddress};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// An error from the Bluetooth stack.
#[derive(Debug, Error)]
pub enum TransportError {
    /// No peripheral with the given address could be found.
    #[error("No peripheral with address {address} found.")]
    PeripheralNotFound { address: MacAddress },
    /// The connected peripheral doesn't have the given characteristic.
    #[error("Characteristic {uuid} not available on the peripheral.")]
    CharacteristicUnavailable { uuid: Uuid },
    /// There was an error talking to BlueZ.
    #[error(transparent)]
    Bluetooth(#[from] BluetoothError),
    /// Any other failure reported by the stack.
    #[error("{0}")]
    Other(String),
}

/// A characteristic as listed in the peripheral's service table.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CharacteristicDescriptor {
    pub uuid: Uuid,
    pub capabilities: Capabilities,
    /// UUIDs of the characteristic's descriptors, e.g. the CCCD.
    pub descriptors: Vec<Uuid>,
}

/// A GATT service as listed in the peripheral's service table.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ServiceDescriptor {
    pub uuid: Uuid,
    /// Whether this is a primary service (as opposed to a secondary service).
    pub primary: bool,
    pub characteristics: Vec<CharacteristicDescriptor>,
}

/// The services and characteristics which a connected peripheral exposes.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ServiceTable {
    pub services: Vec<ServiceDescriptor>,
}

impl ServiceTable {
    /// Find the first characteristic with the given UUID, along with the service it belongs to.
    pub fn find(&self, uuid: Uuid) -> Option<(&ServiceDescriptor, &CharacteristicDescriptor)> {
        self.services.iter().find_map(|service| {
            service
                .characteristics
                .iter()
                .find(|characteristic| characteristic.uuid == uuid)
                .map(|characteristic| (service, characteristic))
        })
    }

    /// All characteristics of all services.
    pub fn characteristics(&self) -> impl Iterator<Item = &CharacteristicDescriptor> {
        self.services
            .iter()
            .flat_map(|service| service.characteristics.iter())
    }
}

/// The contents of an advertisement received while scanning.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Advertisement {
    pub address: MacAddress,
    pub name: Option<String>,
    /// Received signal strength, in dBm.
    pub rssi: Option<i16>,
    /// Advertised transmit power, in dBm.
    pub tx_power: Option<i16>,
    pub service_uuids: Vec<Uuid>,
    /// Manufacturer specific data, keyed by company identifier.
    pub manufacturer_data: HashMap<u16, Vec<u8>>,
    pub service_data: HashMap<Uuid, Vec<u8>>,
}

impl Advertisement {
    /// An advertisement from the given address with nothing else in it.
    pub fn new(address: MacAddress) -> Self {
        Self {
            address,
            name: None,
            rssi: None,
            tx_power: None,
            service_uuids: vec![],
            manufacturer_data: HashMap::new(),
            service_data: HashMap::new(),
        }
    }

    /// Whether the advertisement carries a name which isn't just whitespace.
    pub fn has_name(&self) -> bool {
        self.name
            .as_deref()
            .map_or(false, |name| !name.trim().is_empty())
    }
}

/// A Bluetooth stack able to act as a GATT client for a single peripheral at a time.
#[async_trait]
pub trait Transport: Send + Sync {
    /// An open connection to one peripheral.
    type Connection: Send + Sync;

    /// Connect to the peripheral with the given address and discover its services.
    async fn connect(&self, address: &MacAddress) -> Result<Self::Connection, TransportError>;

    /// Close the connection.
    async fn disconnect(&self, connection: &Self::Connection) -> Result<(), TransportError>;

    /// Get the service table which was discovered when connecting.
    async fn list_services(
        &self,
        connection: &Self::Connection,
    ) -> Result<ServiceTable, TransportError>;

    async fn read_characteristic(
        &self,
        connection: &Self::Connection,
        characteristic: Uuid,
    ) -> Result<Vec<u8>, TransportError>;

    /// Write a value to the given characteristic, either as a request (`ack_required`) or as a
    /// command.
    async fn write_characteristic(
        &self,
        connection: &Self::Connection,
        characteristic: Uuid,
        value: &[u8],
        ack_required: bool,
    ) -> Result<(), TransportError>;

    /// Enable notifications or indications on the given characteristic. Every value received is
    /// appended to `sink`, in the order in which it was received.
    async fn subscribe(
        &self,
        connection: &Self::Connection,
        characteristic: Uuid,
        sink: ChunkSender,
    ) -> Result<(), TransportError>;

    /// Disable notifications on the given characteristic.
    async fn unsubscribe(
        &self,
        connection: &Self::Connection,
        characteristic: Uuid,
    ) -> Result<(), TransportError>;

    /// Resolves when the peripheral drops the connection.
    async fn disconnected(&self, connection: &Self::Connection);

    /// Scan for advertisements for the given duration, calling `on_advertisement` for each one
    /// received.
    async fn scan(
        &self,
        duration: Duration,
        on_advertisement: &mut (dyn FnMut(Advertisement) + Send),
    ) -> Result<(), TransportError>;
}
