//! Listing everything a peripheral exposes over GATT, along with the current value of every
//! readable characteristic.

use crate::resolver::Capabilities;
use crate::transport::{ServiceTable, Transport, TransportError};
use bluez_async::MacAddress;
use thiserror::Error;
use uuid::Uuid;

/// An error exploring a peripheral.
#[derive(Debug, Error)]
pub enum ExploreError {
    #[error("Error connecting to {address}: {source}")]
    Connect {
        address: MacAddress,
        source: TransportError,
    },
    #[error("Error listing services of {address}: {source}")]
    ListServices {
        address: MacAddress,
        source: TransportError,
    },
}

/// A characteristic and, if it is readable, the result of reading it.
#[derive(Debug)]
pub struct CharacteristicEntry {
    pub uuid: Uuid,
    pub capabilities: Capabilities,
    pub descriptors: Vec<Uuid>,
    /// `None` if the characteristic isn't readable.
    pub value: Option<Result<Vec<u8>, TransportError>>,
}

#[derive(Debug)]
pub struct ServiceEntry {
    pub uuid: Uuid,
    pub primary: bool,
    pub characteristics: Vec<CharacteristicEntry>,
}

/// Everything found on a peripheral.
#[derive(Debug)]
pub struct PeripheralInventory {
    pub address: MacAddress,
    pub services: Vec<ServiceEntry>,
}

impl PeripheralInventory {
    pub fn characteristic_count(&self) -> usize {
        self.services
            .iter()
            .map(|service| service.characteristics.len())
            .sum()
    }

    pub fn find(&self, uuid: Uuid) -> Option<&CharacteristicEntry> {
        self.services
            .iter()
            .flat_map(|service| service.characteristics.iter())
            .find(|characteristic| characteristic.uuid == uuid)
    }
}

/// Connect to the given peripheral, list its services and read every readable characteristic,
/// then disconnect.
///
/// Failing to read a characteristic doesn't stop the exploration; the error is recorded in the
/// inventory instead.
pub async fn explore<T: Transport>(
    transport: &T,
    address: &MacAddress,
) -> Result<PeripheralInventory, ExploreError> {
    log::info!("Connecting to {}", address);
    let connection = transport
        .connect(address)
        .await
        .map_err(|source| ExploreError::Connect {
            address: *address,
            source,
        })?;

    let result = match transport.list_services(&connection).await {
        Ok(table) => Ok(read_inventory(transport, &connection, address, table).await),
        Err(source) => Err(ExploreError::ListServices {
            address: *address,
            source,
        }),
    };

    log::info!("Disconnecting from {}", address);
    if let Err(e) = transport.disconnect(&connection).await {
        log::warn!("Error disconnecting from {}: {}", address, e);
    }
    result
}

async fn read_inventory<T: Transport>(
    transport: &T,
    connection: &T::Connection,
    address: &MacAddress,
    table: ServiceTable,
) -> PeripheralInventory {
    let mut services = Vec::with_capacity(table.services.len());
    for service in table.services {
        let mut characteristics = Vec::with_capacity(service.characteristics.len());
        for characteristic in service.characteristics {
            let value = if characteristic.capabilities.is_readable() {
                let value = transport
                    .read_characteristic(connection, characteristic.uuid)
                    .await;
                if let Err(e) = &value {
                    log::debug!("Error reading {}: {}", characteristic.uuid, e);
                }
                Some(value)
            } else {
                None
            };
            characteristics.push(CharacteristicEntry {
                uuid: characteristic.uuid,
                capabilities: characteristic.capabilities,
                descriptors: characteristic.descriptors,
                value,
            });
        }
        services.push(ServiceEntry {
            uuid: service.uuid,
            primary: service.primary,
            characteristics,
        });
    }
    PeripheralInventory {
        address: *address,
        services,
    }
}
