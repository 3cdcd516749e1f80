//! [`Transport`] implementation for BlueZ, over D-Bus.

use crate::resolver::Capabilities;
use crate::sink::ChunkSender;
use crate::transport::{
    Advertisement, CharacteristicDescriptor, ServiceDescriptor, ServiceTable, Transport,
    TransportError,
};
use async_trait::async_trait;
use bluez_async::{
    BluetoothError, BluetoothEvent, BluetoothSession, CharacteristicEvent, CharacteristicId,
    DeviceEvent, DeviceId, DeviceInfo, DiscoveryFilter, MacAddress, WriteOptions, WriteType,
};
use futures::StreamExt;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout_at, Instant};
use uuid::Uuid;

/// How long to scan for a peripheral which BlueZ doesn't know about yet before giving up.
const CONNECT_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(10);
/// How often to check whether the peripheral has turned up while scanning for it.
const CONNECT_DISCOVERY_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// A GATT client transport backed by a BlueZ [`BluetoothSession`].
#[derive(Clone, Debug)]
pub struct BluezTransport {
    session: BluetoothSession,
}

/// An open connection to a peripheral via BlueZ.
#[derive(Debug)]
pub struct BluezConnection {
    device: DeviceId,
    address: MacAddress,
    services: ServiceTable,
    characteristics: HashMap<Uuid, CharacteristicId>,
    /// Tasks forwarding notifications to sinks, by characteristic.
    forwarders: Mutex<HashMap<Uuid, JoinHandle<()>>>,
}

impl BluezConnection {
    fn characteristic_id(&self, uuid: Uuid) -> Result<&CharacteristicId, TransportError> {
        self.characteristics
            .get(&uuid)
            .ok_or(TransportError::CharacteristicUnavailable { uuid })
    }
}

impl Drop for BluezConnection {
    fn drop(&mut self) {
        for (_, forwarder) in self.forwarders.get_mut().drain() {
            forwarder.abort();
        }
    }
}

impl BluezTransport {
    /// Wrap an existing Bluetooth session.
    pub fn new(session: BluetoothSession) -> Self {
        Self { session }
    }

    /// Find every device ID which BlueZ has for the given address, running discovery for a while
    /// if there are none yet.
    async fn find_device(&self, address: &MacAddress) -> Result<Vec<DeviceId>, TransportError> {
        let ids = self.device_ids(address).await?;
        if !ids.is_empty() {
            return Ok(ids);
        }

        log::info!("{} not known yet, scanning for it", address);
        self.session.start_discovery().await?;
        let deadline = Instant::now() + CONNECT_DISCOVERY_TIMEOUT;
        let found = loop {
            let ids = self.device_ids(address).await?;
            if !ids.is_empty() || Instant::now() >= deadline {
                break ids;
            }
            sleep(CONNECT_DISCOVERY_POLL_INTERVAL).await;
        };
        self.session.stop_discovery().await?;

        if found.is_empty() {
            Err(TransportError::PeripheralNotFound { address: *address })
        } else {
            Ok(found)
        }
    }

    async fn device_ids(&self, address: &MacAddress) -> Result<Vec<DeviceId>, BluetoothError> {
        let devices = self.session.get_devices().await?;
        Ok(devices
            .into_iter()
            .filter(|device| &device.mac_address == address)
            .map(|device| device.id)
            .collect())
    }

    /// Try to connect to the ids in turn, and get the first one that succeeds. If they all fail
    /// then return the last error.
    async fn try_connect_all(&self, ids: Vec<DeviceId>) -> Result<DeviceId, TransportError> {
        let mut last_error = None;
        for id in ids {
            match self.session.connect(&id).await {
                Ok(()) => return Ok(id),
                Err(e) => {
                    log::debug!("Error connecting to {}: {}", id, e);
                    last_error = Some(e);
                }
            }
        }
        Err(last_error
            .map(TransportError::from)
            .unwrap_or_else(|| TransportError::Other("No device to connect to".to_string())))
    }

    /// Walk the services, characteristics and descriptors of a connected device.
    async fn discover_services(
        &self,
        device: &DeviceId,
    ) -> Result<(ServiceTable, HashMap<Uuid, CharacteristicId>), TransportError> {
        let mut table = ServiceTable::default();
        let mut ids = HashMap::new();
        for service in self.session.get_services(device).await? {
            let mut characteristics = vec![];
            for characteristic in self.session.get_characteristics(&service.id).await? {
                let descriptors = self
                    .session
                    .get_descriptors(&characteristic.id)
                    .await?
                    .into_iter()
                    .map(|descriptor| descriptor.uuid)
                    .collect();
                characteristics.push(CharacteristicDescriptor {
                    uuid: characteristic.uuid,
                    // BlueZ reports the GATT characteristic properties with the same bit layout.
                    capabilities: Capabilities::from_bits_truncate(characteristic.flags.bits()),
                    descriptors,
                });
                ids.entry(characteristic.uuid).or_insert(characteristic.id);
            }
            table.services.push(ServiceDescriptor {
                uuid: service.uuid,
                primary: service.primary,
                characteristics,
            });
        }
        Ok((table, ids))
    }
}

/// Whether the event means that the device has just advertised.
fn is_advertisement(event: &DeviceEvent) -> bool {
    matches!(
        event,
        DeviceEvent::Discovered
            | DeviceEvent::Rssi { .. }
            | DeviceEvent::ManufacturerData { .. }
            | DeviceEvent::ServiceData { .. }
    )
}

impl From<DeviceInfo> for Advertisement {
    fn from(device: DeviceInfo) -> Self {
        Advertisement {
            address: device.mac_address,
            name: device.name,
            rssi: device.rssi,
            tx_power: device.tx_power,
            service_uuids: device.services,
            manufacturer_data: device.manufacturer_data,
            service_data: device.service_data,
        }
    }
}

#[async_trait]
impl Transport for BluezTransport {
    type Connection = BluezConnection;

    async fn connect(&self, address: &MacAddress) -> Result<BluezConnection, TransportError> {
        let ids = self.find_device(address).await?;
        let device = self.try_connect_all(ids).await?;
        log::info!("Connected to {} as {}", address, device);

        match self.discover_services(&device).await {
            Ok((services, characteristics)) => Ok(BluezConnection {
                device,
                address: *address,
                services,
                characteristics,
                forwarders: Mutex::new(HashMap::new()),
            }),
            Err(e) => {
                if let Err(disconnect_error) = self.session.disconnect(&device).await {
                    log::warn!(
                        "Error disconnecting from {} after failed service discovery: {}",
                        address,
                        disconnect_error
                    );
                }
                Err(e)
            }
        }
    }

    async fn disconnect(&self, connection: &BluezConnection) -> Result<(), TransportError> {
        for (_, forwarder) in connection.forwarders.lock().await.drain() {
            forwarder.abort();
        }
        self.session.disconnect(&connection.device).await?;
        Ok(())
    }

    async fn list_services(
        &self,
        connection: &BluezConnection,
    ) -> Result<ServiceTable, TransportError> {
        Ok(connection.services.clone())
    }

    async fn read_characteristic(
        &self,
        connection: &BluezConnection,
        characteristic: Uuid,
    ) -> Result<Vec<u8>, TransportError> {
        let id = connection.characteristic_id(characteristic)?;
        Ok(self.session.read_characteristic_value(id).await?)
    }

    async fn write_characteristic(
        &self,
        connection: &BluezConnection,
        characteristic: Uuid,
        value: &[u8],
        ack_required: bool,
    ) -> Result<(), TransportError> {
        let id = connection.characteristic_id(characteristic)?;
        let options = WriteOptions {
            write_type: Some(if ack_required {
                WriteType::WithResponse
            } else {
                WriteType::WithoutResponse
            }),
            ..Default::default()
        };
        self.session
            .write_characteristic_value_with_options(id, value.to_vec(), options)
            .await?;
        Ok(())
    }

    async fn subscribe(
        &self,
        connection: &BluezConnection,
        characteristic: Uuid,
        sink: ChunkSender,
    ) -> Result<(), TransportError> {
        let id = connection.characteristic_id(characteristic)?;
        // Listen before enabling notifications, so the first value can't slip past.
        let mut events = self.session.characteristic_event_stream(id).await?;
        self.session.start_notify(id).await?;

        let forwarder = tokio::spawn(async move {
            while let Some(event) = events.next().await {
                if let BluetoothEvent::Characteristic {
                    event: CharacteristicEvent::Value { value },
                    ..
                } = event
                {
                    if let Err(e) = sink.append(characteristic, value) {
                        log::debug!("Stopped forwarding notifications: {}", e);
                        break;
                    }
                }
            }
        });
        if let Some(previous) = connection
            .forwarders
            .lock()
            .await
            .insert(characteristic, forwarder)
        {
            previous.abort();
        }
        Ok(())
    }

    async fn unsubscribe(
        &self,
        connection: &BluezConnection,
        characteristic: Uuid,
    ) -> Result<(), TransportError> {
        if let Some(forwarder) = connection.forwarders.lock().await.remove(&characteristic) {
            forwarder.abort();
        }
        let id = connection.characteristic_id(characteristic)?;
        self.session.stop_notify(id).await?;
        Ok(())
    }

    async fn disconnected(&self, connection: &BluezConnection) {
        match self.session.device_event_stream(&connection.device).await {
            Ok(mut events) => {
                while let Some(event) = events.next().await {
                    if let BluetoothEvent::Device {
                        event: DeviceEvent::Connected { connected: false },
                        ..
                    } = event
                    {
                        log::info!("{} disconnected", connection.address);
                        return;
                    }
                }
                log::warn!("Device event stream for {} ended", connection.address);
            }
            Err(e) => log::warn!(
                "Can't watch {} for disconnection: {}",
                connection.address,
                e
            ),
        }
        // Without events there's no way to tell, so assume the connection stays up.
        futures::future::pending::<()>().await
    }

    async fn scan(
        &self,
        duration: Duration,
        on_advertisement: &mut (dyn FnMut(Advertisement) + Send),
    ) -> Result<(), TransportError> {
        let mut events = self.session.event_stream().await?;
        let filter = DiscoveryFilter {
            duplicate_data: Some(true),
            ..Default::default()
        };
        self.session.start_discovery_with_filter(&filter).await?;
        let deadline = Instant::now() + duration;

        // Devices which BlueZ already knows about won't necessarily send a new event. Only those
        // with an RSSI have been heard recently; the rest are paired or stale.
        for device in self.session.get_devices().await? {
            if device.rssi.is_some() {
                on_advertisement(device.into());
            }
        }

        while let Ok(Some(event)) = timeout_at(deadline, events.next()).await {
            let id = match event {
                BluetoothEvent::Device { id, event } if is_advertisement(&event) => id,
                _ => continue,
            };
            match self.session.get_device_info(&id).await {
                Ok(device) => on_advertisement(device.into()),
                Err(e) => log::debug!("Error getting info for {}: {}", id, e),
            }
        }

        self.session.stop_discovery().await?;
        Ok(())
    }
}
