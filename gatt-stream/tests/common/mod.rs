//! An in-memory transport with scripted behaviour, for driving sessions without a Bluetooth
//! adapter.

#![allow(dead_code)]

use async_trait::async_trait;
use bluez_async::uuid_from_u16;
use gatt_stream::transport::{CharacteristicDescriptor, ServiceDescriptor};
use gatt_stream::{
    Advertisement, Capabilities, ChunkSender, MacAddress, ServiceTable, Transport, TransportError,
};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::sleep;
use uuid::Uuid;

pub const ADDRESS: &str = "A4:C1:38:12:34:56";

pub fn address() -> MacAddress {
    ADDRESS.parse().unwrap()
}

pub fn service() -> Uuid {
    uuid_from_u16(0xfff0)
}

/// Notify and write-without-response, like the data characteristic of a typical probe.
pub fn data() -> Uuid {
    uuid_from_u16(0xfff3)
}

/// Write only.
pub fn control() -> Uuid {
    uuid_from_u16(0xfff2)
}

/// Device name, readable.
pub fn device_name() -> Uuid {
    uuid_from_u16(0x2a00)
}

/// Battery level, readable but the peripheral refuses to read it.
pub fn battery_level() -> Uuid {
    uuid_from_u16(0x2a19)
}

/// Readable only, so it can't be used as a data characteristic.
pub fn firmware_revision() -> Uuid {
    uuid_from_u16(0x2a26)
}

pub fn cccd() -> Uuid {
    uuid_from_u16(0x2902)
}

pub fn probe_services() -> ServiceTable {
    let characteristic = |uuid, capabilities, descriptors| CharacteristicDescriptor {
        uuid,
        capabilities,
        descriptors,
    };
    ServiceTable {
        services: vec![
            ServiceDescriptor {
                uuid: uuid_from_u16(0x1800),
                primary: true,
                characteristics: vec![characteristic(device_name(), Capabilities::READ, vec![])],
            },
            ServiceDescriptor {
                uuid: uuid_from_u16(0x180f),
                primary: true,
                characteristics: vec![characteristic(
                    battery_level(),
                    Capabilities::READ | Capabilities::NOTIFY,
                    vec![cccd()],
                )],
            },
            ServiceDescriptor {
                uuid: service(),
                primary: true,
                characteristics: vec![
                    characteristic(
                        data(),
                        Capabilities::NOTIFY | Capabilities::WRITE_WITHOUT_RESPONSE,
                        vec![cccd()],
                    ),
                    characteristic(control(), Capabilities::WRITE, vec![]),
                    characteristic(firmware_revision(), Capabilities::READ, vec![]),
                ],
            },
        ],
    }
}

/// A call made on the mock transport.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Call {
    Connect(MacAddress),
    Disconnect,
    ListServices,
    Read(Uuid),
    Write(Uuid, Vec<u8>, bool),
    Subscribe(Uuid),
    Unsubscribe(Uuid),
    Scan(Duration),
}

#[derive(Debug)]
pub struct MockConnection;

#[derive(Debug, Default)]
pub struct MockTransport {
    services: ServiceTable,
    values: HashMap<Uuid, Vec<u8>>,
    connect_error: bool,
    subscribe_error: bool,
    write_error: bool,
    unsubscribe_error: bool,
    /// How long connecting, subscribing and writing take to complete.
    connect_delay: Duration,
    subscribe_delay: Duration,
    write_delay: Duration,
    /// Chunks sent as soon as notifications are enabled, each after the given delay.
    on_subscribe: Vec<(Duration, Vec<u8>)>,
    /// Chunks sent in response to a successful write.
    on_write: Vec<Vec<u8>>,
    lose_connection_after: Option<Duration>,
    advertisements: Vec<Advertisement>,
    sender: Mutex<Option<(Uuid, ChunkSender)>>,
    calls: Mutex<Vec<Call>>,
}

impl MockTransport {
    pub fn new(services: ServiceTable) -> Self {
        Self {
            services,
            ..Default::default()
        }
    }

    pub fn probe() -> Self {
        let mut values = HashMap::new();
        values.insert(device_name(), b"Probe".to_vec());
        values.insert(firmware_revision(), vec![0x01, 0xfe]);
        Self {
            values,
            ..Self::new(probe_services())
        }
    }

    pub fn failing_connect(mut self) -> Self {
        self.connect_error = true;
        self
    }

    pub fn failing_subscribe(mut self) -> Self {
        self.subscribe_error = true;
        self
    }

    pub fn failing_write(mut self) -> Self {
        self.write_error = true;
        self
    }

    pub fn failing_unsubscribe(mut self) -> Self {
        self.unsubscribe_error = true;
        self
    }

    pub fn slow_connect(mut self, delay: Duration) -> Self {
        self.connect_delay = delay;
        self
    }

    pub fn slow_subscribe(mut self, delay: Duration) -> Self {
        self.subscribe_delay = delay;
        self
    }

    pub fn slow_write(mut self, delay: Duration) -> Self {
        self.write_delay = delay;
        self
    }

    /// Send the given chunk `delay` after notifications are enabled.
    pub fn notify_after(mut self, delay: Duration, chunk: &[u8]) -> Self {
        self.on_subscribe.push((delay, chunk.to_vec()));
        self
    }

    /// Send the given chunk when the activation command is written.
    pub fn notify_on_write(mut self, chunk: &[u8]) -> Self {
        self.on_write.push(chunk.to_vec());
        self
    }

    pub fn lose_connection_after(mut self, delay: Duration) -> Self {
        self.lose_connection_after = Some(delay);
        self
    }

    pub fn advertising(mut self, advertisements: Vec<Advertisement>) -> Self {
        self.advertisements = advertisements;
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, matches: impl Fn(&Call) -> bool) -> usize {
        self.calls().iter().filter(|call| matches(call)).count()
    }

    /// The position of the first call matching the predicate, if any.
    pub fn position(&self, matches: impl Fn(&Call) -> bool) -> Option<usize> {
        self.calls().iter().position(matches)
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    fn send(&self, chunk: Vec<u8>) {
        if let Some((characteristic, sender)) = &*self.sender.lock().unwrap() {
            let _ = sender.append(*characteristic, chunk);
        }
    }
}

async fn delay(duration: Duration) {
    if !duration.is_zero() {
        sleep(duration).await;
    }
}

#[async_trait]
impl Transport for MockTransport {
    type Connection = MockConnection;

    async fn connect(&self, address: &MacAddress) -> Result<MockConnection, TransportError> {
        self.record(Call::Connect(*address));
        delay(self.connect_delay).await;
        if self.connect_error {
            Err(TransportError::PeripheralNotFound { address: *address })
        } else {
            Ok(MockConnection)
        }
    }

    async fn disconnect(&self, _connection: &MockConnection) -> Result<(), TransportError> {
        self.record(Call::Disconnect);
        *self.sender.lock().unwrap() = None;
        Ok(())
    }

    async fn list_services(
        &self,
        _connection: &MockConnection,
    ) -> Result<ServiceTable, TransportError> {
        self.record(Call::ListServices);
        Ok(self.services.clone())
    }

    async fn read_characteristic(
        &self,
        _connection: &MockConnection,
        characteristic: Uuid,
    ) -> Result<Vec<u8>, TransportError> {
        self.record(Call::Read(characteristic));
        self.values
            .get(&characteristic)
            .cloned()
            .ok_or_else(|| TransportError::Other("Read not permitted".to_string()))
    }

    async fn write_characteristic(
        &self,
        _connection: &MockConnection,
        characteristic: Uuid,
        value: &[u8],
        ack_required: bool,
    ) -> Result<(), TransportError> {
        self.record(Call::Write(characteristic, value.to_vec(), ack_required));
        delay(self.write_delay).await;
        if self.write_error {
            return Err(TransportError::Other("Write rejected".to_string()));
        }
        for chunk in &self.on_write {
            self.send(chunk.clone());
        }
        Ok(())
    }

    async fn subscribe(
        &self,
        _connection: &MockConnection,
        characteristic: Uuid,
        sink: ChunkSender,
    ) -> Result<(), TransportError> {
        self.record(Call::Subscribe(characteristic));
        delay(self.subscribe_delay).await;
        if self.subscribe_error {
            return Err(TransportError::Other("Notifications not permitted".to_string()));
        }
        for (delay, chunk) in self.on_subscribe.clone() {
            let sink = sink.clone();
            tokio::spawn(async move {
                sleep(delay).await;
                let _ = sink.append(characteristic, chunk);
            });
        }
        *self.sender.lock().unwrap() = Some((characteristic, sink));
        Ok(())
    }

    async fn unsubscribe(
        &self,
        _connection: &MockConnection,
        characteristic: Uuid,
    ) -> Result<(), TransportError> {
        self.record(Call::Unsubscribe(characteristic));
        if self.unsubscribe_error {
            Err(TransportError::Other("Not subscribed".to_string()))
        } else {
            Ok(())
        }
    }

    async fn disconnected(&self, _connection: &MockConnection) {
        match self.lose_connection_after {
            Some(delay) => sleep(delay).await,
            None => futures::future::pending().await,
        }
    }

    async fn scan(
        &self,
        duration: Duration,
        on_advertisement: &mut (dyn FnMut(Advertisement) + Send),
    ) -> Result<(), TransportError> {
        self.record(Call::Scan(duration));
        for advertisement in &self.advertisements {
            on_advertisement(advertisement.clone());
        }
        Ok(())
    }
}
