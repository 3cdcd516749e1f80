//! Exploring a peripheral's GATT table against a scripted transport.

mod common;

use common::{
    address, battery_level, control, data, device_name, firmware_revision, Call, MockTransport,
};
use gatt_stream::{explore, ExploreError, Transport};

#[tokio::test]
async fn reads_every_readable_characteristic() {
    let transport = MockTransport::probe();

    let inventory = explore(&transport, &address()).await.unwrap();

    assert_eq!(inventory.address, address());
    assert_eq!(inventory.services.len(), 3);
    assert_eq!(inventory.characteristic_count(), 5);

    let name = inventory.find(device_name()).unwrap();
    assert_eq!(name.value.as_ref().unwrap().as_ref().unwrap(), b"Probe");
    let firmware = inventory.find(firmware_revision()).unwrap();
    assert_eq!(
        firmware.value.as_ref().unwrap().as_ref().unwrap(),
        &vec![0x01, 0xfe]
    );

    // A failed read is recorded rather than aborting the listing.
    let battery = inventory.find(battery_level()).unwrap();
    assert!(matches!(battery.value, Some(Err(_))));

    // Characteristics which can't be read are not attempted.
    assert!(inventory.find(control()).unwrap().value.is_none());
    assert!(inventory.find(data()).unwrap().value.is_none());
    assert_eq!(inventory.find(data()).unwrap().descriptors.len(), 1);

    assert_eq!(
        transport.calls(),
        vec![
            Call::Connect(address()),
            Call::ListServices,
            Call::Read(device_name()),
            Call::Read(battery_level()),
            Call::Read(firmware_revision()),
            Call::Disconnect,
        ]
    );
}

#[tokio::test]
async fn connect_error_is_reported() {
    let transport = MockTransport::probe().failing_connect();

    let result = explore(&transport, &address()).await;

    assert!(matches!(result, Err(ExploreError::Connect { .. })));
    assert_eq!(transport.calls(), vec![Call::Connect(address())]);
}

#[tokio::test]
async fn read_characteristic_directly() {
    let transport = MockTransport::probe();
    let connection = transport.connect(&address()).await.unwrap();
    assert_eq!(
        transport
            .read_characteristic(&connection, device_name())
            .await
            .unwrap(),
        b"Probe".to_vec()
    );
    transport.disconnect(&connection).await.unwrap();
}
