//! Scanning against a scripted transport.

mod common;

use common::{Call, MockTransport};
use gatt_stream::{Advertisement, MacAddress, ScanFilter, ScanSession};
use std::time::Duration;

fn advertisement(address: &str, name: Option<&str>, rssi: i16) -> Advertisement {
    let mut advertisement = Advertisement::new(address.parse().unwrap());
    advertisement.name = name.map(ToOwned::to_owned);
    advertisement.rssi = Some(rssi);
    advertisement
}

fn advertisements() -> Vec<Advertisement> {
    vec![
        advertisement("11:11:11:11:11:11", Some("Kitchen Probe"), -60),
        advertisement("22:22:22:22:22:22", None, -70),
        advertisement("11:11:11:11:11:11", Some("Kitchen Probe"), -58),
        advertisement("33:33:33:33:33:33", Some("Thermometer"), -80),
        advertisement("44:44:44:44:44:44", Some(""), -90),
        advertisement("22:22:22:22:22:22", None, -72),
    ]
}

#[tokio::test]
async fn reports_each_device_once() {
    let transport = MockTransport::probe().advertising(advertisements());
    let mut session = ScanSession::new(ScanFilter::default());
    let mut reported = vec![];

    let count = session
        .run(&transport, Duration::from_secs(5), |advertisement| {
            reported.push(advertisement.clone())
        })
        .await
        .unwrap();

    assert_eq!(count, 4);
    assert_eq!(reported.len(), 4);
    assert_eq!(reported[0].rssi, Some(-60));
    assert_eq!(transport.calls(), vec![Call::Scan(Duration::from_secs(5))]);
}

#[tokio::test]
async fn filters_by_name() {
    let transport = MockTransport::probe().advertising(advertisements());
    let mut session = ScanSession::new(ScanFilter {
        name_contains: Some("probe".to_string()),
        only_named: true,
    });
    let mut reported = vec![];

    let count = session
        .run(&transport, Duration::from_secs(5), |advertisement| {
            reported.push(advertisement.address)
        })
        .await
        .unwrap();

    assert_eq!(count, 1);
    assert_eq!(
        reported,
        vec!["11:11:11:11:11:11".parse::<MacAddress>().unwrap()]
    );
}

#[tokio::test]
async fn name_filter_keeps_unnamed_devices() {
    let transport = MockTransport::probe().advertising(advertisements());
    let mut session = ScanSession::new(ScanFilter {
        name_contains: Some("probe".to_string()),
        only_named: false,
    });

    let count = session
        .run(&transport, Duration::from_secs(5), |_| {})
        .await
        .unwrap();

    // The probe, plus the two devices without a usable name.
    assert_eq!(count, 3);
}

#[tokio::test]
async fn each_run_starts_afresh() {
    let transport = MockTransport::probe().advertising(advertisements());
    let mut session = ScanSession::new(ScanFilter::default());

    let first = session
        .run(&transport, Duration::from_secs(1), |_| {})
        .await
        .unwrap();
    let second = session
        .run(&transport, Duration::from_secs(1), |_| {})
        .await
        .unwrap();

    assert_eq!(first, 4);
    assert_eq!(second, 4);
}
