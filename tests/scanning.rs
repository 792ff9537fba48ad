// Scan sessions: filtering, de-duplication and lifecycle events

mod common;

use std::time::Duration;

use ble_central_lib::core::bluetooth::mock::AdapterCall;
use ble_central_lib::core::bluetooth::{
    BleEvent, Device, EventKind, ManufacturerDataFilter, ScanFilter, ScanOptions, parse_uuid,
};

use common::{SENSOR, manager, settle};

fn continuous(allow_duplicates: bool) -> Option<ScanOptions> {
    Some(ScanOptions {
        continuous: true,
        allow_duplicates,
        ..Default::default()
    })
}

fn discovered_ids(events: Vec<BleEvent>) -> Vec<String> {
    events
        .into_iter()
        .filter_map(|event| match event {
            BleEvent::DeviceDiscovered(device) => Some(device.id),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn repeated_advertisements_are_reported_once() {
    let (adapter, manager) = manager().await;
    let mut found = manager.subscribe(&[EventKind::DeviceDiscovered]);
    manager.start_scan(None, continuous(false)).await.unwrap();

    adapter.advertise(Device::new(SENSOR, -60));
    adapter.advertise(Device::new(SENSOR, -58));
    settle().await;

    assert_eq!(discovered_ids(found.drain()), vec![SENSOR.to_string()]);
    // The latest observation is still recorded.
    assert_eq!(manager.discovered_devices()[0].rssi, -58);
}

#[tokio::test]
async fn allow_duplicates_reports_every_advertisement() {
    let (adapter, manager) = manager().await;
    let mut found = manager.subscribe(&[EventKind::DeviceDiscovered]);
    manager.start_scan(None, continuous(true)).await.unwrap();

    adapter.advertise(Device::new(SENSOR, -60));
    adapter.advertise(Device::new(SENSOR, -58));
    settle().await;

    assert_eq!(discovered_ids(found.drain()).len(), 2);
}

#[tokio::test]
async fn weak_signals_are_filtered_out() {
    let (adapter, manager) = manager().await;
    let mut found = manager.subscribe(&[EventKind::DeviceDiscovered]);
    let filter = ScanFilter {
        min_rssi: Some(-70),
        ..Default::default()
    };
    manager.start_scan(Some(filter), continuous(false)).await.unwrap();

    adapter.advertise(Device::new("far", -85));
    adapter.advertise(Device::new("near", -60));
    settle().await;

    assert_eq!(discovered_ids(found.drain()), vec!["near".to_string()]);
    assert!(manager.session("far").is_none());
}

#[tokio::test]
async fn every_predicate_must_hold() {
    let (adapter, manager) = manager().await;
    let mut found = manager.subscribe(&[EventKind::DeviceDiscovered]);
    let heart_rate = parse_uuid("180d").unwrap();
    let filter = ScanFilter {
        service_uuids: Some(vec![heart_rate]),
        name_prefix: Some("Polar".to_string()),
        manufacturer_data: Some(ManufacturerDataFilter {
            company_id: 0x006b,
            data_prefix: None,
        }),
        ..Default::default()
    };
    manager.start_scan(Some(filter), continuous(false)).await.unwrap();

    let matching = Device::new("strap", -50)
        .with_name("Polar H10")
        .with_service(heart_rate)
        .with_manufacturer_data(0x006b, vec![0x33]);
    adapter.advertise(matching.clone());
    adapter.advertise(Device { id: "wrong-name".into(), name: Some("Garmin".into()), ..matching.clone() });
    adapter.advertise(Device {
        id: "no-service".into(),
        service_uuids: Default::default(),
        ..matching.clone()
    });
    adapter.advertise(Device {
        id: "no-vendor".into(),
        manufacturer_data: None,
        ..matching
    });
    settle().await;

    assert_eq!(discovered_ids(found.drain()), vec!["strap".to_string()]);
    assert!(adapter.calls().contains(&AdapterCall::StartScan {
        services: vec![heart_rate],
        allow_duplicates: false,
        mode: Default::default(),
    }));
}

#[tokio::test(start_paused = true)]
async fn scan_ends_after_configured_duration() {
    let (adapter, manager) = manager().await;
    let mut lifecycle = manager.subscribe(&[EventKind::ScanStarted, EventKind::ScanFinished]);
    manager.start_scan(None, None).await.unwrap();
    assert!(manager.is_scanning());

    tokio::time::sleep(Duration::from_millis(4_900)).await;
    assert!(manager.is_scanning());
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!manager.is_scanning());

    assert_eq!(lifecycle.drain(), vec![BleEvent::ScanStarted, BleEvent::ScanFinished]);
    assert_eq!(adapter.count_calls(|c| *c == AdapterCall::StopScan), 1);

    // Advertisements after the scan are ignored.
    adapter.advertise(Device::new(SENSOR, -40));
    settle().await;
    assert!(manager.session(SENSOR).is_none());
}

#[tokio::test]
async fn restarting_clears_previous_results() {
    let (adapter, manager) = manager().await;
    manager.start_scan(None, continuous(false)).await.unwrap();
    adapter.advertise(Device::new("old", -50));
    settle().await;
    assert_eq!(manager.discovered_devices().len(), 1);

    let mut lifecycle = manager.subscribe(&[EventKind::ScanStarted, EventKind::ScanFinished]);
    manager.start_scan(None, continuous(false)).await.unwrap();
    assert!(manager.discovered_devices().is_empty());
    assert_eq!(lifecycle.drain(), vec![BleEvent::ScanFinished, BleEvent::ScanStarted]);
}

#[tokio::test]
async fn stop_scan_is_idempotent() {
    let (adapter, manager) = manager().await;
    manager.start_scan(None, continuous(false)).await.unwrap();
    manager.stop_scan().await.unwrap();
    manager.stop_scan().await.unwrap();
    assert!(!manager.is_scanning());
    assert_eq!(adapter.count_calls(|c| *c == AdapterCall::StopScan), 1);
}
