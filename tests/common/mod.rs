// Shared fixtures for the integration tests

#![allow(dead_code)]

use std::sync::Arc;

use ble_central_lib::SessionConfig;
use ble_central_lib::core::bluetooth::mock::MockAdapter;
use ble_central_lib::core::bluetooth::{
    Characteristic, CharacteristicProperties, SessionManager, Service, parse_uuid,
};
use uuid::Uuid;

pub const SENSOR: &str = "C4:7C:8D:6A:11:02";

pub fn service_uuid() -> Uuid {
    parse_uuid("6e400001-b5a3-f393-e0a9-e50e24dcca9e").unwrap()
}

/// Acknowledged writes only
pub fn control_point() -> Uuid {
    parse_uuid("6e400002-b5a3-f393-e0a9-e50e24dcca9e").unwrap()
}

/// Notify only
pub fn telemetry() -> Uuid {
    parse_uuid("6e400003-b5a3-f393-e0a9-e50e24dcca9e").unwrap()
}

/// Read only
pub fn firmware_revision() -> Uuid {
    parse_uuid("2a26").unwrap()
}

/// Write without response
pub fn stream_in() -> Uuid {
    parse_uuid("6e400004-b5a3-f393-e0a9-e50e24dcca9e").unwrap()
}

pub fn sensor_tree() -> Vec<Service> {
    let none = CharacteristicProperties::default();
    vec![Service {
        uuid: service_uuid(),
        is_primary: true,
        characteristics: vec![
            Characteristic::new(control_point(), CharacteristicProperties { write: true, ..none }),
            Characteristic::new(telemetry(), CharacteristicProperties { notify: true, ..none }),
            Characteristic::new(firmware_revision(), CharacteristicProperties { read: true, ..none }),
            Characteristic::new(
                stream_in(),
                CharacteristicProperties {
                    write: true,
                    write_without_response: true,
                    ..none
                },
            ),
        ],
    }]
}

pub async fn manager_with(config: SessionConfig) -> (Arc<MockAdapter>, SessionManager) {
    let (adapter, events) = MockAdapter::new();
    adapter.set_services(SENSOR, sensor_tree());
    let manager = SessionManager::init(adapter.clone(), events, config).await;
    (adapter, manager)
}

pub async fn manager() -> (Arc<MockAdapter>, SessionManager) {
    manager_with(SessionConfig::default()).await
}

/// Lets spawned tasks (the event router, reconnect timers) run.
pub async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}
