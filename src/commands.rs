//! Command boundary
//! This module defines the commands an embedding application invokes. Binary
//! payloads travel as hex strings, UUIDs as strings (16/32-bit short forms are
//! expanded), enumerations as their stable integers, and every error is
//! flattened to its message.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::{Value, json};

use crate::core::bluetooth::{
    BleError, BleEvent, BleResult, ConnectOptions, ConnectionParameters, Device, ScanFilter, ScanOptions, Service,
    SessionManager, parse_uuid,
};
use crate::core::codec::{bytes_to_hex, hex_to_bytes};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CharacteristicDto {
    pub uuid: String,
    pub read: bool,
    pub write: bool,
    pub write_without_response: bool,
    pub notify: bool,
    pub indicate: bool,
    /// Last known value as hex
    pub value: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceDto {
    pub uuid: String,
    pub is_primary: bool,
    pub characteristics: Vec<CharacteristicDto>,
}

impl From<&Service> for ServiceDto {
    fn from(service: &Service) -> Self {
        ServiceDto {
            uuid: service.uuid.to_string(),
            is_primary: service.is_primary,
            characteristics: service
                .characteristics
                .iter()
                .map(|c| CharacteristicDto {
                    uuid: c.uuid.to_string(),
                    read: c.properties.read,
                    write: c.properties.write,
                    write_without_response: c.properties.write_without_response,
                    notify: c.properties.notify,
                    indicate: c.properties.indicate,
                    value: c.value.as_deref().map(bytes_to_hex),
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceDto {
    pub id: String,
    pub name: Option<String>,
    pub rssi: i16,
    /// Company ID to hex payload
    pub manufacturer_data: Option<BTreeMap<u16, String>>,
    pub service_uuids: Vec<String>,
    pub tx_power: Option<i16>,
    pub connectable: bool,
}

impl From<&Device> for DeviceDto {
    fn from(device: &Device) -> Self {
        DeviceDto {
            id: device.id.clone(),
            name: device.name.clone(),
            rssi: device.rssi,
            manufacturer_data: device.manufacturer_data.as_ref().map(|data| {
                data.iter()
                    .map(|(company, payload)| (*company, bytes_to_hex(payload)))
                    .collect()
            }),
            service_uuids: device.service_uuids.iter().map(|u| u.to_string()).collect(),
            tx_power: device.tx_power,
            connectable: device.connectable,
        }
    }
}

fn to_message(e: BleError) -> String {
    e.to_string()
}

fn decode_payload(hex: &str) -> BleResult<Vec<u8>> {
    hex_to_bytes(hex).map_err(|e| match e {
        BleError::InvalidEncoding(reason) => BleError::InvalidArgument(format!("bad hex payload: {}", reason)),
        other => other,
    })
}

/// Starts scanning. Emits `scanStarted`, then `deviceDiscovered` per match.
pub async fn scan(
    manager: &SessionManager,
    filter: Option<ScanFilter>,
    options: Option<ScanOptions>,
) -> Result<(), String> {
    manager.start_scan(filter, options).await.map_err(to_message)
}

pub async fn stop_scan(manager: &SessionManager) -> Result<(), String> {
    manager.stop_scan().await.map_err(to_message)
}

/// Connects to a peripheral
///
/// # Arguments
/// * `device_id` - The platform identifier reported in `deviceDiscovered`
/// * `timeout_ms` - Connect deadline; the configured default when absent
/// * `auto_reconnect` - Schedule one reconnect after an unsolicited disconnect
/// * `conn_params` - Connection parameter hints
pub async fn connect(
    manager: &SessionManager,
    device_id: &str,
    timeout_ms: Option<i64>,
    auto_reconnect: bool,
    conn_params: Option<ConnectionParameters>,
) -> Result<(), String> {
    let timeout_ms = match timeout_ms {
        Some(ms) if ms <= 0 => return Err(to_message(BleError::InvalidArgument(format!(
            "connect timeout {} must be positive",
            ms
        )))),
        Some(ms) => Some(ms as u64),
        None => None,
    };
    let options = ConnectOptions {
        timeout_ms,
        auto_reconnect,
        params: conn_params,
    };
    manager.connect(device_id, options).await.map_err(to_message)
}

pub async fn disconnect(manager: &SessionManager, device_id: &str) -> Result<(), String> {
    manager.disconnect(device_id).await.map_err(to_message)
}

pub fn is_connected(manager: &SessionManager, device_id: &str) -> bool {
    manager.is_connected(device_id)
}

pub fn get_connection_state(manager: &SessionManager, device_id: &str) -> i32 {
    manager.get_connection_state(device_id).as_wire()
}

/// Reads a characteristic and returns its value as hex
pub async fn read_characteristic(
    manager: &SessionManager,
    device_id: &str,
    service_uuid: &str,
    characteristic_uuid: &str,
) -> Result<String, String> {
    let service = parse_uuid(service_uuid).map_err(to_message)?;
    let characteristic = parse_uuid(characteristic_uuid).map_err(to_message)?;
    manager
        .read_characteristic(device_id, service, characteristic)
        .await
        .map(|value| bytes_to_hex(&value))
        .map_err(to_message)
}

pub async fn write_characteristic(
    manager: &SessionManager,
    device_id: &str,
    service_uuid: &str,
    characteristic_uuid: &str,
    hex_value: &str,
) -> Result<(), String> {
    let service = parse_uuid(service_uuid).map_err(to_message)?;
    let characteristic = parse_uuid(characteristic_uuid).map_err(to_message)?;
    let value = decode_payload(hex_value).map_err(to_message)?;
    manager
        .write_characteristic(device_id, service, characteristic, &value)
        .await
        .map_err(to_message)
}

pub async fn enable_notifications(
    manager: &SessionManager,
    device_id: &str,
    service_uuid: &str,
    characteristic_uuid: &str,
    enabled: bool,
) -> Result<(), String> {
    let service = parse_uuid(service_uuid).map_err(to_message)?;
    let characteristic = parse_uuid(characteristic_uuid).map_err(to_message)?;
    manager
        .enable_notifications(device_id, service, characteristic, enabled)
        .await
        .map_err(to_message)
}

pub async fn discover_services(manager: &SessionManager, device_id: &str) -> Result<Vec<ServiceDto>, String> {
    manager
        .discover_services(device_id)
        .await
        .map(|tree| tree.iter().map(ServiceDto::from).collect())
        .map_err(to_message)
}

pub fn get_bluetooth_state(manager: &SessionManager) -> i32 {
    manager.get_bluetooth_state().as_wire()
}

/// Requests an MTU and returns the negotiated value
pub async fn request_mtu(manager: &SessionManager, device_id: &str, mtu: i64) -> Result<u16, String> {
    if mtu <= 0 {
        return Err(to_message(BleError::InvalidArgument(format!("MTU {} must be positive", mtu))));
    }
    let mtu = u16::try_from(mtu).unwrap_or(u16::MAX);
    manager.request_mtu(device_id, mtu).await.map_err(to_message)
}

pub async fn update_connection_parameters(
    manager: &SessionManager,
    device_id: &str,
    params: ConnectionParameters,
) -> Result<(), String> {
    manager
        .update_connection_parameters(device_id, params)
        .await
        .map_err(to_message)
}

pub async fn read_rssi(manager: &SessionManager, device_id: &str) -> Result<i16, String> {
    manager.read_rssi(device_id).await.map_err(to_message)
}

pub async fn request_permissions(manager: &SessionManager) -> Result<bool, String> {
    manager.request_permissions().await.map_err(to_message)
}

/// Event name and JSON payload delivered to the embedding application.
pub fn event_payload(event: &BleEvent) -> (&'static str, Value) {
    match event {
        BleEvent::BluetoothStateChanged(state) => ("bluetoothStateChanged", json!({ "state": state.as_wire() })),
        BleEvent::DeviceDiscovered(device) => (
            "deviceDiscovered",
            serde_json::to_value(DeviceDto::from(device)).unwrap_or(Value::Null),
        ),
        BleEvent::ConnectionStateChanged { id, state } => (
            "connectionStateChanged",
            json!({ "deviceId": id, "state": state.as_wire() }),
        ),
        BleEvent::NotificationReceived {
            id,
            service,
            characteristic,
            value,
        } => (
            "notificationReceived",
            json!({
                "deviceId": id,
                "serviceUuid": service.to_string(),
                "characteristicUuid": characteristic.to_string(),
                "value": bytes_to_hex(value),
            }),
        ),
        BleEvent::MtuUpdated { id, mtu } => ("mtuUpdated", json!({ "deviceId": id, "mtu": mtu })),
        BleEvent::RssiUpdated { id, rssi } => ("rssiUpdated", json!({ "deviceId": id, "rssi": rssi })),
        BleEvent::Log(message) => ("log", serde_json::to_value(message).unwrap_or(Value::Null)),
        BleEvent::ScanStarted => ("scanStarted", Value::Null),
        BleEvent::ScanFinished => ("scanFinished", Value::Null),
    }
}
