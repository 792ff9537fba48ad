//! Bluetooth functionality for the BLE central
//! This module handles all bluetooth operations including scanning,
//! connection lifecycles, GATT requests and event fan-out.

mod adapter;
#[cfg(feature = "bluest")]
mod bluest_adapter;
mod connection;
mod constants;
mod device;
mod error;
mod events;
mod gatt;
mod manager;
pub mod mock;
mod scanner;
mod types;

// Re-export types that should be publicly accessible
pub use adapter::{Adapter, AdapterEvent, AdapterResult};
#[cfg(feature = "bluest")]
pub use bluest_adapter::BluestAdapter;
pub use connection::{BUS_LOG_TARGET, LinkState, PeripheralSession};
pub use constants::*; // Re-export all constants
pub use device::{Device, ManufacturerDataFilter, ScanFilter};
pub use error::{AdapterError, BleError, BleResult};
pub use events::{BleEvent, EventBus, EventKind, LogMessage, Subscription};
pub use gatt::{OperationKey, OperationKind};
pub use manager::SessionManager;
pub use scanner::{BluetoothScanner, Observation};
pub use types::{
    BleState, Characteristic, CharacteristicProperties, ConnectOptions, ConnectionParameters, ConnectionState,
    ScanMode, ScanOptions, Service, WriteMode, parse_uuid,
};
