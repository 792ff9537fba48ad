//! Constants used throughout the session layer
//! This module contains protocol limits, default timeouts and
//! the Bluetooth base UUID used to expand short-form identifiers.

use uuid::Uuid;

/// Bluetooth base UUID (0000xxxx-0000-1000-8000-00805F9B34FB)
pub const BLUETOOTH_BASE_UUID: Uuid = Uuid::from_u128(0x00000000_0000_1000_8000_00805f9b34fb);

/// Standard Bluetooth Service UUIDs
pub const UUID_GENERIC_ACCESS_SERVICE: Uuid = Uuid::from_u128(0x00001800_0000_1000_8000_00805f9b34fb);
pub const UUID_DEVICE_INFORMATION_SERVICE: Uuid = Uuid::from_u128(0x0000180a_0000_1000_8000_00805f9b34fb);
pub const UUID_BATTERY_SERVICE: Uuid = Uuid::from_u128(0x0000180f_0000_1000_8000_00805f9b34fb);

/// Standard Bluetooth Characteristic UUIDs
pub const UUID_DEVICE_NAME: Uuid = Uuid::from_u128(0x00002a00_0000_1000_8000_00805f9b34fb);
pub const UUID_BATTERY_LEVEL: Uuid = Uuid::from_u128(0x00002a19_0000_1000_8000_00805f9b34fb);

/// ATT MTU before any exchange, and the allowed negotiation range
pub const DEFAULT_MTU: u16 = 23;
pub const MIN_MTU: u16 = 23;
pub const MAX_MTU: u16 = 512;

/// Opcode + handle bytes preceding every ATT write/notify payload
pub const ATT_HEADER_SIZE: usize = 3;

/// Timeout for a connection attempt in milliseconds
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;

/// Timeout for Bluetooth operations in milliseconds
pub const BLUETOOTH_OPERATION_TIMEOUT_MS: u64 = 10_000;

/// Delay before the single reconnect attempt after an unsolicited disconnect
pub const RECONNECT_DELAY_MS: u64 = 3_000;

/// Scan duration in milliseconds
pub const DEFAULT_SCAN_DURATION_MS: u64 = 5_000;
