//! Defines shared data structures for the Bluetooth module.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::bluetooth::constants::{BLUETOOTH_BASE_UUID, DEFAULT_SCAN_DURATION_MS};
use crate::core::bluetooth::error::{BleError, BleResult};

/// Global radio state as reported by the adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum BleState {
    #[default]
    Unknown = 0,
    Resetting = 1,
    Unsupported = 2,
    Unauthorized = 3,
    PoweredOff = 4,
    PoweredOn = 5,
}

/// Connection state of a single peripheral.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum ConnectionState {
    #[default]
    Disconnected = 0,
    Connecting = 1,
    Connected = 2,
    Disconnecting = 3,
}

/// Power/latency tradeoff for scanning. Advisory only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum ScanMode {
    LowPower = 0,
    #[default]
    Balanced = 1,
    LowLatency = 2,
    Opportunistic = 3,
}

macro_rules! wire_enum {
    ($ty:ident { $($variant:ident = $value:literal),+ $(,)? }) => {
        impl $ty {
            /// Stable integer value used on the command boundary.
            pub fn as_wire(self) -> i32 {
                self as u8 as i32
            }
        }

        impl TryFrom<i32> for $ty {
            type Error = BleError;

            fn try_from(value: i32) -> BleResult<Self> {
                match value {
                    $($value => Ok(Self::$variant),)+
                    other => Err(BleError::InvalidArgument(format!(
                        "{} is not a valid {}",
                        other,
                        stringify!($ty)
                    ))),
                }
            }
        }
    };
}

wire_enum!(BleState {
    Unknown = 0,
    Resetting = 1,
    Unsupported = 2,
    Unauthorized = 3,
    PoweredOff = 4,
    PoweredOn = 5,
});

wire_enum!(ConnectionState {
    Disconnected = 0,
    Connecting = 1,
    Connected = 2,
    Disconnecting = 3,
});

wire_enum!(ScanMode {
    LowPower = 0,
    Balanced = 1,
    LowLatency = 2,
    Opportunistic = 3,
});

/// Options for a scan session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScanOptions {
    pub mode: ScanMode,
    /// Scan length in milliseconds, ignored when `continuous` is set
    pub duration_ms: u64,
    pub continuous: bool,
    pub allow_duplicates: bool,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            mode: ScanMode::default(),
            duration_ms: DEFAULT_SCAN_DURATION_MS,
            continuous: false,
            allow_duplicates: false,
        }
    }
}

/// Connection parameter hints. The adapter is free to ignore them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionParameters {
    /// Minimum connection interval in 1.25 ms units
    pub min_interval: u16,
    /// Maximum connection interval in 1.25 ms units
    pub max_interval: u16,
    pub slave_latency: u16,
    /// Supervision timeout in 10 ms units
    pub supervision_timeout: u16,
}

impl Default for ConnectionParameters {
    fn default() -> Self {
        Self {
            min_interval: 24,
            max_interval: 40,
            slave_latency: 0,
            supervision_timeout: 500,
        }
    }
}

impl ConnectionParameters {
    pub fn validate(&self) -> BleResult<()> {
        if self.min_interval == 0 || self.min_interval > self.max_interval {
            return Err(BleError::InvalidArgument(format!(
                "connection interval range {}..{} is invalid",
                self.min_interval, self.max_interval
            )));
        }
        if self.supervision_timeout == 0 {
            return Err(BleError::InvalidArgument(
                "supervision timeout must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Arguments of a connect request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConnectOptions {
    /// Falls back to the configured connect timeout when absent
    pub timeout_ms: Option<u64>,
    pub auto_reconnect: bool,
    /// Keeps the previous parameters when absent
    pub params: Option<ConnectionParameters>,
}

/// Supported operations on a characteristic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CharacteristicProperties {
    pub read: bool,
    pub write: bool,
    pub write_without_response: bool,
    pub notify: bool,
    pub indicate: bool,
}

impl CharacteristicProperties {
    pub fn is_writable(&self) -> bool {
        self.write || self.write_without_response
    }

    pub fn is_notifiable(&self) -> bool {
        self.notify || self.indicate
    }
}

/// Delivery mode for a characteristic write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WriteMode {
    WithResponse,
    WithoutResponse,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Characteristic {
    pub uuid: Uuid,
    pub properties: CharacteristicProperties,
    /// Last value read or notified
    pub value: Option<Vec<u8>>,
}

impl Characteristic {
    pub fn new(uuid: Uuid, properties: CharacteristicProperties) -> Self {
        Self {
            uuid,
            properties,
            value: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Service {
    pub uuid: Uuid,
    pub is_primary: bool,
    pub characteristics: Vec<Characteristic>,
}

impl Service {
    pub fn characteristic(&self, uuid: Uuid) -> Option<&Characteristic> {
        self.characteristics.iter().find(|c| c.uuid == uuid)
    }
}

/// Parses a UUID, expanding 16- and 32-bit short forms onto the Bluetooth base UUID.
pub fn parse_uuid(s: &str) -> BleResult<Uuid> {
    let trimmed = s.trim();
    let is_short = matches!(trimmed.len(), 4 | 8) && trimmed.chars().all(|c| c.is_ascii_hexdigit());
    if is_short {
        let short = u32::from_str_radix(trimmed, 16)
            .map_err(|e| BleError::InvalidArgument(format!("invalid UUID {:?}: {}", s, e)))?;
        return Ok(Uuid::from_u128(BLUETOOTH_BASE_UUID.as_u128() | ((short as u128) << 96)));
    }
    Uuid::parse_str(trimmed).map_err(|e| BleError::InvalidArgument(format!("invalid UUID {:?}: {}", s, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::bluetooth::constants::UUID_BATTERY_SERVICE;

    #[test]
    fn wire_values_are_stable() {
        assert_eq!(BleState::Unknown.as_wire(), 0);
        assert_eq!(BleState::PoweredOn.as_wire(), 5);
        assert_eq!(ConnectionState::Disconnecting.as_wire(), 3);
        assert_eq!(ScanMode::Opportunistic.as_wire(), 3);
        assert_eq!(BleState::try_from(4).unwrap(), BleState::PoweredOff);
        assert_eq!(ConnectionState::try_from(1).unwrap(), ConnectionState::Connecting);
        assert!(ScanMode::try_from(9).is_err());
    }

    #[test]
    fn short_uuids_expand_on_base() {
        assert_eq!(parse_uuid("180F").unwrap(), UUID_BATTERY_SERVICE);
        assert_eq!(parse_uuid("0000180f").unwrap(), UUID_BATTERY_SERVICE);
        assert_eq!(
            parse_uuid("0000180f-0000-1000-8000-00805f9b34fb").unwrap(),
            UUID_BATTERY_SERVICE
        );
        assert!(matches!(parse_uuid("xyz"), Err(BleError::InvalidArgument(_))));
        assert!(matches!(parse_uuid(""), Err(BleError::InvalidArgument(_))));
    }

    #[test]
    fn connection_parameters_validation() {
        assert!(ConnectionParameters::default().validate().is_ok());
        let inverted = ConnectionParameters {
            min_interval: 80,
            max_interval: 40,
            ..Default::default()
        };
        assert!(inverted.validate().is_err());
    }

    #[test]
    fn capability_helpers() {
        let props = CharacteristicProperties {
            indicate: true,
            ..Default::default()
        };
        assert!(props.is_notifiable());
        assert!(!props.is_writable());
    }
}
