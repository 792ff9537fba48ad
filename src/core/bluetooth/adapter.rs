//! Radio adapter interface
//! The session layer drives the platform Bluetooth stack only through this
//! trait. Every call is asynchronous; unsolicited activity (advertisements,
//! link loss, notifications, radio state changes) arrives as [`AdapterEvent`]s
//! on the channel handed to the session manager at init.

use async_trait::async_trait;
use uuid::Uuid;

use crate::core::bluetooth::device::Device;
use crate::core::bluetooth::error::AdapterError;
use crate::core::bluetooth::types::{BleState, ConnectionParameters, ScanMode, Service, WriteMode};

pub type AdapterResult<T> = Result<T, AdapterError>;

/// Capability set the platform Bluetooth stack must provide.
#[async_trait]
pub trait Adapter: Send + Sync {
    /// Current global radio state
    async fn radio_state(&self) -> BleState;

    /// Asks the platform for Bluetooth permissions. Returns whether they are granted.
    async fn request_permissions(&self) -> AdapterResult<bool> {
        Ok(self.radio_state().await != BleState::Unauthorized)
    }

    /// Starts delivering [`AdapterEvent::Advertisement`]s
    async fn start_scan(&self, services: &[Uuid], allow_duplicates: bool, mode: ScanMode) -> AdapterResult<()>;

    async fn stop_scan(&self) -> AdapterResult<()>;

    /// Resolves once the link is established or has failed
    async fn connect(&self, id: &str, params: &ConnectionParameters) -> AdapterResult<()>;

    /// Aborts an outstanding connect request
    async fn cancel_connect(&self, id: &str) -> AdapterResult<()>;

    async fn disconnect(&self, id: &str) -> AdapterResult<()>;

    /// Full service and characteristic tree of a connected peripheral
    async fn discover_services(&self, id: &str) -> AdapterResult<Vec<Service>>;

    async fn read_characteristic(&self, id: &str, service: Uuid, characteristic: Uuid) -> AdapterResult<Vec<u8>>;

    async fn write_characteristic(
        &self,
        id: &str,
        service: Uuid,
        characteristic: Uuid,
        value: &[u8],
        mode: WriteMode,
    ) -> AdapterResult<()>;

    async fn set_notify(&self, id: &str, service: Uuid, characteristic: Uuid, enabled: bool) -> AdapterResult<()>;

    async fn read_rssi(&self, id: &str) -> AdapterResult<i16>;

    /// Returns the MTU actually negotiated
    async fn request_mtu(&self, id: &str, mtu: u16) -> AdapterResult<u16>;

    async fn update_connection_parameters(&self, _id: &str, _params: &ConnectionParameters) -> AdapterResult<()> {
        Ok(())
    }
}

/// Unsolicited activity reported by the adapter.
#[derive(Debug, Clone, PartialEq)]
pub enum AdapterEvent {
    RadioStateChanged(BleState),
    Advertisement(Device),
    /// Link lost without a local disconnect request
    Disconnected { id: String, reason: Option<String> },
    Notification {
        id: String,
        service: Uuid,
        characteristic: Uuid,
        value: Vec<u8>,
    },
    /// MTU renegotiated by the remote side
    MtuChanged { id: String, mtu: u16 },
}
