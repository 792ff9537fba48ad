//! Session manager for BLE central operations
//! This module provides the main interface: it owns the scanner and one
//! [`PeripheralSession`] per known peripheral, and routes unsolicited adapter
//! events to them.

use std::collections::HashMap;
use std::sync::Arc;

use log::{debug, error, info, warn};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::SessionConfig;
use crate::core::bluetooth::adapter::{Adapter, AdapterEvent};
use crate::core::bluetooth::connection::{PeripheralSession, SessionContext};
use crate::core::bluetooth::device::{Device, ScanFilter};
use crate::core::bluetooth::error::{BleError, BleResult};
use crate::core::bluetooth::events::{BleEvent, EventBus, EventKind, Subscription};
use crate::core::bluetooth::scanner::{BluetoothScanner, Observation};
use crate::core::bluetooth::types::{
    BleState, ConnectOptions, ConnectionParameters, ConnectionState, ScanOptions, Service,
};

struct ManagerInner {
    ctx: Arc<SessionContext>,
    scanner: Arc<BluetoothScanner>,
    /// Map of peripheral identifiers to sessions
    sessions: Mutex<HashMap<String, Arc<PeripheralSession>>>,
    radio_state: Mutex<BleState>,
    shutdown_token: CancellationToken,
    router_handle: Mutex<Option<JoinHandle<()>>>,
}

/// Manages scanning and every peripheral session. Cheap to clone.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<ManagerInner>,
}

impl SessionManager {
    /// Creates the manager and starts routing `events` from `adapter`.
    pub async fn init(
        adapter: Arc<dyn Adapter>,
        events: mpsc::UnboundedReceiver<AdapterEvent>,
        config: SessionConfig,
    ) -> Self {
        let bus = Arc::new(EventBus::new());
        let radio_state = adapter.radio_state().await;
        info!("Bluetooth adapter reports {:?}", radio_state);

        let scanner = BluetoothScanner::new(adapter.clone(), bus.clone());
        let ctx = Arc::new(SessionContext { adapter, bus, config });

        let manager = Self {
            inner: Arc::new(ManagerInner {
                ctx,
                scanner,
                sessions: Mutex::new(HashMap::new()),
                radio_state: Mutex::new(radio_state),
                shutdown_token: CancellationToken::new(),
                router_handle: Mutex::new(None),
            }),
        };

        let handle = tokio::spawn(Self::route_events(manager.inner.clone(), events));
        *manager.inner.router_handle.lock() = Some(handle);
        info!("Session manager initialized.");
        manager
    }

    async fn route_events(inner: Arc<ManagerInner>, mut events: mpsc::UnboundedReceiver<AdapterEvent>) {
        loop {
            tokio::select! {
                _ = inner.shutdown_token.cancelled() => {
                    debug!("Event router received shutdown signal.");
                    break;
                }
                event = events.recv() => match event {
                    Some(event) => inner.dispatch(event),
                    None => {
                        warn!("Adapter event stream closed.");
                        break;
                    }
                },
            }
        }
    }

    /// Shared event bus
    pub fn bus(&self) -> Arc<EventBus> {
        self.inner.ctx.bus.clone()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.ctx.config
    }

    /// Subscribes to the given event kinds; an empty slice means all kinds.
    pub fn subscribe(&self, kinds: &[EventKind]) -> Subscription {
        self.inner.ctx.bus.subscribe(kinds)
    }

    /// Session for `id`, if the peripheral is known.
    pub fn session(&self, id: &str) -> Option<Arc<PeripheralSession>> {
        self.inner.sessions.lock().get(id).cloned()
    }

    fn require_session(&self, id: &str) -> BleResult<Arc<PeripheralSession>> {
        validate_id(id)?;
        self.session(id)
            .ok_or_else(|| BleError::NotFound(format!("peripheral {}", id)))
    }

    // Scanning

    /// Starts a scan. Missing options use the configured scan duration.
    pub async fn start_scan(&self, filter: Option<ScanFilter>, options: Option<ScanOptions>) -> BleResult<()> {
        let options = options.unwrap_or_else(|| ScanOptions {
            duration_ms: self.inner.ctx.config.scan_duration_ms,
            ..Default::default()
        });
        if let Some(min_rssi) = filter.as_ref().and_then(|f| f.min_rssi) {
            if min_rssi > 0 {
                return Err(BleError::InvalidArgument(format!("min RSSI {} is not a dBm value", min_rssi)));
            }
        }
        self.inner
            .scanner
            .start_scan(filter.unwrap_or_default(), options)
            .await
    }

    pub async fn stop_scan(&self) -> BleResult<()> {
        self.inner.scanner.stop_scan().await
    }

    pub fn is_scanning(&self) -> bool {
        self.inner.scanner.is_scanning()
    }

    /// Last observation of every device that passed the filter in the current scan session
    pub fn discovered_devices(&self) -> Vec<Device> {
        self.inner.scanner.discovered_devices()
    }

    // Connection lifecycle

    pub async fn connect(&self, id: &str, options: ConnectOptions) -> BleResult<()> {
        validate_id(id)?;
        if options.timeout_ms == Some(0) {
            return Err(BleError::InvalidArgument("connect timeout must be positive".to_string()));
        }
        if let Some(params) = &options.params {
            params.validate()?;
        }
        let session = self.inner.session_for(id);
        session.connect(options).await
    }

    /// Disconnects `id` and forgets its session. Unknown peripherals are a no-op.
    pub async fn disconnect(&self, id: &str) -> BleResult<()> {
        validate_id(id)?;
        let Some(session) = self.session(id) else {
            info!("Device {} not connected", id);
            return Ok(());
        };
        let result = session.disconnect().await;

        let mut sessions = self.inner.sessions.lock();
        if sessions
            .get(id)
            .is_some_and(|current| Arc::ptr_eq(current, &session) && current.connection_state() == ConnectionState::Disconnected)
        {
            sessions.remove(id);
        }
        result
    }

    pub fn is_connected(&self, id: &str) -> bool {
        self.session(id).is_some_and(|s| s.is_connected())
    }

    pub fn get_connection_state(&self, id: &str) -> ConnectionState {
        self.session(id)
            .map(|s| s.connection_state())
            .unwrap_or(ConnectionState::Disconnected)
    }

    // GATT

    pub async fn discover_services(&self, id: &str) -> BleResult<Vec<Service>> {
        self.require_session(id)?.discover_services().await
    }

    pub async fn read_characteristic(&self, id: &str, service: Uuid, characteristic: Uuid) -> BleResult<Vec<u8>> {
        self.require_session(id)?
            .read_characteristic(service, characteristic)
            .await
    }

    pub async fn write_characteristic(
        &self,
        id: &str,
        service: Uuid,
        characteristic: Uuid,
        value: &[u8],
    ) -> BleResult<()> {
        self.require_session(id)?
            .write_characteristic(service, characteristic, value)
            .await
    }

    pub async fn enable_notifications(
        &self,
        id: &str,
        service: Uuid,
        characteristic: Uuid,
        enabled: bool,
    ) -> BleResult<()> {
        self.require_session(id)?
            .set_notifications(service, characteristic, enabled)
            .await
    }

    pub async fn request_mtu(&self, id: &str, mtu: u16) -> BleResult<u16> {
        if mtu == 0 {
            return Err(BleError::InvalidArgument("MTU must be positive".to_string()));
        }
        self.require_session(id)?.request_mtu(mtu).await
    }

    pub async fn update_connection_parameters(&self, id: &str, params: ConnectionParameters) -> BleResult<()> {
        params.validate()?;
        self.require_session(id)?
            .update_connection_parameters(params)
            .await
    }

    pub async fn read_rssi(&self, id: &str) -> BleResult<i16> {
        self.require_session(id)?.read_rssi().await
    }

    // Adapter

    /// Latest radio state reported by the adapter
    pub fn get_bluetooth_state(&self) -> BleState {
        *self.inner.radio_state.lock()
    }

    pub async fn request_permissions(&self) -> BleResult<bool> {
        Ok(self.inner.ctx.adapter.request_permissions().await?)
    }

    /// Stops scanning, cancels timers, disconnects every peripheral and stops the router.
    pub async fn shutdown(&self) {
        info!("Shutting down session manager.");
        self.inner.shutdown_token.cancel();

        if let Err(e) = self.inner.scanner.stop_scan().await {
            warn!("Failed to stop scan during shutdown: {}", e);
        }

        let sessions: Vec<_> = self.inner.sessions.lock().drain().map(|(_, s)| s).collect();
        for session in sessions {
            session.teardown().await;
        }

        let handle = self.inner.router_handle.lock().take();
        if let Some(handle) = handle {
            match handle.await {
                Ok(()) => debug!("Event router finished."),
                Err(e) => error!("Event router finished with a join error: {:?}", e),
            }
        }
        info!("Session manager shut down.");
    }
}

impl ManagerInner {
    fn session_for(&self, id: &str) -> Arc<PeripheralSession> {
        self.sessions
            .lock()
            .entry(id.to_string())
            .or_insert_with(|| PeripheralSession::new(id.to_string(), self.ctx.clone()))
            .clone()
    }

    fn dispatch(&self, event: AdapterEvent) {
        match event {
            AdapterEvent::RadioStateChanged(state) => {
                {
                    let mut current = self.radio_state.lock();
                    if *current == state {
                        return;
                    }
                    *current = state;
                }
                info!("Bluetooth state changed to {:?}", state);
                self.ctx.bus.publish(BleEvent::BluetoothStateChanged(state));
            }
            AdapterEvent::Advertisement(device) => match self.scanner.observe(&device) {
                Observation::Ignored => {}
                Observation::Repeat => self.session_for(&device.id).record_advertisement(device),
                Observation::Report => {
                    info!("Found device: {} ({:?}, RSSI {})", device.id, device.name, device.rssi);
                    self.session_for(&device.id).record_advertisement(device.clone());
                    self.ctx.bus.publish(BleEvent::DeviceDiscovered(device));
                }
            },
            AdapterEvent::Disconnected { id, reason } => {
                let session = self.sessions.lock().get(&id).cloned();
                match session {
                    Some(session) => session.handle_link_lost(reason.as_deref()),
                    None => debug!("Disconnect event for unknown device {}", id),
                }
            }
            AdapterEvent::Notification {
                id,
                service,
                characteristic,
                value,
            } => {
                let session = self.sessions.lock().get(&id).cloned();
                if let Some(session) = session {
                    session.handle_notification(service, characteristic, value);
                }
            }
            AdapterEvent::MtuChanged { id, mtu } => {
                let session = self.sessions.lock().get(&id).cloned();
                if let Some(session) = session {
                    session.handle_mtu_changed(mtu);
                }
            }
        }
    }
}

fn validate_id(id: &str) -> BleResult<()> {
    if id.trim().is_empty() {
        return Err(BleError::InvalidArgument("peripheral identifier is empty".to_string()));
    }
    Ok(())
}
