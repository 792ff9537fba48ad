//! Scripted in-memory adapter
//! Records every call and answers from configurable state, so the session
//! layer can be exercised without a radio. Unsolicited activity is injected
//! with [`MockAdapter::emit`] and its helpers.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::core::bluetooth::adapter::{Adapter, AdapterEvent, AdapterResult};
use crate::core::bluetooth::device::Device;
use crate::core::bluetooth::error::AdapterError;
use crate::core::bluetooth::types::{BleState, ConnectionParameters, ScanMode, Service, WriteMode};

/// How `connect` answers.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectBehavior {
    Succeed,
    Fail(String),
    /// Never resolves
    Hang,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AdapterCall {
    StartScan {
        services: Vec<Uuid>,
        allow_duplicates: bool,
        mode: ScanMode,
    },
    StopScan,
    Connect(String),
    CancelConnect(String),
    Disconnect(String),
    DiscoverServices(String),
    Read {
        id: String,
        characteristic: Uuid,
    },
    Write {
        id: String,
        characteristic: Uuid,
        value: Vec<u8>,
        mode: WriteMode,
    },
    SetNotify {
        id: String,
        characteristic: Uuid,
        enabled: bool,
    },
    ReadRssi(String),
    RequestMtu(String, u16),
    UpdateConnectionParameters(String, ConnectionParameters),
}

struct MockState {
    radio: BleState,
    connect: ConnectBehavior,
    services: HashMap<String, Vec<Service>>,
    values: HashMap<(String, Uuid), Vec<u8>>,
    response_delay: Option<Duration>,
    max_mtu: u16,
    rssi: i16,
    calls: Vec<AdapterCall>,
}

pub struct MockAdapter {
    state: Mutex<MockState>,
    events: mpsc::UnboundedSender<AdapterEvent>,
}

impl MockAdapter {
    /// Creates the adapter and the event channel the session manager consumes.
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<AdapterEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        let adapter = Arc::new(Self {
            state: Mutex::new(MockState {
                radio: BleState::PoweredOn,
                connect: ConnectBehavior::Succeed,
                services: HashMap::new(),
                values: HashMap::new(),
                response_delay: None,
                max_mtu: 247,
                rssi: -55,
                calls: Vec::new(),
            }),
            events,
        });
        (adapter, receiver)
    }

    pub fn set_radio_state(&self, radio: BleState) {
        self.state.lock().radio = radio;
    }

    pub fn set_connect_behavior(&self, behavior: ConnectBehavior) {
        self.state.lock().connect = behavior;
    }

    pub fn set_services(&self, id: &str, services: Vec<Service>) {
        self.state.lock().services.insert(id.to_string(), services);
    }

    pub fn set_value(&self, id: &str, characteristic: Uuid, value: Vec<u8>) {
        self.state.lock().values.insert((id.to_string(), characteristic), value);
    }

    /// Delays reads and writes, keeping them in flight.
    pub fn set_response_delay(&self, delay: Option<Duration>) {
        self.state.lock().response_delay = delay;
    }

    pub fn set_max_mtu(&self, mtu: u16) {
        self.state.lock().max_mtu = mtu;
    }

    pub fn set_rssi(&self, rssi: i16) {
        self.state.lock().rssi = rssi;
    }

    pub fn calls(&self) -> Vec<AdapterCall> {
        self.state.lock().calls.clone()
    }

    pub fn count_calls(&self, matches: impl Fn(&AdapterCall) -> bool) -> usize {
        self.state.lock().calls.iter().filter(|call| matches(call)).count()
    }

    pub fn connect_calls(&self, id: &str) -> usize {
        self.count_calls(|call| matches!(call, AdapterCall::Connect(c) if c == id))
    }

    pub fn emit(&self, event: AdapterEvent) {
        // The receiver only disappears when the manager has shut down.
        let _ = self.events.send(event);
    }

    pub fn advertise(&self, device: Device) {
        self.emit(AdapterEvent::Advertisement(device));
    }

    /// Simulates a link loss the central did not request.
    pub fn drop_link(&self, id: &str) {
        self.emit(AdapterEvent::Disconnected {
            id: id.to_string(),
            reason: Some("connection timeout".to_string()),
        });
    }

    pub fn notify(&self, id: &str, service: Uuid, characteristic: Uuid, value: Vec<u8>) {
        self.emit(AdapterEvent::Notification {
            id: id.to_string(),
            service,
            characteristic,
            value,
        });
    }

    fn record(&self, call: AdapterCall) {
        self.state.lock().calls.push(call);
    }

    async fn respond(&self) {
        let delay = self.state.lock().response_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl Adapter for MockAdapter {
    async fn radio_state(&self) -> BleState {
        self.state.lock().radio
    }

    async fn start_scan(&self, services: &[Uuid], allow_duplicates: bool, mode: ScanMode) -> AdapterResult<()> {
        self.record(AdapterCall::StartScan {
            services: services.to_vec(),
            allow_duplicates,
            mode,
        });
        Ok(())
    }

    async fn stop_scan(&self) -> AdapterResult<()> {
        self.record(AdapterCall::StopScan);
        Ok(())
    }

    async fn connect(&self, id: &str, _params: &ConnectionParameters) -> AdapterResult<()> {
        self.record(AdapterCall::Connect(id.to_string()));
        let behavior = self.state.lock().connect.clone();
        match behavior {
            ConnectBehavior::Succeed => Ok(()),
            ConnectBehavior::Fail(reason) => Err(AdapterError::new(reason)),
            ConnectBehavior::Hang => std::future::pending().await,
        }
    }

    async fn cancel_connect(&self, id: &str) -> AdapterResult<()> {
        self.record(AdapterCall::CancelConnect(id.to_string()));
        Ok(())
    }

    async fn disconnect(&self, id: &str) -> AdapterResult<()> {
        self.record(AdapterCall::Disconnect(id.to_string()));
        Ok(())
    }

    async fn discover_services(&self, id: &str) -> AdapterResult<Vec<Service>> {
        self.record(AdapterCall::DiscoverServices(id.to_string()));
        let services = self.state.lock().services.get(id).cloned();
        services.ok_or_else(|| AdapterError::with_code(133, format!("no GATT database for {}", id)))
    }

    async fn read_characteristic(&self, id: &str, _service: Uuid, characteristic: Uuid) -> AdapterResult<Vec<u8>> {
        self.record(AdapterCall::Read {
            id: id.to_string(),
            characteristic,
        });
        self.respond().await;
        let value = self.state.lock().values.get(&(id.to_string(), characteristic)).cloned();
        Ok(value.unwrap_or_default())
    }

    async fn write_characteristic(
        &self,
        id: &str,
        _service: Uuid,
        characteristic: Uuid,
        value: &[u8],
        mode: WriteMode,
    ) -> AdapterResult<()> {
        self.record(AdapterCall::Write {
            id: id.to_string(),
            characteristic,
            value: value.to_vec(),
            mode,
        });
        self.respond().await;
        Ok(())
    }

    async fn set_notify(&self, id: &str, _service: Uuid, characteristic: Uuid, enabled: bool) -> AdapterResult<()> {
        self.record(AdapterCall::SetNotify {
            id: id.to_string(),
            characteristic,
            enabled,
        });
        Ok(())
    }

    async fn read_rssi(&self, id: &str) -> AdapterResult<i16> {
        self.record(AdapterCall::ReadRssi(id.to_string()));
        Ok(self.state.lock().rssi)
    }

    async fn request_mtu(&self, id: &str, mtu: u16) -> AdapterResult<u16> {
        self.record(AdapterCall::RequestMtu(id.to_string(), mtu));
        Ok(mtu.min(self.state.lock().max_mtu))
    }

    async fn update_connection_parameters(&self, id: &str, params: &ConnectionParameters) -> AdapterResult<()> {
        self.record(AdapterCall::UpdateConnectionParameters(id.to_string(), *params));
        Ok(())
    }
}
