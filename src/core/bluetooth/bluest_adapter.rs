//! Adapter backed by the platform Bluetooth stack through `bluest`
//! Devices are remembered by identifier as they are scanned. A peripheral that
//! was never scanned can only be reached if the system already holds a link to
//! it, since bluest cannot open a device from an identifier string. Every
//! platform stream (scan results, notifications, link events) is pumped into
//! the [`AdapterEvent`] channel by a task with its own cancellation token.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use futures_util::StreamExt;
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::core::bluetooth::adapter::{Adapter, AdapterEvent, AdapterResult};
use crate::core::bluetooth::device::Device;
use crate::core::bluetooth::error::AdapterError;
use crate::core::bluetooth::types::{
    BleState, Characteristic, CharacteristicProperties, ConnectionParameters, ScanMode, Service, WriteMode,
};

impl From<bluest::Error> for AdapterError {
    fn from(e: bluest::Error) -> Self {
        AdapterError::new(e.to_string())
    }
}

pub struct BluestAdapter {
    adapter: bluest::Adapter,
    events: mpsc::UnboundedSender<AdapterEvent>,
    /// Map of device identifiers to platform devices seen while scanning
    devices: Arc<Mutex<HashMap<String, bluest::Device>>>,
    scan_token: Mutex<Option<CancellationToken>>,
    notify_tokens: Mutex<HashMap<(String, Uuid), CancellationToken>>,
    link_tokens: Mutex<HashMap<String, CancellationToken>>,
    shutdown_token: CancellationToken,
}

impl BluestAdapter {
    /// Opens the default adapter and waits until it is available.
    pub async fn new() -> Result<(Arc<Self>, mpsc::UnboundedReceiver<AdapterEvent>)> {
        let adapter = bluest::Adapter::default()
            .await
            .ok_or_else(|| anyhow!("No Bluetooth adapter found"))?;
        adapter.wait_available().await?;
        info!("Bluetooth adapter is available.");

        let (events, receiver) = mpsc::unbounded_channel();
        let this = Arc::new(Self {
            adapter,
            events,
            devices: Arc::new(Mutex::new(HashMap::new())),
            scan_token: Mutex::new(None),
            notify_tokens: Mutex::new(HashMap::new()),
            link_tokens: Mutex::new(HashMap::new()),
            shutdown_token: CancellationToken::new(),
        });
        this.watch_availability();
        Ok((this, receiver))
    }

    fn watch_availability(&self) {
        let adapter = self.adapter.clone();
        let events = self.events.clone();
        let token = self.shutdown_token.clone();
        tokio::spawn(async move {
            let mut stream = match adapter.events().await {
                Ok(stream) => stream,
                Err(e) => {
                    warn!("Adapter availability events are not supported: {}", e);
                    return;
                }
            };
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    event = stream.next() => match event {
                        Some(Ok(bluest::AdapterEvent::Available)) => {
                            let _ = events.send(AdapterEvent::RadioStateChanged(BleState::PoweredOn));
                        }
                        Some(Ok(bluest::AdapterEvent::Unavailable)) => {
                            let _ = events.send(AdapterEvent::RadioStateChanged(BleState::PoweredOff));
                        }
                        Some(Err(e)) => error!("Adapter event stream error: {}", e),
                        None => break,
                    },
                }
            }
        });
    }

    /// Scanned device for `id`, falling back to peripherals the system is connected to.
    async fn device(&self, id: &str) -> AdapterResult<bluest::Device> {
        if let Some(device) = self.devices.lock().get(id).cloned() {
            return Ok(device);
        }
        let connected = self.adapter.connected_devices().await?;
        let device = connected
            .into_iter()
            .find(|device| device.id().to_string() == id)
            .ok_or_else(|| AdapterError::new(format!("Device not found with ID: {}", id)))?;
        debug!("Found {} among system-connected devices", id);
        self.devices.lock().insert(id.to_string(), device.clone());
        Ok(device)
    }

    async fn find_characteristic(
        &self,
        id: &str,
        service: Uuid,
        characteristic: Uuid,
    ) -> AdapterResult<bluest::Characteristic> {
        let device = self.device(id).await?;
        for candidate in device.services().await? {
            if candidate.uuid() != service {
                continue;
            }
            for c in candidate.characteristics().await? {
                if c.uuid() == characteristic {
                    return Ok(c);
                }
            }
        }
        Err(AdapterError::new(format!(
            "Characteristic {} of service {} not found on {}",
            characteristic, service, id
        )))
    }

    /// Reports the link going down until the next explicit disconnect.
    fn watch_link(&self, id: &str, device: bluest::Device) {
        let token = CancellationToken::new();
        if let Some(previous) = self.link_tokens.lock().insert(id.to_string(), token.clone()) {
            previous.cancel();
        }
        let adapter = self.adapter.clone();
        let events = self.events.clone();
        let id = id.to_string();
        tokio::spawn(async move {
            let mut stream = match adapter.device_connection_events(&device).await {
                Ok(stream) => stream,
                Err(e) => {
                    warn!("Connection events unavailable for {}: {}", id, e);
                    return;
                }
            };
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    event = stream.next() => match event {
                        Some(bluest::ConnectionEvent::Disconnected) => {
                            let _ = events.send(AdapterEvent::Disconnected { id: id.clone(), reason: None });
                            break;
                        }
                        Some(bluest::ConnectionEvent::Connected) => {}
                        None => break,
                    },
                }
            }
        });
    }

    fn stop_watchers(&self, id: &str) {
        if let Some(token) = self.link_tokens.lock().remove(id) {
            token.cancel();
        }
        self.notify_tokens.lock().retain(|(device, _), token| {
            if device == id {
                token.cancel();
                false
            } else {
                true
            }
        });
    }
}

impl Drop for BluestAdapter {
    fn drop(&mut self) {
        self.shutdown_token.cancel();
    }
}

/// Converts a scan result. Results without a signal strength are not advertisements we can report.
fn advertisement(discovered: &bluest::AdvertisingDevice) -> Option<Device> {
    let data = &discovered.adv_data;
    let mut device = Device::new(discovered.device.id().to_string(), discovered.rssi?);
    device.name = data.local_name.clone().or_else(|| discovered.device.name().ok());
    device.service_uuids = data.services.iter().copied().collect();
    device.tx_power = data.tx_power_level;
    device.connectable = data.is_connectable;
    if let Some(manufacturer) = &data.manufacturer_data {
        device = device.with_manufacturer_data(manufacturer.company_id, manufacturer.data.to_vec());
    }
    Some(device)
}

#[async_trait]
impl Adapter for BluestAdapter {
    async fn radio_state(&self) -> BleState {
        match self.adapter.is_available().await {
            Ok(true) => BleState::PoweredOn,
            Ok(false) => BleState::PoweredOff,
            Err(e) => {
                warn!("Failed to query adapter availability: {}", e);
                BleState::Unknown
            }
        }
    }

    async fn start_scan(&self, services: &[Uuid], _allow_duplicates: bool, mode: ScanMode) -> AdapterResult<()> {
        debug!("Scan mode {:?} is advisory on this platform", mode);
        let token = CancellationToken::new();
        if let Some(previous) = self.scan_token.lock().replace(token.clone()) {
            previous.cancel();
        }

        let adapter = self.adapter.clone();
        let events = self.events.clone();
        let devices = self.devices.clone();
        let services = services.to_vec();
        tokio::spawn(async move {
            let mut scan_stream = match adapter.scan(&services).await {
                Ok(stream) => stream,
                Err(e) => {
                    error!("Failed to start bluetooth scan: {}", e);
                    return;
                }
            };
            info!("Bluetooth scan running.");
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    result = scan_stream.next() => match result {
                        Some(discovered) => {
                            let id = discovered.device.id().to_string();
                            devices.lock().insert(id.clone(), discovered.device.clone());
                            match advertisement(&discovered) {
                                Some(device) => {
                                    let _ = events.send(AdapterEvent::Advertisement(device));
                                }
                                None => debug!("Skipping scan result for {} without RSSI", id),
                            }
                        }
                        None => {
                            info!("Bluetooth scan stream has ended.");
                            break;
                        }
                    },
                }
            }
        });
        Ok(())
    }

    async fn stop_scan(&self) -> AdapterResult<()> {
        if let Some(token) = self.scan_token.lock().take() {
            token.cancel();
        }
        Ok(())
    }

    async fn connect(&self, id: &str, _params: &ConnectionParameters) -> AdapterResult<()> {
        let device = self.device(id).await?;
        if device.is_connected().await {
            info!("Device {} already connected at the platform level.", id);
        } else {
            self.adapter.connect_device(&device).await?;
        }
        self.watch_link(id, device);
        Ok(())
    }

    async fn cancel_connect(&self, id: &str) -> AdapterResult<()> {
        self.disconnect(id).await
    }

    async fn disconnect(&self, id: &str) -> AdapterResult<()> {
        self.stop_watchers(id);
        let device = self.device(id).await?;
        self.adapter.disconnect_device(&device).await?;
        Ok(())
    }

    async fn discover_services(&self, id: &str) -> AdapterResult<Vec<Service>> {
        let device = self.device(id).await?;
        let mut tree = Vec::new();
        for service in device.discover_services().await? {
            let mut characteristics = Vec::new();
            for c in service.discover_characteristics().await? {
                let props = c.properties().await?;
                characteristics.push(Characteristic::new(
                    c.uuid(),
                    CharacteristicProperties {
                        read: props.read,
                        write: props.write,
                        write_without_response: props.write_without_response,
                        notify: props.notify,
                        indicate: props.indicate,
                    },
                ));
            }
            tree.push(Service {
                uuid: service.uuid(),
                is_primary: service.is_primary().await.unwrap_or(true),
                characteristics,
            });
        }
        Ok(tree)
    }

    async fn read_characteristic(&self, id: &str, service: Uuid, characteristic: Uuid) -> AdapterResult<Vec<u8>> {
        let c = self.find_characteristic(id, service, characteristic).await?;
        Ok(c.read().await?)
    }

    async fn write_characteristic(
        &self,
        id: &str,
        service: Uuid,
        characteristic: Uuid,
        value: &[u8],
        mode: WriteMode,
    ) -> AdapterResult<()> {
        let c = self.find_characteristic(id, service, characteristic).await?;
        match mode {
            WriteMode::WithResponse => c.write(value).await?,
            WriteMode::WithoutResponse => c.write_without_response(value).await?,
        }
        Ok(())
    }

    async fn set_notify(&self, id: &str, service: Uuid, characteristic: Uuid, enabled: bool) -> AdapterResult<()> {
        let key = (id.to_string(), characteristic);
        if let Some(previous) = self.notify_tokens.lock().remove(&key) {
            previous.cancel();
        }
        if !enabled {
            return Ok(());
        }

        let c = self.find_characteristic(id, service, characteristic).await?;
        let token = CancellationToken::new();
        self.notify_tokens.lock().insert(key, token.clone());
        let events = self.events.clone();
        let id = id.to_string();
        tokio::spawn(async move {
            let mut stream = match c.notify().await {
                Ok(stream) => stream,
                Err(e) => {
                    error!("Failed to subscribe to {} on {}: {}", characteristic, id, e);
                    return;
                }
            };
            info!("Subscribed to {} on {}", characteristic, id);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    result = stream.next() => match result {
                        Some(Ok(value)) => {
                            let _ = events.send(AdapterEvent::Notification {
                                id: id.clone(),
                                service,
                                characteristic,
                                value,
                            });
                        }
                        Some(Err(e)) => {
                            error!("Notification stream error on {}: {}", characteristic, e);
                            break;
                        }
                        None => break,
                    },
                }
            }
            debug!("Notification task for {} on {} finished", characteristic, id);
        });
        Ok(())
    }

    async fn read_rssi(&self, id: &str) -> AdapterResult<i16> {
        Ok(self.device(id).await?.rssi().await?)
    }

    async fn request_mtu(&self, id: &str, _mtu: u16) -> AdapterResult<u16> {
        Err(AdapterError::new(format!(
            "MTU negotiation for {} is managed by the operating system",
            id
        )))
    }
}
