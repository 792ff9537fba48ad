use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::core::bluetooth::adapter::Adapter;
use crate::core::bluetooth::device::{Device, ScanFilter};
use crate::core::bluetooth::error::{BleError, BleResult};
use crate::core::bluetooth::events::{BleEvent, EventBus};
use crate::core::bluetooth::types::ScanOptions;

/// What the scanner made of one advertisement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    /// No scan is active or the device failed the filter
    Ignored,
    /// Passed the filter but was already reported this session
    Repeat,
    /// Should be reported to subscribers
    Report,
}

struct ScanSession {
    generation: u64,
    filter: ScanFilter,
    options: ScanOptions,
    /// Identifiers reported in this session
    seen: HashSet<String>,
    cancel_token: CancellationToken,
    deadline_task: Option<JoinHandle<()>>,
}

#[derive(Default)]
struct ScannerState {
    generation: u64,
    active: Option<ScanSession>,
}

pub struct BluetoothScanner {
    adapter: Arc<dyn Adapter>,
    bus: Arc<EventBus>,
    state: Mutex<ScannerState>,
    /// Latest observation per identifier since the last scan start
    devices: Mutex<HashMap<String, Device>>,
}

impl BluetoothScanner {
    pub fn new(adapter: Arc<dyn Adapter>, bus: Arc<EventBus>) -> Arc<Self> {
        Arc::new(Self {
            adapter,
            bus,
            state: Mutex::new(ScannerState::default()),
            devices: Mutex::new(HashMap::new()),
        })
    }

    /// Starts a scan session, replacing any active one.
    pub async fn start_scan(self: &Arc<Self>, filter: ScanFilter, options: ScanOptions) -> BleResult<()> {
        if !options.continuous && options.duration_ms == 0 {
            return Err(BleError::InvalidArgument(
                "scan duration must be positive unless the scan is continuous".to_string(),
            ));
        }

        if self.is_scanning() {
            self.stop_scan().await?;
        }

        // Clear existing devices
        self.devices.lock().clear();

        let cancel_token = CancellationToken::new();
        let generation = {
            let mut state = self.state.lock();
            state.generation += 1;
            state.active = Some(ScanSession {
                generation: state.generation,
                filter: filter.clone(),
                options: options.clone(),
                seen: HashSet::new(),
                cancel_token: cancel_token.clone(),
                deadline_task: None,
            });
            state.generation
        };

        info!("Starting bluetooth scan ({:?}, duplicates: {})", options.mode, options.allow_duplicates);
        if let Err(e) = self
            .adapter
            .start_scan(&filter.adapter_services(), options.allow_duplicates, options.mode)
            .await
        {
            error!("Failed to start scan: {}", e);
            let mut state = self.state.lock();
            if state.active.as_ref().is_some_and(|s| s.generation == generation) {
                state.active = None;
            }
            return Err(e.into());
        }

        if !options.continuous {
            let scanner = Arc::clone(self);
            let duration = Duration::from_millis(options.duration_ms);
            let token_for_task = cancel_token.clone();
            let handle = tokio::spawn(async move {
                tokio::select! {
                    _ = token_for_task.cancelled() => {}
                    _ = tokio::time::sleep(duration) => {
                        scanner.finish_scan(generation).await;
                    }
                }
            });
            let mut state = self.state.lock();
            match state.active.as_mut() {
                Some(session) if session.generation == generation => session.deadline_task = Some(handle),
                _ => handle.abort(),
            }
        }

        self.bus.publish(BleEvent::ScanStarted);
        info!("Device scan task started.");
        Ok(())
    }

    /// Stops the active scan. Does nothing when no scan is running.
    pub async fn stop_scan(&self) -> BleResult<()> {
        let Some(session) = self.state.lock().active.take() else {
            debug!("No active scan to stop.");
            return Ok(());
        };

        info!("Stopping Bluetooth scan.");
        session.cancel_token.cancel();

        if let Some(handle) = session.deadline_task {
            match handle.await {
                Ok(()) => debug!("Scan deadline task finished after cancellation."),
                Err(e) if e.is_cancelled() => debug!("Scan deadline task was cancelled."),
                Err(e) => error!("Scan deadline task finished with an unexpected join error: {:?}", e),
            }
        }

        let result = self.adapter.stop_scan().await;
        self.bus.publish(BleEvent::ScanFinished);
        result.map_err(BleError::from)
    }

    /// Ends the session `generation` when its deadline fires. Stale deadlines are no-ops.
    async fn finish_scan(&self, generation: u64) {
        let session = {
            let mut state = self.state.lock();
            match state.active.as_ref() {
                Some(session) if session.generation == generation => state.active.take(),
                _ => None,
            }
        };
        if session.is_none() {
            return;
        }

        info!("Scan duration elapsed, stopping scan.");
        if let Err(e) = self.adapter.stop_scan().await {
            warn!("Failed to stop scan after deadline: {}", e);
        }
        self.bus.publish(BleEvent::ScanFinished);
    }

    /// Applies the active filter and duplicate policy to one advertisement.
    pub fn observe(&self, device: &Device) -> Observation {
        let mut state = self.state.lock();
        let Some(session) = state.active.as_mut() else {
            return Observation::Ignored;
        };
        if !session.filter.matches(device) {
            debug!("Device {} filtered out (RSSI {})", device.id, device.rssi);
            return Observation::Ignored;
        }
        self.devices.lock().insert(device.id.clone(), device.clone());
        let first_sighting = session.seen.insert(device.id.clone());
        if first_sighting || session.options.allow_duplicates {
            Observation::Report
        } else {
            Observation::Repeat
        }
    }

    pub fn is_scanning(&self) -> bool {
        self.state.lock().active.is_some()
    }

    /// Devices that passed the filter since the last scan start
    pub fn discovered_devices(&self) -> Vec<Device> {
        let mut devices: Vec<Device> = self.devices.lock().values().cloned().collect();
        devices.sort_by(|a, b| a.id.cmp(&b.id));
        devices
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::bluetooth::constants::UUID_BATTERY_SERVICE;
    use crate::core::bluetooth::mock::{AdapterCall, MockAdapter};

    fn scanner() -> (Arc<MockAdapter>, Arc<BluetoothScanner>, Arc<EventBus>) {
        let (adapter, _events) = MockAdapter::new();
        let bus = Arc::new(EventBus::new());
        let scanner = BluetoothScanner::new(adapter.clone(), bus.clone());
        (adapter, scanner, bus)
    }

    fn continuous(allow_duplicates: bool) -> ScanOptions {
        ScanOptions {
            continuous: true,
            allow_duplicates,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn nothing_is_observed_without_a_scan() {
        let (_adapter, scanner, _bus) = scanner();
        assert_eq!(scanner.observe(&Device::new("a", -40)), Observation::Ignored);
    }

    #[tokio::test]
    async fn duplicates_are_reported_once_per_session() {
        let (_adapter, scanner, _bus) = scanner();
        scanner.start_scan(ScanFilter::default(), continuous(false)).await.unwrap();
        let device = Device::new("a", -40);
        assert_eq!(scanner.observe(&device), Observation::Report);
        assert_eq!(scanner.observe(&device), Observation::Repeat);

        scanner.start_scan(ScanFilter::default(), continuous(false)).await.unwrap();
        assert_eq!(scanner.observe(&device), Observation::Report);
    }

    #[tokio::test]
    async fn allow_duplicates_reports_every_observation() {
        let (_adapter, scanner, _bus) = scanner();
        scanner.start_scan(ScanFilter::default(), continuous(true)).await.unwrap();
        let device = Device::new("a", -40);
        assert_eq!(scanner.observe(&device), Observation::Report);
        assert_eq!(scanner.observe(&device), Observation::Report);
    }

    #[tokio::test]
    async fn filter_services_reach_the_adapter() {
        let (adapter, scanner, _bus) = scanner();
        let filter = ScanFilter {
            service_uuids: Some(vec![UUID_BATTERY_SERVICE]),
            ..Default::default()
        };
        scanner.start_scan(filter, continuous(false)).await.unwrap();
        assert_eq!(
            adapter.calls(),
            vec![AdapterCall::StartScan {
                services: vec![UUID_BATTERY_SERVICE],
                allow_duplicates: false,
                mode: Default::default(),
            }]
        );
        assert_eq!(scanner.observe(&Device::new("plain", -40)), Observation::Ignored);
    }

    #[tokio::test]
    async fn stop_when_idle_is_a_no_op() {
        let (adapter, scanner, bus) = scanner();
        let mut events = bus.subscribe_all();
        scanner.stop_scan().await.unwrap();
        assert!(adapter.calls().is_empty());
        assert!(events.try_recv().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_ends_the_scan() {
        let (adapter, scanner, bus) = scanner();
        let mut events = bus.subscribe_all();
        let options = ScanOptions {
            duration_ms: 1_000,
            ..Default::default()
        };
        scanner.start_scan(ScanFilter::default(), options).await.unwrap();
        assert!(scanner.is_scanning());

        tokio::time::sleep(Duration::from_millis(1_100)).await;
        assert!(!scanner.is_scanning());
        assert_eq!(adapter.count_calls(|c| *c == AdapterCall::StopScan), 1);
        assert_eq!(events.drain(), vec![BleEvent::ScanStarted, BleEvent::ScanFinished]);
    }

    #[tokio::test(start_paused = true)]
    async fn restart_invalidates_previous_deadline() {
        let (adapter, scanner, _bus) = scanner();
        let short = ScanOptions {
            duration_ms: 1_000,
            ..Default::default()
        };
        scanner.start_scan(ScanFilter::default(), short).await.unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;
        scanner.start_scan(ScanFilter::default(), continuous(false)).await.unwrap();

        tokio::time::sleep(Duration::from_millis(2_000)).await;
        assert!(scanner.is_scanning());
        // Only the explicit replacement stopped the adapter scan.
        assert_eq!(adapter.count_calls(|c| *c == AdapterCall::StopScan), 1);
    }

    #[tokio::test]
    async fn zero_duration_is_rejected() {
        let (adapter, scanner, _bus) = scanner();
        let options = ScanOptions {
            duration_ms: 0,
            ..Default::default()
        };
        assert!(matches!(
            scanner.start_scan(ScanFilter::default(), options).await,
            Err(BleError::InvalidArgument(_))
        ));
        assert!(adapter.calls().is_empty());
    }
}
