//! Per-peripheral connection handling
//! A [`PeripheralSession`] owns the connection lifecycle of one peripheral:
//! connect deadlines, explicit disconnects, link-loss handling and the single
//! scheduled auto-reconnect. All state lives behind the session's own lock,
//! which is never held across an adapter call.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use log::{Level, debug, info, warn};
use parking_lot::Mutex;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::SessionConfig;
use crate::core::bluetooth::adapter::Adapter;
use crate::core::bluetooth::device::Device;
use crate::core::bluetooth::error::{BleError, BleResult};
use crate::core::bluetooth::events::{BleEvent, EventBus, LogMessage};
use crate::core::bluetooth::gatt::OperationKey;
use crate::core::bluetooth::types::{ConnectOptions, ConnectionParameters, ConnectionState, Service};

/// Log target for messages that are also published as [`BleEvent::Log`].
pub const BUS_LOG_TARGET: &str = "ble_central::bus";

/// Collaborators shared by the manager, the scanner and every session.
pub(crate) struct SessionContext {
    pub(crate) adapter: Arc<dyn Adapter>,
    pub(crate) bus: Arc<EventBus>,
    pub(crate) config: SessionConfig,
}

impl SessionContext {
    /// Logs `message` and publishes it on the bus for embedders.
    pub(crate) fn report(&self, level: Level, message: String) {
        log::log!(target: BUS_LOG_TARGET, level, "{}", message);
        self.bus.publish(BleEvent::Log(LogMessage::new(level, message)));
    }
}

/// Internal link state. `AwaitingReconnect` is reported as `Disconnected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    AwaitingReconnect,
    Connecting,
    Connected,
    Disconnecting,
}

impl From<LinkState> for ConnectionState {
    fn from(link: LinkState) -> Self {
        match link {
            LinkState::Disconnected | LinkState::AwaitingReconnect => ConnectionState::Disconnected,
            LinkState::Connecting => ConnectionState::Connecting,
            LinkState::Connected => ConnectionState::Connected,
            LinkState::Disconnecting => ConnectionState::Disconnecting,
        }
    }
}

pub(super) struct SessionState {
    pub(super) link: LinkState,
    /// Bumped on every connect attempt; late results from older attempts are dropped
    pub(super) epoch: u64,
    pub(super) auto_reconnect: bool,
    pub(super) mtu: u16,
    pub(super) params: ConnectionParameters,
    /// Deadline of the last connect attempt, reused by the scheduled reconnect
    pub(super) last_connect_timeout: Duration,
    /// `None` until discovered on the current connection
    pub(super) services: Option<Vec<Service>>,
    pub(super) notifying: HashSet<(Uuid, Uuid)>,
    /// Busy operation slots, each tagged with the epoch it was taken in
    pub(super) in_flight: HashMap<OperationKey, u64>,
    pub(super) connect_cancel: Option<CancellationToken>,
    pub(super) reconnect_cancel: Option<CancellationToken>,
    pub(super) last_seen: Option<Device>,
}

impl SessionState {
    fn new(config: &SessionConfig) -> Self {
        Self {
            link: LinkState::Disconnected,
            epoch: 0,
            auto_reconnect: false,
            mtu: config.initial_mtu(),
            params: ConnectionParameters::default(),
            last_connect_timeout: config.connect_timeout(),
            services: None,
            notifying: HashSet::new(),
            in_flight: HashMap::new(),
            connect_cancel: None,
            reconnect_cancel: None,
            last_seen: None,
        }
    }

    /// Drops everything tied to the current connection.
    fn reset_link_data(&mut self, mtu: u16) {
        self.services = None;
        self.notifying.clear();
        self.in_flight.clear();
        self.mtu = mtu;
    }
}

enum Teardown {
    Disconnect,
    CancelConnect,
    Nothing,
}

/// Connection and GATT state of a single peripheral.
pub struct PeripheralSession {
    id: String,
    pub(super) ctx: Arc<SessionContext>,
    pub(super) state: Mutex<SessionState>,
}

impl PeripheralSession {
    pub(crate) fn new(id: String, ctx: Arc<SessionContext>) -> Arc<Self> {
        let state = SessionState::new(&ctx.config);
        Arc::new(Self {
            id,
            ctx,
            state: Mutex::new(state),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.state.lock().link.into()
    }

    pub fn link_state(&self) -> LinkState {
        self.state.lock().link
    }

    pub fn is_connected(&self) -> bool {
        self.state.lock().link == LinkState::Connected
    }

    pub fn auto_reconnect(&self) -> bool {
        self.state.lock().auto_reconnect
    }

    pub fn mtu(&self) -> u16 {
        self.state.lock().mtu
    }

    pub fn connection_parameters(&self) -> ConnectionParameters {
        self.state.lock().params
    }

    /// Service tree discovered on the current connection
    pub fn services(&self) -> Option<Vec<Service>> {
        self.state.lock().services.clone()
    }

    /// (service, characteristic) pairs with notifications enabled
    pub fn notifying(&self) -> Vec<(Uuid, Uuid)> {
        let mut pairs: Vec<_> = self.state.lock().notifying.iter().copied().collect();
        pairs.sort();
        pairs
    }

    /// Most recent advertisement of this peripheral
    pub fn last_seen(&self) -> Option<Device> {
        self.state.lock().last_seen.clone()
    }

    pub(crate) fn record_advertisement(&self, device: Device) {
        self.state.lock().last_seen = Some(device);
    }

    pub(super) fn publish_state(&self, state: ConnectionState) {
        self.ctx.bus.publish(BleEvent::ConnectionStateChanged {
            id: self.id.clone(),
            state,
        });
    }

    /// Connects to the peripheral, failing fast if a connection already exists
    /// or is being established.
    pub async fn connect(self: &Arc<Self>, options: ConnectOptions) -> BleResult<()> {
        let (epoch, cancel_token, params, timeout) = {
            let mut state = self.state.lock();
            match state.link {
                LinkState::Connecting => return Err(BleError::AlreadyConnecting(self.id.clone())),
                LinkState::Connected => return Err(BleError::AlreadyConnected(self.id.clone())),
                LinkState::Disconnecting => {
                    return Err(BleError::OperationInProgress(format!("disconnect of {}", self.id)));
                }
                LinkState::Disconnected | LinkState::AwaitingReconnect => {}
            }
            if let Some(token) = state.reconnect_cancel.take() {
                token.cancel();
            }
            if let Some(params) = options.params {
                state.params = params;
            }
            let timeout = options
                .timeout_ms
                .map(Duration::from_millis)
                .unwrap_or_else(|| self.ctx.config.connect_timeout());
            state.last_connect_timeout = timeout;
            state.auto_reconnect = options.auto_reconnect;
            state.epoch += 1;
            let token = CancellationToken::new();
            state.connect_cancel = Some(token.clone());
            state.link = LinkState::Connecting;
            self.publish_state(ConnectionState::Connecting);
            (state.epoch, token, state.params, timeout)
        };

        info!("Initiating connection to {} (timeout {:?})...", self.id, timeout);

        let outcome = tokio::select! {
            result = self.ctx.adapter.connect(&self.id, &params) => Some(result),
            _ = sleep(timeout) => None,
            _ = cancel_token.cancelled() => {
                info!("Connection attempt to {} was cancelled", self.id);
                return Err(BleError::ConnectionFailed(format!("connection to {} was cancelled", self.id)));
            }
        };

        match outcome {
            Some(Ok(())) => {
                if !self.complete_connect(epoch) {
                    return Err(BleError::ConnectionFailed(format!(
                        "connection attempt to {} was superseded",
                        self.id
                    )));
                }
                info!("Connection to {} successful", self.id);
                if self.ctx.config.rediscover_on_connect {
                    info!("Discovering services on {}...", self.id);
                    if let Err(e) = self.discover_services().await {
                        self.ctx.report(
                            Level::Warn,
                            format!("Service discovery after connecting to {} failed: {}", self.id, e),
                        );
                    }
                }
                Ok(())
            }
            Some(Err(e)) => {
                if self.abort_connect(epoch) {
                    warn!("Connection to {} failed: {}", self.id, e);
                }
                Err(BleError::ConnectionFailed(e.to_string()))
            }
            None => {
                if self.abort_connect(epoch) {
                    warn!("Connection to {} timed out after {:?}", self.id, timeout);
                    if let Err(e) = self.ctx.adapter.cancel_connect(&self.id).await {
                        warn!("Failed to cancel connection request to {}: {}", self.id, e);
                    }
                }
                Err(BleError::Timeout(format!("connecting to {} after {:?}", self.id, timeout)))
            }
        }
    }

    fn complete_connect(&self, epoch: u64) -> bool {
        let initial_mtu = self.ctx.config.initial_mtu();
        let mut state = self.state.lock();
        if state.epoch != epoch || state.link != LinkState::Connecting {
            return false;
        }
        state.link = LinkState::Connected;
        state.connect_cancel = None;
        state.reset_link_data(initial_mtu);
        self.publish_state(ConnectionState::Connected);
        true
    }

    /// Returns the session to `Disconnected` if `epoch` is still the live attempt.
    fn abort_connect(&self, epoch: u64) -> bool {
        let mut state = self.state.lock();
        if state.epoch != epoch || state.link != LinkState::Connecting {
            return false;
        }
        state.link = LinkState::Disconnected;
        state.connect_cancel = None;
        self.publish_state(ConnectionState::Disconnected);
        true
    }

    /// Disconnects from the peripheral. Always disarms auto-reconnect first.
    pub async fn disconnect(&self) -> BleResult<()> {
        let teardown = {
            let mut state = self.state.lock();
            state.auto_reconnect = false;
            if let Some(token) = state.reconnect_cancel.take() {
                token.cancel();
            }
            match state.link {
                LinkState::Connected => {
                    state.link = LinkState::Disconnecting;
                    self.publish_state(ConnectionState::Disconnecting);
                    Teardown::Disconnect
                }
                LinkState::Connecting => {
                    if let Some(token) = state.connect_cancel.take() {
                        token.cancel();
                    }
                    state.epoch += 1;
                    state.link = LinkState::Disconnected;
                    self.publish_state(ConnectionState::Disconnected);
                    Teardown::CancelConnect
                }
                LinkState::Disconnecting => {
                    return Err(BleError::OperationInProgress(format!("disconnect of {}", self.id)));
                }
                LinkState::AwaitingReconnect => {
                    state.link = LinkState::Disconnected;
                    Teardown::Nothing
                }
                LinkState::Disconnected => Teardown::Nothing,
            }
        };

        match teardown {
            Teardown::Disconnect => {
                info!("Disconnecting from device {}", self.id);
                let result =
                    tokio::time::timeout(self.ctx.config.operation_timeout(), self.ctx.adapter.disconnect(&self.id)).await;
                {
                    let initial_mtu = self.ctx.config.initial_mtu();
                    let mut state = self.state.lock();
                    state.link = LinkState::Disconnected;
                    state.reset_link_data(initial_mtu);
                    self.publish_state(ConnectionState::Disconnected);
                }
                match result {
                    Ok(Ok(())) => {
                        info!("Successfully disconnected from {}", self.id);
                        Ok(())
                    }
                    Ok(Err(e)) => Err(e.into()),
                    Err(_) => Err(BleError::Timeout(format!("disconnecting from {}", self.id))),
                }
            }
            Teardown::CancelConnect => {
                info!("Cancelling pending connection to {}", self.id);
                self.ctx.adapter.cancel_connect(&self.id).await?;
                Ok(())
            }
            Teardown::Nothing => {
                debug!("Device {} not connected", self.id);
                Ok(())
            }
        }
    }

    /// Handles a disconnect the local side did not ask for.
    pub(crate) fn handle_link_lost(self: &Arc<Self>, reason: Option<&str>) {
        let reconnect = {
            let initial_mtu = self.ctx.config.initial_mtu();
            let mut state = self.state.lock();
            if state.link != LinkState::Connected {
                debug!("Ignoring disconnect event for {} in state {:?}", self.id, state.link);
                return;
            }
            state.reset_link_data(initial_mtu);
            let token = if state.auto_reconnect {
                let token = CancellationToken::new();
                state.reconnect_cancel = Some(token.clone());
                state.link = LinkState::AwaitingReconnect;
                Some(token)
            } else {
                state.link = LinkState::Disconnected;
                None
            };
            self.publish_state(ConnectionState::Disconnected);
            token
        };

        warn!("Device {} lost connection: {}", self.id, reason.unwrap_or("no reason given"));

        if let Some(token) = reconnect {
            self.schedule_reconnect(token);
        }
    }

    fn schedule_reconnect(self: &Arc<Self>, token: CancellationToken) {
        let session = Arc::clone(self);
        let delay = self.ctx.config.reconnect_delay();
        info!("Retrying connection to {} in {:?}...", self.id, delay);

        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {
                    debug!("Scheduled reconnect to {} was cancelled", session.id);
                    return;
                }
                _ = sleep(delay) => {}
            }
            let timeout = {
                let mut state = session.state.lock();
                if token.is_cancelled() || state.link != LinkState::AwaitingReconnect {
                    return;
                }
                state.reconnect_cancel = None;
                state.last_connect_timeout
            };
            let options = ConnectOptions {
                timeout_ms: Some(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX)),
                auto_reconnect: true,
                params: None,
            };
            match session.connect(options).await {
                Ok(()) => session
                    .ctx
                    .report(Level::Info, format!("Reconnected to {}", session.id)),
                Err(e) => session
                    .ctx
                    .report(Level::Warn, format!("Auto-reconnect to {} failed: {}", session.id, e)),
            }
        });
    }

    /// Stops pending timers and disconnects if needed. Used on manager shutdown.
    pub(crate) async fn teardown(&self) {
        if let Err(e) = self.disconnect().await {
            warn!("Failed to disconnect {} during shutdown: {}", self.id, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::bluetooth::mock::MockAdapter;

    fn session() -> Arc<PeripheralSession> {
        let (adapter, _events) = MockAdapter::new();
        let ctx = Arc::new(SessionContext {
            adapter,
            bus: Arc::new(EventBus::new()),
            config: SessionConfig::default(),
        });
        PeripheralSession::new("dev".to_string(), ctx)
    }

    #[test]
    fn awaiting_reconnect_is_reported_as_disconnected() {
        assert_eq!(ConnectionState::from(LinkState::AwaitingReconnect), ConnectionState::Disconnected);
        assert_eq!(ConnectionState::from(LinkState::Disconnecting), ConnectionState::Disconnecting);
    }

    #[test]
    fn stale_attempts_cannot_change_state() {
        let session = session();
        {
            let mut state = session.state.lock();
            state.link = LinkState::Connecting;
            state.epoch = 2;
        }
        assert!(!session.complete_connect(1));
        assert!(!session.abort_connect(1));
        assert_eq!(session.link_state(), LinkState::Connecting);

        assert!(session.complete_connect(2));
        assert_eq!(session.link_state(), LinkState::Connected);
    }

    #[test]
    fn link_loss_is_ignored_unless_connected() {
        let session = session();
        let mut events = session.ctx.bus.subscribe_all();
        session.handle_link_lost(Some("supervision timeout"));
        assert_eq!(session.link_state(), LinkState::Disconnected);
        assert!(events.try_recv().is_none());
    }

    #[tokio::test]
    async fn report_publishes_log_events() {
        let session = session();
        let mut events = session.ctx.bus.subscribe(&[crate::core::bluetooth::events::EventKind::Log]);
        session.ctx.report(Level::Warn, "reconnect failed".to_string());
        match events.try_recv() {
            Some(BleEvent::Log(message)) => {
                assert_eq!(message.level, "WARN");
                assert_eq!(message.message, "reconnect failed");
            }
            other => panic!("unexpected event {:?}", other),
        }
    }
}
