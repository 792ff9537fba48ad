//! GATT operations on a connected peripheral
//! Every request requires a live connection, is bounded by the configured
//! operation timeout, and is exclusive per (peripheral, characteristic, kind):
//! an overlapping request fails with `OperationInProgress` instead of queuing.

use std::fmt;
use std::future::Future;

use log::{debug, info};
use uuid::Uuid;

use crate::core::bluetooth::connection::{LinkState, PeripheralSession, SessionState};
use crate::core::bluetooth::constants::{MAX_MTU, MIN_MTU};
use crate::core::bluetooth::error::{AdapterError, BleError, BleResult};
use crate::core::bluetooth::events::BleEvent;
use crate::core::bluetooth::types::{Characteristic, ConnectionParameters, Service, WriteMode};
use crate::core::packetizer;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Discover,
    Read,
    Write,
    Notify,
    Mtu,
    Rssi,
    ConnectionParameters,
}

/// Identifies one exclusive operation slot on a peripheral.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OperationKey {
    pub kind: OperationKind,
    pub target: Option<(Uuid, Uuid)>,
}

impl OperationKey {
    fn peripheral(kind: OperationKind) -> Self {
        Self { kind, target: None }
    }

    fn characteristic(kind: OperationKind, service: Uuid, characteristic: Uuid) -> Self {
        Self {
            kind,
            target: Some((service, characteristic)),
        }
    }
}

impl fmt::Display for OperationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.target {
            Some((_, characteristic)) => write!(f, "{:?} on characteristic {}", self.kind, characteristic),
            None => write!(f, "{:?}", self.kind),
        }
    }
}

/// Holds an operation slot on one connection; releases it when dropped.
struct OperationGuard<'a> {
    session: &'a PeripheralSession,
    key: OperationKey,
    epoch: u64,
}

impl OperationGuard<'_> {
    /// Applies `update` only while the connection the slot was taken on is still up.
    fn commit<T>(&self, update: impl FnOnce(&mut SessionState) -> T) -> BleResult<T> {
        let mut state = self.session.state.lock();
        if state.link != LinkState::Connected || state.epoch != self.epoch {
            debug!("Dropping {} result from a previous link of {}", self.key, self.session.id());
            return Err(BleError::NotConnected(self.session.id().to_string()));
        }
        Ok(update(&mut *state))
    }
}

impl Drop for OperationGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.session.state.lock();
        // A newer connection may already own this slot.
        if state.in_flight.get(&self.key) == Some(&self.epoch) {
            state.in_flight.remove(&self.key);
        }
    }
}

fn store_value(state: &mut SessionState, service: Uuid, characteristic: Uuid, value: &[u8]) {
    let cached = state
        .services
        .as_mut()
        .and_then(|tree| tree.iter_mut().find(|s| s.uuid == service))
        .and_then(|s| s.characteristics.iter_mut().find(|c| c.uuid == characteristic));
    if let Some(cached) = cached {
        cached.value = Some(value.to_vec());
    }
}

impl PeripheralSession {
    fn ensure_connected(&self) -> BleResult<()> {
        if self.state.lock().link == LinkState::Connected {
            Ok(())
        } else {
            Err(BleError::NotConnected(self.id().to_string()))
        }
    }

    fn begin(&self, key: OperationKey) -> BleResult<OperationGuard<'_>> {
        let mut state = self.state.lock();
        if state.link != LinkState::Connected {
            return Err(BleError::NotConnected(self.id().to_string()));
        }
        let epoch = state.epoch;
        if state.in_flight.get(&key) == Some(&epoch) {
            return Err(BleError::OperationInProgress(format!("{} for {}", key, self.id())));
        }
        state.in_flight.insert(key, epoch);
        Ok(OperationGuard {
            session: self,
            key,
            epoch,
        })
    }

    async fn with_deadline<T, F>(&self, what: &str, request: F) -> BleResult<T>
    where
        F: Future<Output = Result<T, AdapterError>>,
    {
        match tokio::time::timeout(self.ctx.config.operation_timeout(), request).await {
            Ok(result) => result.map_err(BleError::from),
            Err(_) => Err(BleError::Timeout(format!("{} on {}", what, self.id()))),
        }
    }

    /// Runs full service discovery and caches the tree for this connection.
    pub async fn discover_services(&self) -> BleResult<Vec<Service>> {
        let guard = self.begin(OperationKey::peripheral(OperationKind::Discover))?;
        let services = self
            .with_deadline("service discovery", self.ctx.adapter.discover_services(self.id()))
            .await?;
        guard.commit(|state| state.services = Some(services.clone()))?;
        info!("Discovered {} services on {}", services.len(), self.id());
        for service in &services {
            debug!(
                "Service {} ({} characteristics)",
                service.uuid,
                service.characteristics.len()
            );
        }
        Ok(services)
    }

    /// Cached lookup. `Ok(None)` means the tree has not been discovered yet.
    fn cached_characteristic(&self, service: Uuid, characteristic: Uuid) -> BleResult<Option<Characteristic>> {
        let state = self.state.lock();
        let Some(tree) = state.services.as_ref() else {
            return Ok(None);
        };
        let found = tree
            .iter()
            .find(|s| s.uuid == service)
            .ok_or_else(|| BleError::NotFound(format!("service {} on {}", service, self.id())))?
            .characteristic(characteristic)
            .ok_or_else(|| BleError::NotFound(format!("characteristic {} on {}", characteristic, self.id())))?;
        Ok(Some(found.clone()))
    }

    /// Finds a characteristic, discovering the whole tree first if it is not cached.
    async fn resolve_characteristic(&self, service: Uuid, characteristic: Uuid) -> BleResult<Characteristic> {
        self.ensure_connected()?;
        if let Some(found) = self.cached_characteristic(service, characteristic)? {
            return Ok(found);
        }
        self.discover_services().await?;
        self.cached_characteristic(service, characteristic)?
            .ok_or_else(|| BleError::NotFound(format!("characteristic {} on {}", characteristic, self.id())))
    }

    pub async fn read_characteristic(&self, service: Uuid, characteristic: Uuid) -> BleResult<Vec<u8>> {
        let target = self.resolve_characteristic(service, characteristic).await?;
        if !target.properties.read {
            return Err(BleError::NotReadable(characteristic));
        }
        let guard = self.begin(OperationKey::characteristic(OperationKind::Read, service, characteristic))?;
        let value = self
            .with_deadline(
                "characteristic read",
                self.ctx.adapter.read_characteristic(self.id(), service, characteristic),
            )
            .await?;
        guard.commit(|state| store_value(state, service, characteristic, &value))?;
        debug!("Read {} bytes from {} on {}", value.len(), characteristic, self.id());
        Ok(value)
    }

    /// Writes `value`, preferring write-without-response when the characteristic
    /// advertises it. Unacknowledged payloads larger than one ATT packet are
    /// split at the negotiated MTU.
    pub async fn write_characteristic(&self, service: Uuid, characteristic: Uuid, value: &[u8]) -> BleResult<()> {
        let target = self.resolve_characteristic(service, characteristic).await?;
        if !target.properties.is_writable() {
            return Err(BleError::NotWritable(characteristic));
        }
        let mode = if target.properties.write_without_response {
            WriteMode::WithoutResponse
        } else {
            WriteMode::WithResponse
        };

        let guard = self.begin(OperationKey::characteristic(OperationKind::Write, service, characteristic))?;
        let packets = match mode {
            WriteMode::WithoutResponse if !value.is_empty() => {
                packetizer::split(value, packetizer::payload_size_for_mtu(self.mtu()), 0)?
            }
            _ => vec![value.to_vec()],
        };

        debug!(
            "Writing {} bytes to {} on {} as {} packet(s) ({:?})",
            value.len(),
            characteristic,
            self.id(),
            packets.len(),
            mode
        );
        for packet in &packets {
            guard.commit(|_| ())?;
            self.with_deadline(
                "characteristic write",
                self.ctx
                    .adapter
                    .write_characteristic(self.id(), service, characteristic, packet, mode),
            )
            .await?;
        }
        Ok(())
    }

    pub async fn set_notifications(&self, service: Uuid, characteristic: Uuid, enabled: bool) -> BleResult<()> {
        let target = self.resolve_characteristic(service, characteristic).await?;
        if !target.properties.is_notifiable() {
            return Err(BleError::NotNotifiable(characteristic));
        }
        let guard = self.begin(OperationKey::characteristic(OperationKind::Notify, service, characteristic))?;
        self.with_deadline(
            "notification toggle",
            self.ctx
                .adapter
                .set_notify(self.id(), service, characteristic, enabled),
        )
        .await?;

        guard.commit(|state| {
            if enabled {
                state.notifying.insert((service, characteristic));
            } else {
                state.notifying.remove(&(service, characteristic));
            }
        })?;
        info!(
            "Notifications {} for {} on {}",
            if enabled { "enabled" } else { "disabled" },
            characteristic,
            self.id()
        );
        Ok(())
    }

    /// Requests `mtu` (clamped to the ATT range) and returns what was negotiated.
    pub async fn request_mtu(&self, mtu: u16) -> BleResult<u16> {
        let guard = self.begin(OperationKey::peripheral(OperationKind::Mtu))?;
        let wanted = mtu.clamp(MIN_MTU, MAX_MTU);
        let negotiated = self
            .with_deadline("MTU request", self.ctx.adapter.request_mtu(self.id(), wanted))
            .await?
            .clamp(MIN_MTU, MAX_MTU);
        guard.commit(|state| self.apply_mtu(state, negotiated))?;
        Ok(negotiated)
    }

    fn apply_mtu(&self, state: &mut SessionState, mtu: u16) {
        state.mtu = mtu;
        self.ctx.bus.publish(BleEvent::MtuUpdated {
            id: self.id().to_string(),
            mtu,
        });
    }

    pub async fn read_rssi(&self) -> BleResult<i16> {
        let guard = self.begin(OperationKey::peripheral(OperationKind::Rssi))?;
        let rssi = self
            .with_deadline("RSSI read", self.ctx.adapter.read_rssi(self.id()))
            .await?;
        guard.commit(|_| {
            self.ctx.bus.publish(BleEvent::RssiUpdated {
                id: self.id().to_string(),
                rssi,
            })
        })?;
        Ok(rssi)
    }

    pub async fn update_connection_parameters(&self, params: ConnectionParameters) -> BleResult<()> {
        let guard = self.begin(OperationKey::peripheral(OperationKind::ConnectionParameters))?;
        self.with_deadline(
            "connection parameter update",
            self.ctx.adapter.update_connection_parameters(self.id(), &params),
        )
        .await?;
        guard.commit(|state| state.params = params)
    }

    pub(crate) fn handle_notification(&self, service: Uuid, characteristic: Uuid, value: Vec<u8>) {
        let mut state = self.state.lock();
        if state.link != LinkState::Connected {
            debug!("Dropping notification from {} while not connected", self.id());
            return;
        }
        store_value(&mut state, service, characteristic, &value);
        self.ctx.bus.publish(BleEvent::NotificationReceived {
            id: self.id().to_string(),
            service,
            characteristic,
            value,
        });
    }

    pub(crate) fn handle_mtu_changed(&self, mtu: u16) {
        let mut state = self.state.lock();
        if state.link == LinkState::Connected {
            self.apply_mtu(&mut state, mtu.clamp(MIN_MTU, MAX_MTU));
        }
    }
}
