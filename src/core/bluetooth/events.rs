//! Event fan-out to subscribers
//! Every adapter callback and state transition becomes a discrete [`BleEvent`]
//! delivered in publish order to each subscriber interested in its kind.
//! Events are fire-and-forget: nothing is buffered for subscribers that do not
//! exist yet.

use std::collections::HashSet;
use std::pin::Pin;
use std::task::{Context, Poll};

use chrono::Local;
use futures_util::Stream;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::core::bluetooth::device::Device;
use crate::core::bluetooth::types::{BleState, ConnectionState};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogMessage {
    pub level: String,
    pub message: String,
    pub timestamp: String,
}

impl LogMessage {
    pub fn new(level: log::Level, message: impl Into<String>) -> Self {
        Self {
            level: level.to_string(),
            message: message.into(),
            timestamp: Local::now().to_rfc3339(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum BleEvent {
    BluetoothStateChanged(BleState),
    DeviceDiscovered(Device),
    ConnectionStateChanged {
        id: String,
        state: ConnectionState,
    },
    NotificationReceived {
        id: String,
        service: Uuid,
        characteristic: Uuid,
        value: Vec<u8>,
    },
    MtuUpdated {
        id: String,
        mtu: u16,
    },
    RssiUpdated {
        id: String,
        rssi: i16,
    },
    Log(LogMessage),
    ScanStarted,
    ScanFinished,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    BluetoothStateChanged,
    DeviceDiscovered,
    ConnectionStateChanged,
    NotificationReceived,
    MtuUpdated,
    RssiUpdated,
    Log,
    ScanStarted,
    ScanFinished,
}

impl BleEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::BluetoothStateChanged(_) => EventKind::BluetoothStateChanged,
            Self::DeviceDiscovered(_) => EventKind::DeviceDiscovered,
            Self::ConnectionStateChanged { .. } => EventKind::ConnectionStateChanged,
            Self::NotificationReceived { .. } => EventKind::NotificationReceived,
            Self::MtuUpdated { .. } => EventKind::MtuUpdated,
            Self::RssiUpdated { .. } => EventKind::RssiUpdated,
            Self::Log(_) => EventKind::Log,
            Self::ScanStarted => EventKind::ScanStarted,
            Self::ScanFinished => EventKind::ScanFinished,
        }
    }
}

struct Subscriber {
    /// `None` means every kind
    kinds: Option<HashSet<EventKind>>,
    sender: mpsc::UnboundedSender<BleEvent>,
}

impl Subscriber {
    fn wants(&self, kind: EventKind) -> bool {
        self.kinds.as_ref().is_none_or(|kinds| kinds.contains(&kind))
    }
}

#[derive(Default)]
pub struct EventBus {
    subscribers: Mutex<Vec<Subscriber>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes to the given kinds. An empty slice subscribes to everything.
    pub fn subscribe(&self, kinds: &[EventKind]) -> Subscription {
        let (sender, receiver) = mpsc::unbounded_channel();
        let kinds = (!kinds.is_empty()).then(|| kinds.iter().copied().collect());
        self.subscribers.lock().push(Subscriber { kinds, sender });
        Subscription { receiver }
    }

    pub fn subscribe_all(&self) -> Subscription {
        self.subscribe(&[])
    }

    /// Delivers `event` to every current subscriber of its kind and returns how
    /// many received it. Subscribers whose receiving end was dropped are pruned.
    pub fn publish(&self, event: BleEvent) -> usize {
        let kind = event.kind();
        // Held for the whole dispatch so concurrent publishers cannot interleave
        // and a subscriber registered meanwhile misses this event.
        let mut subscribers = self.subscribers.lock();
        let mut delivered = 0;
        subscribers.retain(|subscriber| {
            if !subscriber.wants(kind) {
                return !subscriber.sender.is_closed();
            }
            match subscriber.sender.send(event.clone()) {
                Ok(()) => {
                    delivered += 1;
                    true
                }
                Err(_) => false,
            }
        });
        delivered
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}

/// Receiving end of an [`EventBus`] subscription.
pub struct Subscription {
    receiver: mpsc::UnboundedReceiver<BleEvent>,
}

impl Subscription {
    pub async fn recv(&mut self) -> Option<BleEvent> {
        self.receiver.recv().await
    }

    /// Next already-delivered event, if any
    pub fn try_recv(&mut self) -> Option<BleEvent> {
        self.receiver.try_recv().ok()
    }

    /// Drains every already-delivered event
    pub fn drain(&mut self) -> Vec<BleEvent> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }
}

impl Stream for Subscription {
    type Item = BleEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}
