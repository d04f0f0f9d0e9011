//! Lifecycle event pub/sub.
//!
//! Application code subscribes to connection events with
//! [`Bridge::on`](super::Bridge::on). Subscribers are invoked synchronously,
//! on the task that emits the event, in registration order. There is no
//! ordering guarantee between subscribers of different event kinds.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use crate::error::BridgeError;

/// Identifier of an accepted connection (e.g. `tcp:3a1f2`).
pub type ConnectionId = String;

/// Unique identifier for an event subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// The subscribable event kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// A client connected.
    Connect,
    /// A client disconnected.
    Disconnect,
    /// Raw data arrived from a client.
    Data,
    /// A poll reply was written to a client.
    Poll,
}

/// An event emitted by a connection handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeEvent {
    /// A client connected.
    Connect {
        /// Connection identifier.
        conn_id: ConnectionId,
        /// Remote address.
        peer: SocketAddr,
    },
    /// A client disconnected. Emitted once per connection.
    Disconnect {
        /// Connection identifier.
        conn_id: ConnectionId,
    },
    /// A chunk arrived, before any parsing.
    Data {
        /// Connection identifier.
        conn_id: ConnectionId,
        /// The chunk as text (invalid UTF-8 replaced).
        text: String,
    },
    /// A poll reply has been written. Variables pushed from here show up in
    /// the next reply.
    Poll {
        /// Connection identifier.
        conn_id: ConnectionId,
    },
}

impl BridgeEvent {
    /// The kind used for subscription routing.
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Connect { .. } => EventKind::Connect,
            Self::Disconnect { .. } => EventKind::Disconnect,
            Self::Data { .. } => EventKind::Data,
            Self::Poll { .. } => EventKind::Poll,
        }
    }

    /// Connection the event belongs to.
    pub fn conn_id(&self) -> &str {
        match self {
            Self::Connect { conn_id, .. }
            | Self::Disconnect { conn_id }
            | Self::Data { conn_id, .. }
            | Self::Poll { conn_id } => conn_id,
        }
    }
}

/// Subscriber callback for lifecycle events.
pub type EventSubscriber = Arc<dyn Fn(&BridgeEvent) + Send + Sync>;

/// Subscriber callback for protocol diagnostics. Receives the id of the
/// connection the diagnostic belongs to.
pub type DiagnosticSubscriber = Arc<dyn Fn(&str, &BridgeError) + Send + Sync>;

/// Storage for event and diagnostic subscribers.
#[derive(Default)]
pub struct EventBus {
    subscribers: HashMap<EventKind, Vec<(SubscriptionId, EventSubscriber)>>,
    diagnostics: Vec<(SubscriptionId, DiagnosticSubscriber)>,
    next_id: u64,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("total_subscribers", &self.subscriber_count())
            .field("diagnostic_subscribers", &self.diagnostics.len())
            .field("next_id", &self.next_id)
            .finish()
    }
}

impl EventBus {
    /// Create an empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    fn allocate_id(&mut self) -> SubscriptionId {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        id
    }

    /// Register a subscriber for `kind`.
    pub fn subscribe(&mut self, kind: EventKind, subscriber: EventSubscriber) -> SubscriptionId {
        let id = self.allocate_id();
        self.subscribers.entry(kind).or_default().push((id, subscriber));
        log::debug!("[Bridge] Registered {:?} subscriber {:?}", kind, id);
        id
    }

    /// Register a diagnostic subscriber.
    pub fn subscribe_diagnostics(&mut self, subscriber: DiagnosticSubscriber) -> SubscriptionId {
        let id = self.allocate_id();
        self.diagnostics.push((id, subscriber));
        id
    }

    /// Remove a subscription. Unknown ids are a no-op.
    ///
    /// Returns whether anything was removed.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let mut removed = false;
        for subs in self.subscribers.values_mut() {
            if let Some(idx) = subs.iter().position(|(sid, _)| *sid == id) {
                subs.remove(idx);
                removed = true;
            }
        }
        if let Some(idx) = self.diagnostics.iter().position(|(sid, _)| *sid == id) {
            self.diagnostics.remove(idx);
            removed = true;
        }
        removed
    }

    /// Subscribers for `kind`, in registration order.
    ///
    /// Returned as clones so the caller can release the bus lock before
    /// invoking them.
    pub fn subscribers(&self, kind: EventKind) -> Vec<EventSubscriber> {
        self.subscribers
            .get(&kind)
            .map(|v| v.iter().map(|(_, s)| Arc::clone(s)).collect())
            .unwrap_or_default()
    }

    /// Diagnostic subscribers, in registration order.
    pub fn diagnostic_subscribers(&self) -> Vec<DiagnosticSubscriber> {
        self.diagnostics.iter().map(|(_, s)| Arc::clone(s)).collect()
    }

    /// Total number of lifecycle subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.values().map(Vec::len).sum()
    }
}
