//! Typed event bus for connection lifecycle and inbound data.
//!
//! Every [`ConnectionEvent`] belongs to one [`EventKind`] channel. Handlers are
//! registered per kind and receive the connection that published the event, so
//! they never need to keep a strong reference to it themselves.

use crate::connection::{state::StateChange, Connection};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Events published by a connection.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    /// Negotiation succeeded; the transport is about to start.
    Starting,
    /// The transport is live and the connection is Connected.
    Started,
    /// A negotiation, protocol or transport failure.
    Error(String),
    /// One inbound message delivered by the transport.
    Received(Value),
    /// The connection returned to Disconnected.
    Disconnected,
    StateChanged(StateChange),
    /// Time since the last inbound message crossed the keep-alive warning threshold.
    KeepAliveWarning,
}

impl ConnectionEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            ConnectionEvent::Starting => EventKind::Starting,
            ConnectionEvent::Started => EventKind::Started,
            ConnectionEvent::Error(_) => EventKind::Error,
            ConnectionEvent::Received(_) => EventKind::Received,
            ConnectionEvent::Disconnected => EventKind::Disconnected,
            ConnectionEvent::StateChanged(_) => EventKind::StateChanged,
            ConnectionEvent::KeepAliveWarning => EventKind::KeepAliveWarning,
        }
    }
}

/// Channel an event is published on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Starting,
    Started,
    Error,
    Received,
    Disconnected,
    StateChanged,
    KeepAliveWarning,
}

/// Handle returned by [`EventBus::subscribe`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

pub(crate) type Handler = Arc<dyn Fn(&Connection, &ConnectionEvent) + Send + Sync>;

/// Publish/subscribe registry owned by a connection.
#[derive(Default)]
pub struct EventBus {
    handlers: Mutex<HashMap<EventKind, Vec<(SubscriptionId, Handler)>>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler for one kind of event.
    pub fn subscribe<F>(&self, kind: EventKind, handler: F) -> SubscriptionId
    where
        F: Fn(&Connection, &ConnectionEvent) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.handlers
            .lock()
            .entry(kind)
            .or_default()
            .push((id, Arc::new(handler)));
        id
    }

    /// Removes a handler. Returns `false` if it was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut handlers = self.handlers.lock();
        for list in handlers.values_mut() {
            if let Some(pos) = list.iter().position(|(sid, _)| *sid == id) {
                list.remove(pos);
                return true;
            }
        }
        false
    }

    /// Invokes every handler of the event's kind, in subscription order.
    ///
    /// The handler list is snapshotted first, so handlers may subscribe or
    /// unsubscribe while the event is delivered.
    pub(crate) fn publish(&self, connection: &Connection, event: &ConnectionEvent) {
        let snapshot: Vec<Handler> = self
            .handlers
            .lock()
            .get(&event.kind())
            .map(|list| list.iter().map(|(_, h)| h.clone()).collect())
            .unwrap_or_default();
        for handler in snapshot {
            handler(connection, event);
        }
    }

    pub fn handler_count(&self, kind: EventKind) -> usize {
        self.handlers.lock().get(&kind).map_or(0, Vec::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConnectionConfig;
    use std::sync::atomic::AtomicUsize;

    fn connection() -> Connection {
        Connection::new(ConnectionConfig::builder("http://localhost/signalr").build()).unwrap()
    }

    #[test]
    fn test_publish_reaches_only_matching_kind() {
        let conn = connection();
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let hits_clone = hits.clone();
        bus.subscribe(EventKind::Starting, move |_, event| {
            assert_eq!(*event, ConnectionEvent::Starting);
            hits_clone.fetch_add(1, Ordering::Relaxed);
        });

        bus.publish(&conn, &ConnectionEvent::Starting);
        bus.publish(&conn, &ConnectionEvent::Started);
        assert_eq!(hits.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_unsubscribe() {
        let conn = connection();
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let hits_clone = hits.clone();
        let id = bus.subscribe(EventKind::Disconnected, move |_, _| {
            hits_clone.fetch_add(1, Ordering::Relaxed);
        });
        assert!(bus.unsubscribe(id));
        assert!(!bus.unsubscribe(id));

        bus.publish(&conn, &ConnectionEvent::Disconnected);
        assert_eq!(hits.load(Ordering::Relaxed), 0);
        assert_eq!(bus.handler_count(EventKind::Disconnected), 0);
    }

    #[test]
    fn test_handler_may_subscribe_during_publish() {
        let conn = connection();
        let bus = Arc::new(EventBus::new());

        let bus_clone = bus.clone();
        bus.subscribe(EventKind::Received, move |_, _| {
            bus_clone.subscribe(EventKind::Received, |_, _| {});
        });

        bus.publish(&conn, &ConnectionEvent::Received(Value::Null));
        assert_eq!(bus.handler_count(EventKind::Received), 2);
    }
}
