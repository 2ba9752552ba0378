use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::warn;

use crate::protocol::Notification;

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Handle returned by every registration; pass it to
/// [`EventRouter::remove`] to unregister.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Everything the router emits, for async consumers.
#[derive(Clone, Debug, PartialEq)]
pub enum GatewayEvent {
    Connected,
    Disconnected,
    Notification(Notification),
}

type LifecycleFn = Arc<dyn Fn() + Send + Sync>;
type NotificationFn = Arc<dyn Fn(&Notification) + Send + Sync>;
type PayloadFn = Arc<dyn Fn(&Value) + Send + Sync>;

#[derive(Clone)]
enum Listener {
    Connected(LifecycleFn),
    Disconnected(LifecycleFn),
    /// Wildcard: every notification.
    Notification(NotificationFn),
    Named(String, PayloadFn),
}

/// Fans lifecycle events and notifications out to registered callbacks.
///
/// Callbacks run synchronously on the socket task, in registration order,
/// outside the registry lock. A panicking callback is logged and skipped.
pub struct EventRouter {
    listeners: Mutex<Vec<(ListenerId, Listener)>>,
    next_id: AtomicU64,
    events: broadcast::Sender<GatewayEvent>,
}

impl Default for EventRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl EventRouter {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            listeners: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            events,
        }
    }

    pub fn on_connected(&self, f: impl Fn() + Send + Sync + 'static) -> ListenerId {
        self.register(Listener::Connected(Arc::new(f)))
    }

    pub fn on_disconnected(&self, f: impl Fn() + Send + Sync + 'static) -> ListenerId {
        self.register(Listener::Disconnected(Arc::new(f)))
    }

    /// Receive every notification, before any named listener sees it.
    pub fn on_notification(&self, f: impl Fn(&Notification) + Send + Sync + 'static) -> ListenerId {
        self.register(Listener::Notification(Arc::new(f)))
    }

    /// Receive the payload of notifications named `name`.
    pub fn on(&self, name: impl Into<String>, f: impl Fn(&Value) + Send + Sync + 'static) -> ListenerId {
        self.register(Listener::Named(name.into(), Arc::new(f)))
    }

    pub fn remove(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.lock();
        let before = listeners.len();
        listeners.retain(|(lid, _)| *lid != id);
        listeners.len() != before
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GatewayEvent> {
        self.events.subscribe()
    }

    pub(crate) fn emit_connected(&self) {
        for (id, listener) in self.snapshot() {
            if let Listener::Connected(f) = listener {
                guarded(id, "connected", || f());
            }
        }
        let _ = self.events.send(GatewayEvent::Connected);
    }

    pub(crate) fn emit_disconnected(&self) {
        for (id, listener) in self.snapshot() {
            if let Listener::Disconnected(f) = listener {
                guarded(id, "disconnected", || f());
            }
        }
        let _ = self.events.send(GatewayEvent::Disconnected);
    }

    /// Wildcard listeners first, then listeners registered for this name.
    pub(crate) fn dispatch(&self, notification: &Notification) {
        let listeners = self.snapshot();
        for (id, listener) in &listeners {
            if let Listener::Notification(f) = listener {
                guarded(*id, &notification.name, || f(notification));
            }
        }
        let payload = notification.payload();
        for (id, listener) in &listeners {
            if let Listener::Named(name, f) = listener {
                if *name == notification.name {
                    guarded(*id, &notification.name, || f(payload));
                }
            }
        }
        let _ = self.events.send(GatewayEvent::Notification(notification.clone()));
    }

    fn register(&self, listener: Listener) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.lock().push((id, listener));
        id
    }

    fn snapshot(&self) -> Vec<(ListenerId, Listener)> {
        self.listeners.lock().clone()
    }
}

fn guarded(id: ListenerId, event: &str, f: impl FnOnce()) {
    if catch_unwind(AssertUnwindSafe(f)).is_err() {
        warn!(listener = id.0, event, "gateway listener panicked");
    }
}
