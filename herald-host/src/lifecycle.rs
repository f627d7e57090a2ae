//! Named lifecycle events
//!
//! A small in-process publish/subscribe bus. Listeners are called
//! synchronously, in subscription order, on the emitting task. Nothing is
//! buffered: a listener added after an emit never sees that event.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

/// Emitted once after the environment has joined and every extension loaded
pub const FRAMEWORK_READY: &str = "framework:ready";

/// Environment authenticated (before joining the world)
pub const ENVIRONMENT_CONNECTED: &str = "environment:connected";

/// Environment fully joined the world
pub const ENVIRONMENT_JOINED: &str = "environment:joined";

/// Removed by the remote side
pub const ENVIRONMENT_KICKED: &str = "environment:kicked";

/// Connection closed
pub const ENVIRONMENT_DISCONNECTED: &str = "environment:disconnected";

/// Non-fatal client fault
pub const ENVIRONMENT_FAULT: &str = "environment:fault";

/// One emitted event
#[derive(Debug, Clone)]
pub struct LifecycleEvent {
    pub name: String,
    pub payload: Value,
    pub emitted_at: DateTime<Utc>,
}

/// Identifies a subscription for `unsubscribe`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Listener = Arc<dyn Fn(&LifecycleEvent) + Send + Sync>;

struct Subscription {
    id: SubscriptionId,
    event: String,
    listener: Listener,
}

/// Process-wide event bus, cheap to clone
#[derive(Clone, Default)]
pub struct LifecycleBus {
    subscriptions: Arc<RwLock<Vec<Subscription>>>,
    next_id: Arc<AtomicU64>,
}

impl LifecycleBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Call `listener` for every future `event`
    pub fn subscribe<F>(&self, event: impl Into<String>, listener: F) -> SubscriptionId
    where
        F: Fn(&LifecycleEvent) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let event = event.into();
        tracing::debug!(event = %event, id = id.0, "Lifecycle subscription added");
        self.subscriptions.write().unwrap().push(Subscription {
            id,
            event,
            listener: Arc::new(listener),
        });
        id
    }

    /// Remove a subscription; returns `false` if it was already gone
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscriptions = self.subscriptions.write().unwrap();
        let before = subscriptions.len();
        subscriptions.retain(|s| s.id != id);
        subscriptions.len() != before
    }

    /// Notify every listener of `event`; returns how many were called
    ///
    /// A panicking listener is logged and skipped; the others still run.
    pub fn emit(&self, event: &str, payload: Value) -> usize {
        // Listeners may subscribe or emit themselves, so call them unlocked.
        let listeners: Vec<Listener> = self
            .subscriptions
            .read()
            .unwrap()
            .iter()
            .filter(|s| s.event == event)
            .map(|s| s.listener.clone())
            .collect();

        let emitted = LifecycleEvent {
            name: event.to_string(),
            payload,
            emitted_at: Utc::now(),
        };

        tracing::debug!(event = %event, listeners = listeners.len(), "Emitting lifecycle event");
        for listener in &listeners {
            if panic::catch_unwind(AssertUnwindSafe(|| listener(&emitted))).is_err() {
                tracing::error!(event = %event, "Lifecycle listener panicked");
            }
        }
        listeners.len()
    }

    /// Number of listeners for `event`
    pub fn listener_count(&self, event: &str) -> usize {
        self.subscriptions
            .read()
            .unwrap()
            .iter()
            .filter(|s| s.event == event)
            .count()
    }
}

impl std::fmt::Debug for LifecycleBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleBus")
            .field("subscriptions", &self.subscriptions.read().unwrap().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    #[test]
    fn test_listeners_called_in_order() {
        let bus = LifecycleBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for tag in ["first", "second"] {
            let seen = seen.clone();
            bus.subscribe(FRAMEWORK_READY, move |_| seen.lock().unwrap().push(tag));
        }
        bus.subscribe("other", |_| panic!("wrong event"));

        assert_eq!(bus.emit(FRAMEWORK_READY, Value::Null), 2);
        assert_eq!(*seen.lock().unwrap(), vec!["first", "second"]);
    }

    #[test]
    fn test_no_replay_for_late_subscribers() {
        let bus = LifecycleBus::new();
        bus.emit(FRAMEWORK_READY, Value::Null);

        let hits = Arc::new(Mutex::new(0));
        let counter = hits.clone();
        bus.subscribe(FRAMEWORK_READY, move |_| *counter.lock().unwrap() += 1);
        assert_eq!(*hits.lock().unwrap(), 0);

        bus.emit(FRAMEWORK_READY, Value::Null);
        assert_eq!(*hits.lock().unwrap(), 1);
    }

    #[test]
    fn test_payload_is_delivered() {
        let bus = LifecycleBus::new();
        let seen = Arc::new(Mutex::new(None));
        let sink = seen.clone();
        bus.subscribe(ENVIRONMENT_KICKED, move |event| {
            *sink.lock().unwrap() = Some(event.payload.clone());
        });

        bus.emit(ENVIRONMENT_KICKED, json!({ "reason": "flying" }));
        assert_eq!(
            seen.lock().unwrap().clone(),
            Some(json!({ "reason": "flying" }))
        );
    }

    #[test]
    fn test_unsubscribe() {
        let bus = LifecycleBus::new();
        let id = bus.subscribe(ENVIRONMENT_JOINED, |_| {});
        assert_eq!(bus.listener_count(ENVIRONMENT_JOINED), 1);

        assert!(bus.unsubscribe(id));
        assert!(!bus.unsubscribe(id));
        assert_eq!(bus.emit(ENVIRONMENT_JOINED, Value::Null), 0);
    }

    #[test]
    fn test_panicking_listener_is_isolated() {
        let bus = LifecycleBus::new();
        let hits = Arc::new(Mutex::new(0));
        let counter = hits.clone();

        bus.subscribe(ENVIRONMENT_CONNECTED, |_| panic!("listener bug"));
        bus.subscribe(ENVIRONMENT_CONNECTED, move |_| *counter.lock().unwrap() += 1);

        assert_eq!(bus.emit(ENVIRONMENT_CONNECTED, Value::Null), 2);
        assert_eq!(*hits.lock().unwrap(), 1);
    }

    #[test]
    fn test_listener_may_subscribe_during_emit() {
        let bus = LifecycleBus::new();
        let inner = bus.clone();
        bus.subscribe(ENVIRONMENT_JOINED, move |_| {
            inner.subscribe(FRAMEWORK_READY, |_| {});
        });

        bus.emit(ENVIRONMENT_JOINED, Value::Null);
        assert_eq!(bus.listener_count(FRAMEWORK_READY), 1);
    }
}
