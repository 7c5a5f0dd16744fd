//! Reactive state module - observable cells, their registry and the agent status bundle
//!
//! A [`ReactiveState`] owns one value. Every *effective* change (new value
//! differs from the old one under `PartialEq`) produces exactly one
//! [`StateChange`], delivered synchronously to the cell's own subscribers and
//! then published on the attached [`EventBus`] as `EventType::StateChanged`
//! with payload `{name, change}`. Setting the current value again does
//! nothing at all.
//!
//! # Example
//!
//! ```
//! use loopkeeper::state::ReactiveState;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use std::sync::Arc;
//!
//! let count = ReactiveState::new("loop_count", 0u32);
//! let notified = Arc::new(AtomicUsize::new(0));
//! let n = Arc::clone(&notified);
//! count.subscribe(move |change| {
//!     assert_eq!(change.new_value, change.old_value + 1);
//!     n.fetch_add(1, Ordering::SeqCst);
//! });
//!
//! count.update(|v| v + 1);
//! count.set(1); // no-op: already 1
//! assert_eq!(count.get(), 1);
//! assert_eq!(notified.load(Ordering::SeqCst), 1);
//! ```

pub mod agent;
pub mod registry;

pub use agent::{AgentState, AgentStatus};
pub use registry::StateRegistry;

use crate::bus::{EventBus, EventData, EventType, SubscriptionId};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::sync::{Arc, Mutex, RwLock};
use tracing::warn;

/// Bounds every reactive value must satisfy.
///
/// `PartialEq` drives no-op suppression, `Serialize` feeds the event payload.
pub trait StateValue: Clone + PartialEq + Serialize + Send + Sync + 'static {}

impl<T> StateValue for T where T: Clone + PartialEq + Serialize + Send + Sync + 'static {}

/// Record of one effective mutation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StateChange<T> {
    /// Name of the state that changed
    pub property_name: String,
    /// Value before the change
    pub old_value: T,
    /// Value after the change
    pub new_value: T,
    /// When the change was applied
    pub timestamp: DateTime<Utc>,
}

/// Callback invoked with each change of a [`ReactiveState`].
pub type ChangeHandler<T> = Arc<dyn Fn(&StateChange<T>) + Send + Sync>;

type ChangeHandlers<T> = Arc<Vec<(SubscriptionId, ChangeHandler<T>)>>;

/// A named, observable, thread-safe value cell.
///
/// Mutations are serialised by an internal mutex; the compare, swap and
/// `StateChange` construction happen under it, so concurrent `update` calls
/// never lose an application. Subscribers run after the lock is released and
/// may call [`get`](Self::get) freely. Cross-thread delivery order is
/// unspecified.
pub struct ReactiveState<T: StateValue> {
    name: String,
    value: Mutex<T>,
    subscribers: RwLock<ChangeHandlers<T>>,
    bus: Option<Arc<EventBus>>,
}

impl<T: StateValue> ReactiveState<T> {
    /// Create a state that notifies local subscribers only.
    ///
    /// No `StateChanged` event is published for its changes, not even on
    /// [`EventBus::global`]. Use [`with_bus`](Self::with_bus) when bus
    /// listeners must see them.
    pub fn new(name: &str, initial: T) -> Self {
        Self {
            name: name.to_string(),
            value: Mutex::new(initial),
            subscribers: RwLock::new(Arc::new(Vec::new())),
            bus: None,
        }
    }

    /// Create a state that also publishes `StateChanged` events on `bus`.
    pub fn with_bus(name: &str, initial: T, bus: Arc<EventBus>) -> Self {
        Self {
            bus: Some(bus),
            ..Self::new(name, initial)
        }
    }

    /// Whether changes are published as `StateChanged` events.
    pub fn has_bus(&self) -> bool {
        self.bus.is_some()
    }

    /// Stable name, used as registry key and in `StateChanged` payloads.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current value.
    pub fn get(&self) -> T {
        self.value.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Replace the value. Returns `false` (and notifies nobody) when `value`
    /// equals the current one.
    pub fn set(&self, value: T) -> bool {
        self.update(move |_| value)
    }

    /// Read-modify-write under the state's lock.
    ///
    /// `f` sees the current value and returns the next one. Returns whether the
    /// value actually changed.
    pub fn update<F>(&self, f: F) -> bool
    where
        F: FnOnce(&T) -> T,
    {
        let change = {
            let mut current = self.value.lock().unwrap_or_else(|e| e.into_inner());
            let next = f(&current);
            if next == *current {
                return false;
            }
            let old_value = std::mem::replace(&mut *current, next.clone());
            StateChange {
                property_name: self.name.clone(),
                old_value,
                new_value: next,
                timestamp: Utc::now(),
            }
        };
        self.notify(&change);
        true
    }

    fn notify(&self, change: &StateChange<T>) {
        let snapshot = Arc::clone(&self.subscribers.read().unwrap_or_else(|e| e.into_inner()));
        for (_, handler) in snapshot.iter() {
            handler(change);
        }

        if let Some(bus) = &self.bus {
            let change_json = serde_json::to_value(change).unwrap_or_else(|e| {
                warn!(state = %self.name, error = %e, "State change is not JSON-serializable");
                Value::Null
            });
            let mut data = EventData::new();
            data.insert("name".to_string(), Value::String(self.name.clone()));
            data.insert("change".to_string(), change_json);
            bus.publish(EventType::StateChanged, data);
        }
    }

    /// Register a change handler.
    pub fn subscribe<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&StateChange<T>) + Send + Sync + 'static,
    {
        let id = SubscriptionId::next();
        let mut subscribers = self.subscribers.write().unwrap_or_else(|e| e.into_inner());
        let mut updated: Vec<_> = subscribers.iter().cloned().collect();
        updated.push((id, Arc::new(handler) as ChangeHandler<T>));
        *subscribers = Arc::new(updated);
        id
    }

    /// Remove a change handler. Returns `false` if `id` is unknown.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.subscribers.write().unwrap_or_else(|e| e.into_inner());
        if !subscribers.iter().any(|(sub, _)| *sub == id) {
            return false;
        }
        let remaining: Vec<_> = subscribers
            .iter()
            .filter(|(sub, _)| *sub != id)
            .cloned()
            .collect();
        *subscribers = Arc::new(remaining);
        true
    }

    /// Number of registered change handlers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }
}

impl<T: StateValue + std::fmt::Debug> std::fmt::Debug for ReactiveState<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReactiveState")
            .field("name", &self.name)
            .field("value", &self.get())
            .field("subscribers", &self.subscriber_count())
            .field("has_bus", &self.has_bus())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::Event;
    use serde_json::json;
    use std::collections::{BTreeMap, HashSet};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counter() -> (Arc<AtomicUsize>, impl Fn(&StateChange<u32>) + Send + Sync + 'static) {
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        (hits, move |_: &StateChange<u32>| {
            h.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_set_notifies_with_old_and_new() {
        let state = ReactiveState::new("step", "idle".to_string());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        state.subscribe(move |change| sink.lock().unwrap().push(change.clone()));

        assert!(state.set("planning".to_string()));

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].property_name, "step");
        assert_eq!(seen[0].old_value, "idle");
        assert_eq!(seen[0].new_value, "planning");
        assert_eq!(state.get(), "planning");
    }

    #[test]
    fn test_set_same_value_is_noop() {
        let bus = Arc::new(EventBus::new());
        let events = Arc::new(AtomicUsize::new(0));
        let e = Arc::clone(&events);
        bus.subscribe(EventType::StateChanged, move |_| {
            e.fetch_add(1, Ordering::SeqCst);
        });

        let state = ReactiveState::with_bus("loop_count", 7u32, Arc::clone(&bus));
        let (hits, handler) = counter();
        state.subscribe(handler);

        assert!(!state.set(7));
        assert!(!state.update(|v| *v));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert_eq!(events.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_structural_equality_for_composite_values() {
        let mut initial = BTreeMap::new();
        initial.insert("model".to_string(), "a".to_string());
        let state = ReactiveState::new("settings", initial.clone());
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        state.subscribe(move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });

        // A distinct but equal map is not a change.
        assert!(!state.set(initial.clone()));
        initial.insert("model".to_string(), "b".to_string());
        assert!(state.set(initial));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_local_state_stays_off_the_bus() {
        let bus = Arc::new(EventBus::new());
        let events = Arc::new(AtomicUsize::new(0));
        let e = Arc::clone(&events);
        bus.subscribe(EventType::StateChanged, move |_| {
            e.fetch_add(1, Ordering::SeqCst);
        });

        let local = ReactiveState::new("draft", 0u32);
        let (hits, handler) = counter();
        local.subscribe(handler);
        assert!(!local.has_bus());
        assert!(local.set(1));
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        let published = ReactiveState::with_bus("draft", 0u32, Arc::clone(&bus));
        assert!(published.has_bus());
        assert!(published.set(1));
        assert_eq!(events.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_state_changed_event_payload() {
        let bus = Arc::new(EventBus::new());
        let captured: Arc<Mutex<Option<Event>>> = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&captured);
        bus.subscribe(EventType::StateChanged, move |event| {
            *sink.lock().unwrap() = Some(event.clone());
        });

        let state = ReactiveState::with_bus("agent.is_running", false, bus);
        state.set(true);

        let event = captured.lock().unwrap().clone().unwrap();
        assert_eq!(event.get("name"), Some(&json!("agent.is_running")));
        let change = event.get("change").unwrap();
        assert_eq!(change["property_name"], json!("agent.is_running"));
        assert_eq!(change["old_value"], json!(false));
        assert_eq!(change["new_value"], json!(true));
        assert!(change["timestamp"].is_string());
    }

    #[test]
    fn test_unsubscribe_stops_delivery() {
        let state = ReactiveState::new("n", 0u32);
        let (hits, handler) = counter();
        let id = state.subscribe(handler);

        state.set(1);
        assert!(state.unsubscribe(id));
        assert!(!state.unsubscribe(id));
        state.set(2);

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(state.subscriber_count(), 0);
    }

    #[test]
    fn test_subscriber_can_read_state() {
        let state = Arc::new(ReactiveState::new("n", 0u32));
        let reader = Arc::clone(&state);
        let observed = Arc::new(AtomicUsize::new(0));
        let o = Arc::clone(&observed);
        state.subscribe(move |_| {
            // Would deadlock if handlers ran under the value lock.
            o.store(reader.get() as usize, Ordering::SeqCst);
        });

        state.set(5);
        assert_eq!(observed.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn test_concurrent_distinct_sets_each_notify_once() {
        let bus = Arc::new(EventBus::new());
        let events = Arc::new(AtomicUsize::new(0));
        let e = Arc::clone(&events);
        bus.subscribe(EventType::StateChanged, move |_| {
            e.fetch_add(1, Ordering::SeqCst);
        });

        let state = Arc::new(ReactiveState::with_bus("n", 0u32, bus));
        let seen = Arc::new(Mutex::new(HashSet::new()));
        let sink = Arc::clone(&seen);
        state.subscribe(move |change| {
            sink.lock().unwrap().insert(change.new_value);
        });

        let handles: Vec<_> = (1..=10u32)
            .map(|v| {
                let state = Arc::clone(&state);
                std::thread::spawn(move || state.set(v))
            })
            .collect();
        let effective = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|changed| *changed)
            .count();

        assert_eq!(effective, 10);
        assert_eq!(seen.lock().unwrap().len(), 10);
        assert_eq!(events.load(Ordering::SeqCst), 10);
    }

    #[test]
    fn test_concurrent_updates_are_not_lost() {
        let state = Arc::new(ReactiveState::new("counter", 0u64));
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        state.subscribe(move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let state = Arc::clone(&state);
                std::thread::spawn(move || {
                    for _ in 0..250 {
                        state.update(|v| v + 1);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(state.get(), 2000);
        assert_eq!(hits.load(Ordering::SeqCst), 2000);
    }
}
