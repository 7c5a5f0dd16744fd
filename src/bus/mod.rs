//! Event Bus Module
//!
//! Synchronous publish/subscribe broadcaster keyed by [`EventType`]. Every
//! effective [`ReactiveState`](crate::state::ReactiveState) mutation lands
//! here as `EventType::StateChanged`, next to agent lifecycle events that the
//! UI layer renders.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐  set()   ┌──────────────┐ publish() ┌──────────────┐
//! │  Agent loop  │────────> │ReactiveState │─────────> │   EventBus   │
//! └──────────────┘          └──────────────┘           └──────────────┘
//!                                  │                          │
//!                                  ▼ local subscribers        ▼ per-type handlers
//!                           ┌──────────────┐           ┌──────────────┐
//!                           │   Observers  │           │   UI / TUI   │
//!                           └──────────────┘           └──────────────┘
//! ```
//!
//! Handlers run on the publishing thread, one after another, against a
//! snapshot of the handler list taken when `publish` starts. No lock is held
//! while a handler runs, so a handler may subscribe, unsubscribe or publish.
//! A slow handler stalls its own publisher and nobody else.
//!
//! # Example
//!
//! ```
//! use loopkeeper::bus::{EventBus, EventType};
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use std::sync::Arc;
//!
//! let bus = EventBus::new();
//! let seen = Arc::new(AtomicUsize::new(0));
//! let counter = Arc::clone(&seen);
//! bus.subscribe(EventType::StepStarted, move |_event| {
//!     counter.fetch_add(1, Ordering::SeqCst);
//! });
//!
//! bus.publish_empty(EventType::StepStarted);
//! assert_eq!(seen.load(Ordering::SeqCst), 1);
//! ```

pub mod event;

pub use event::{Event, EventData, EventType, SubscriptionId};

use once_cell::sync::Lazy;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::trace;

/// Callback invoked for each published event of a subscribed type.
pub type EventHandler = Arc<dyn Fn(&Event) + Send + Sync>;

type HandlerList = Arc<Vec<(SubscriptionId, EventHandler)>>;

static GLOBAL_BUS: Lazy<Arc<EventBus>> = Lazy::new(|| Arc::new(EventBus::new()));

/// Process-wide publish/subscribe broadcaster.
///
/// Handler lists are copy-on-write: subscribing replaces the list for that
/// type, publishing clones the current `Arc` and iterates it lock-free.
#[derive(Default)]
pub struct EventBus {
    handlers: RwLock<HashMap<EventType, HandlerList>>,
}

impl EventBus {
    /// Creates a new, empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide bus.
    ///
    /// Lives until process exit. Components accept an `Arc<EventBus>` so tests
    /// can pass a fresh instance instead; call [`clear`](Self::clear) between
    /// runs when sharing this one.
    pub fn global() -> Arc<EventBus> {
        Arc::clone(&GLOBAL_BUS)
    }

    /// Register `handler` for events of `event_type`.
    pub fn subscribe<F>(&self, event_type: EventType, handler: F) -> SubscriptionId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let id = SubscriptionId::next();
        let mut handlers = self.handlers.write().unwrap_or_else(|e| e.into_inner());
        let list = handlers.entry(event_type).or_default();
        let mut updated = Vec::with_capacity(list.len() + 1);
        updated.extend(list.iter().cloned());
        updated.push((id, Arc::new(handler) as EventHandler));
        *list = Arc::new(updated);
        id
    }

    /// Remove a handler. Returns `false` if `id` was not subscribed to `event_type`.
    pub fn unsubscribe(&self, event_type: EventType, id: SubscriptionId) -> bool {
        let mut handlers = self.handlers.write().unwrap_or_else(|e| e.into_inner());
        let Some(list) = handlers.get_mut(&event_type) else {
            return false;
        };
        if !list.iter().any(|(sub, _)| *sub == id) {
            return false;
        }
        let remaining: Vec<_> = list.iter().filter(|(sub, _)| *sub != id).cloned().collect();
        if remaining.is_empty() {
            handlers.remove(&event_type);
        } else {
            *list = Arc::new(remaining);
        }
        true
    }

    /// Build an event and deliver it to every handler of its type.
    ///
    /// Returns the number of handlers invoked.
    pub fn publish(&self, event_type: EventType, data: EventData) -> usize {
        self.dispatch(Event::new(event_type, data))
    }

    /// Publish with an empty payload.
    pub fn publish_empty(&self, event_type: EventType) -> usize {
        self.dispatch(Event::empty(event_type))
    }

    /// Publish a JSON payload (see [`Event::from_json`]).
    pub fn publish_json(&self, event_type: EventType, data: Value) -> usize {
        self.dispatch(Event::from_json(event_type, data))
    }

    fn dispatch(&self, event: Event) -> usize {
        let snapshot = {
            let handlers = self.handlers.read().unwrap_or_else(|e| e.into_inner());
            match handlers.get(&event.event_type) {
                Some(list) => Arc::clone(list),
                None => return 0,
            }
        };
        trace!(event = %event.event_type, handlers = snapshot.len(), "Publishing event");
        for (_, handler) in snapshot.iter() {
            handler(&event);
        }
        snapshot.len()
    }

    /// Number of handlers currently registered for `event_type`.
    pub fn subscriber_count(&self, event_type: EventType) -> usize {
        self.handlers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&event_type)
            .map_or(0, |list| list.len())
    }

    /// Drop every handler for every type.
    pub fn clear(&self) {
        self.handlers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let handlers = self.handlers.read().unwrap_or_else(|e| e.into_inner());
        let counts: HashMap<_, _> = handlers.iter().map(|(k, v)| (*k, v.len())).collect();
        f.debug_struct("EventBus").field("handlers", &counts).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[test]
    fn test_publish_without_subscribers() {
        let bus = EventBus::new();
        assert_eq!(bus.publish_empty(EventType::StepStarted), 0);
    }

    #[test]
    fn test_publish_reaches_only_matching_type() {
        let bus = EventBus::new();
        let started = Arc::new(AtomicUsize::new(0));
        let completed = Arc::new(AtomicUsize::new(0));

        let s = Arc::clone(&started);
        bus.subscribe(EventType::StepStarted, move |_| {
            s.fetch_add(1, Ordering::SeqCst);
        });
        let c = Arc::clone(&completed);
        bus.subscribe(EventType::StepCompleted, move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        bus.publish_empty(EventType::StepStarted);
        bus.publish_empty(EventType::StepStarted);
        bus.publish_empty(EventType::StepCompleted);

        assert_eq!(started.load(Ordering::SeqCst), 2);
        assert_eq!(completed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_payload_is_delivered() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&seen);
        bus.subscribe(EventType::LoopCompleted, move |event| {
            *sink.lock().unwrap() = event.get("reason").cloned();
        });

        bus.publish_json(EventType::LoopCompleted, json!({"reason": "max_iterations"}));
        assert_eq!(*seen.lock().unwrap(), Some(json!("max_iterations")));
    }

    #[test]
    fn test_unsubscribe() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        let id = bus.subscribe(EventType::StepStarted, move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });

        assert!(!bus.unsubscribe(EventType::StepCompleted, id));
        assert!(bus.unsubscribe(EventType::StepStarted, id));
        assert!(!bus.unsubscribe(EventType::StepStarted, id));

        bus.publish_empty(EventType::StepStarted);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert_eq!(bus.subscriber_count(EventType::StepStarted), 0);
    }

    #[test]
    fn test_single_thread_order_is_preserved() {
        let bus = EventBus::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&order);
        bus.subscribe(EventType::StepStarted, move |event| {
            let n = event.get("n").and_then(|v| v.as_u64()).unwrap();
            sink.lock().unwrap().push(n);
        });

        for n in 0..50u64 {
            bus.publish_json(EventType::StepStarted, json!({ "n": n }));
        }
        assert_eq!(*order.lock().unwrap(), (0..50).collect::<Vec<_>>());
    }

    #[test]
    fn test_handler_may_subscribe_during_publish() {
        let bus = Arc::new(EventBus::new());
        let inner = Arc::clone(&bus);
        bus.subscribe(EventType::StepStarted, move |_| {
            inner.subscribe(EventType::StepCompleted, |_| {});
        });

        // Would deadlock if the handler list lock were held during dispatch.
        assert_eq!(bus.publish_empty(EventType::StepStarted), 1);
        assert_eq!(bus.subscriber_count(EventType::StepCompleted), 1);
    }

    #[test]
    fn test_concurrent_publish_and_subscribe() {
        let bus = Arc::new(EventBus::new());
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        bus.subscribe(EventType::StepCompleted, move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });

        let publishers: Vec<_> = (0..4)
            .map(|_| {
                let bus = Arc::clone(&bus);
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        bus.publish_empty(EventType::StepCompleted);
                    }
                })
            })
            .collect();
        let subscriber = {
            let bus = Arc::clone(&bus);
            std::thread::spawn(move || {
                for _ in 0..50 {
                    let id = bus.subscribe(EventType::StepCompleted, |_| {});
                    bus.unsubscribe(EventType::StepCompleted, id);
                }
            })
        };

        for p in publishers {
            p.join().unwrap();
        }
        subscriber.join().unwrap();

        assert_eq!(hits.load(Ordering::SeqCst), 400);
        assert_eq!(bus.subscriber_count(EventType::StepCompleted), 1);
    }

    #[test]
    fn test_clear() {
        let bus = EventBus::new();
        bus.subscribe(EventType::StepStarted, |_| {});
        bus.subscribe(EventType::LoopCompleted, |_| {});
        bus.clear();
        assert_eq!(bus.subscriber_count(EventType::StepStarted), 0);
        assert_eq!(bus.publish_empty(EventType::LoopCompleted), 0);
    }

    #[test]
    fn test_global_is_shared() {
        let a = EventBus::global();
        let b = EventBus::global();
        assert!(Arc::ptr_eq(&a, &b));
    }
}
