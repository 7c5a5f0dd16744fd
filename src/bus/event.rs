//! Event types for the event bus.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicU64, Ordering};

/// Payload of an event: string keys to JSON values.
pub type EventData = Map<String, Value>;

/// Kinds of events broadcast on the [`EventBus`](super::EventBus).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// A reactive state changed value. Data: `{name, change}`.
    StateChanged,
    /// The agent loop began a step. Data: `{step, loop_count}`.
    StepStarted,
    /// The agent loop finished a step. Data: `{step, loop_count}`.
    StepCompleted,
    /// The agent loop finished. Data: `{loop_count, reason}`.
    LoopCompleted,
    /// A session compaction started. Data: `{session_id, messages}`.
    CompactionStarted,
    /// A session compaction finished. Data: `{session_id, performed, messages_removed}`.
    CompactionCompleted,
    /// Repetition was detected. Data: `{message, window}`.
    DoomLoopDetected,
    /// A human is being asked for approval. Data: `{prompt}`.
    PermissionRequested,
    /// The approval prompt was answered. Data: `{prompt, granted}`.
    PermissionResolved,
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            EventType::StateChanged => "state_changed",
            EventType::StepStarted => "step_started",
            EventType::StepCompleted => "step_completed",
            EventType::LoopCompleted => "loop_completed",
            EventType::CompactionStarted => "compaction_started",
            EventType::CompactionCompleted => "compaction_completed",
            EventType::DoomLoopDetected => "doom_loop_detected",
            EventType::PermissionRequested => "permission_requested",
            EventType::PermissionResolved => "permission_resolved",
        };
        f.write_str(name)
    }
}

/// An immutable event, built once at publish time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Which kind of event this is
    pub event_type: EventType,
    /// Event payload, empty unless the publisher supplied one
    #[serde(default)]
    pub data: EventData,
}

impl Event {
    /// Create an event with the given payload.
    pub fn new(event_type: EventType, data: EventData) -> Self {
        Self { event_type, data }
    }

    /// Create an event with an empty payload.
    pub fn empty(event_type: EventType) -> Self {
        Self::new(event_type, EventData::new())
    }

    /// Create an event from a JSON value.
    ///
    /// Objects become the payload directly; any other value is stored under
    /// the `value` key.
    pub fn from_json(event_type: EventType, value: Value) -> Self {
        let data = match value {
            Value::Object(map) => map,
            Value::Null => EventData::new(),
            other => {
                let mut map = EventData::new();
                map.insert("value".to_string(), other);
                map
            }
        };
        Self::new(event_type, data)
    }

    /// Look up a payload field.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }
}

static NEXT_SUBSCRIPTION: AtomicU64 = AtomicU64::new(1);

/// Handle returned by `subscribe`, used to unsubscribe later.
///
/// Ids are unique for the lifetime of the process, across buses and states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    pub(crate) fn next() -> Self {
        Self(NEXT_SUBSCRIPTION.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw numeric value of the id.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}
