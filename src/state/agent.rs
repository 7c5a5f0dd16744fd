//! Agent-loop status as a bundle of reactive fields.
//!
//! One [`AgentState`] is created per agent run. Construction registers every
//! field in the given [`StateRegistry`] under `agent.<field>`, overwriting the
//! previous run's entries, and wires each field to the event bus so the UI
//! sees every change as `StateChanged`.

use super::{ReactiveState, StateRegistry, StateValue};
use crate::bus::{EventBus, EventType};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info};

/// Registry key prefix of every agent field.
pub const AGENT_STATE_PREFIX: &str = "agent.";

/// Point-in-time copy of every agent field, for rendering or logging.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentStatus {
    pub current_step: String,
    pub is_running: bool,
    pub is_paused: bool,
    pub is_stopped: bool,
    pub is_compacting: bool,
    pub compaction_progress: f64,
    pub compaction_status: String,
    pub loop_count: u32,
    pub max_iterations: u32,
    pub is_doom_loop_detected: bool,
    pub doom_loop_message: String,
    pub is_permission_required: bool,
    pub permission_prompt: String,
    pub is_permission_granted: bool,
}

/// Reactive status of one agent run.
pub struct AgentState {
    bus: Option<Arc<EventBus>>,
    current_step: Arc<ReactiveState<String>>,
    is_running: Arc<ReactiveState<bool>>,
    is_paused: Arc<ReactiveState<bool>>,
    is_stopped: Arc<ReactiveState<bool>>,
    is_compacting: Arc<ReactiveState<bool>>,
    compaction_progress: Arc<ReactiveState<f64>>,
    compaction_status: Arc<ReactiveState<String>>,
    loop_count: Arc<ReactiveState<u32>>,
    max_iterations: Arc<ReactiveState<u32>>,
    is_doom_loop_detected: Arc<ReactiveState<bool>>,
    doom_loop_message: Arc<ReactiveState<String>>,
    is_permission_required: Arc<ReactiveState<bool>>,
    permission_prompt: Arc<ReactiveState<String>>,
    is_permission_granted: Arc<ReactiveState<bool>>,
}

fn field<T: StateValue>(
    registry: &StateRegistry,
    bus: Option<&Arc<EventBus>>,
    name: &str,
    initial: T,
) -> Arc<ReactiveState<T>> {
    let key = format!("{}{}", AGENT_STATE_PREFIX, name);
    let state = Arc::new(match bus {
        Some(bus) => ReactiveState::with_bus(&key, initial, Arc::clone(bus)),
        None => ReactiveState::new(&key, initial),
    });
    registry.register(&key, Arc::clone(&state));
    state
}

impl AgentState {
    /// Create the fields, register them in `registry` and attach them to `bus`.
    pub fn new(registry: &StateRegistry, bus: Option<Arc<EventBus>>, max_iterations: u32) -> Self {
        let b = bus.as_ref();
        Self {
            current_step: field(registry, b, "current_step", String::new()),
            is_running: field(registry, b, "is_running", false),
            is_paused: field(registry, b, "is_paused", false),
            is_stopped: field(registry, b, "is_stopped", false),
            is_compacting: field(registry, b, "is_compacting", false),
            compaction_progress: field(registry, b, "compaction_progress", 0.0),
            compaction_status: field(registry, b, "compaction_status", String::new()),
            loop_count: field(registry, b, "loop_count", 0),
            max_iterations: field(registry, b, "max_iterations", max_iterations),
            is_doom_loop_detected: field(registry, b, "is_doom_loop_detected", false),
            doom_loop_message: field(registry, b, "doom_loop_message", String::new()),
            is_permission_required: field(registry, b, "is_permission_required", false),
            permission_prompt: field(registry, b, "permission_prompt", String::new()),
            is_permission_granted: field(registry, b, "is_permission_granted", false),
            bus,
        }
    }

    // ── field accessors ────────────────────────────────────────────────

    pub fn current_step(&self) -> &Arc<ReactiveState<String>> {
        &self.current_step
    }

    pub fn is_running(&self) -> &Arc<ReactiveState<bool>> {
        &self.is_running
    }

    pub fn is_paused(&self) -> &Arc<ReactiveState<bool>> {
        &self.is_paused
    }

    pub fn is_stopped(&self) -> &Arc<ReactiveState<bool>> {
        &self.is_stopped
    }

    pub fn is_compacting(&self) -> &Arc<ReactiveState<bool>> {
        &self.is_compacting
    }

    /// Progress of the running compaction, `0.0..=1.0`.
    pub fn compaction_progress(&self) -> &Arc<ReactiveState<f64>> {
        &self.compaction_progress
    }

    pub fn compaction_status(&self) -> &Arc<ReactiveState<String>> {
        &self.compaction_status
    }

    pub fn loop_count(&self) -> &Arc<ReactiveState<u32>> {
        &self.loop_count
    }

    pub fn max_iterations(&self) -> &Arc<ReactiveState<u32>> {
        &self.max_iterations
    }

    pub fn is_doom_loop_detected(&self) -> &Arc<ReactiveState<bool>> {
        &self.is_doom_loop_detected
    }

    pub fn doom_loop_message(&self) -> &Arc<ReactiveState<String>> {
        &self.doom_loop_message
    }

    pub fn is_permission_required(&self) -> &Arc<ReactiveState<bool>> {
        &self.is_permission_required
    }

    pub fn permission_prompt(&self) -> &Arc<ReactiveState<String>> {
        &self.permission_prompt
    }

    pub fn is_permission_granted(&self) -> &Arc<ReactiveState<bool>> {
        &self.is_permission_granted
    }

    // ── lifecycle ──────────────────────────────────────────────────────

    fn publish(&self, event_type: EventType, data: serde_json::Value) {
        if let Some(bus) = &self.bus {
            bus.publish_json(event_type, data);
        }
    }

    /// Mark the run as started.
    pub fn start(&self) {
        self.is_stopped.set(false);
        self.is_paused.set(false);
        self.is_running.set(true);
        info!(max_iterations = self.max_iterations.get(), "Agent run started");
    }

    /// Enter a new loop step. Increments `loop_count` and publishes `StepStarted`.
    pub fn begin_step(&self, step: &str) -> u32 {
        self.current_step.set(step.to_string());
        self.loop_count.update(|n| n.saturating_add(1));
        let loop_count = self.loop_count.get();
        self.publish(
            EventType::StepStarted,
            json!({ "step": step, "loop_count": loop_count }),
        );
        loop_count
    }

    /// Finish the current step and publish `StepCompleted`.
    pub fn complete_step(&self) {
        self.publish(
            EventType::StepCompleted,
            json!({ "step": self.current_step.get(), "loop_count": self.loop_count.get() }),
        );
    }

    /// Whether the loop may run another iteration.
    pub fn has_iterations_left(&self) -> bool {
        self.loop_count.get() < self.max_iterations.get()
    }

    pub fn pause(&self) {
        if self.is_running.get() {
            self.is_paused.set(true);
        }
    }

    pub fn resume(&self) {
        self.is_paused.set(false);
    }

    /// End the run and publish `LoopCompleted` with `reason`.
    pub fn stop(&self, reason: &str) {
        self.is_running.set(false);
        self.is_paused.set(false);
        self.is_stopped.set(true);
        info!(loop_count = self.loop_count.get(), reason, "Agent run stopped");
        self.publish(
            EventType::LoopCompleted,
            json!({ "loop_count": self.loop_count.get(), "reason": reason }),
        );
    }

    // ── compaction ─────────────────────────────────────────────────────

    pub fn begin_compaction(&self, status: &str) {
        self.compaction_progress.set(0.0);
        self.compaction_status.set(status.to_string());
        self.is_compacting.set(true);
    }

    /// Record progress in `[0, 1]`; out-of-range values are clamped and
    /// non-finite ones stored as 0.
    pub fn set_compaction_progress(&self, progress: f64, status: &str) {
        let progress = if progress.is_finite() {
            progress.clamp(0.0, 1.0)
        } else {
            0.0
        };
        self.compaction_progress.set(progress);
        self.compaction_status.set(status.to_string());
    }

    pub fn finish_compaction(&self, status: &str) {
        self.compaction_progress.set(1.0);
        self.compaction_status.set(status.to_string());
        self.is_compacting.set(false);
    }

    // ── doom loop and permission ───────────────────────────────────────

    pub fn flag_doom_loop(&self, message: &str) {
        self.doom_loop_message.set(message.to_string());
        self.is_doom_loop_detected.set(true);
    }

    pub fn clear_doom_loop(&self) {
        self.is_doom_loop_detected.set(false);
        self.doom_loop_message.set(String::new());
    }

    /// Record that a human must answer `prompt`. Clears any previous grant.
    pub fn request_permission(&self, prompt: &str) {
        self.is_permission_granted.set(false);
        self.permission_prompt.set(prompt.to_string());
        self.is_permission_required.set(true);
    }

    pub fn resolve_permission(&self, granted: bool) {
        self.is_permission_granted.set(granted);
        self.is_permission_required.set(false);
        debug!(granted, "Permission resolved");
    }

    /// Copy of every field.
    pub fn snapshot(&self) -> AgentStatus {
        AgentStatus {
            current_step: self.current_step.get(),
            is_running: self.is_running.get(),
            is_paused: self.is_paused.get(),
            is_stopped: self.is_stopped.get(),
            is_compacting: self.is_compacting.get(),
            compaction_progress: self.compaction_progress.get(),
            compaction_status: self.compaction_status.get(),
            loop_count: self.loop_count.get(),
            max_iterations: self.max_iterations.get(),
            is_doom_loop_detected: self.is_doom_loop_detected.get(),
            doom_loop_message: self.doom_loop_message.get(),
            is_permission_required: self.is_permission_required.get(),
            permission_prompt: self.permission_prompt.get(),
            is_permission_granted: self.is_permission_granted.get(),
        }
    }
}

impl std::fmt::Debug for AgentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("AgentState").field(&self.snapshot()).finish()
    }
}
