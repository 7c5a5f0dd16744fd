//! Loop safety: doom-loop detection behind a permission gate.
//!
//! [`DoomLoopAgent`] is what the agent loop consults when it suspects it is
//! going in circles. The detector always runs first; only a confirmed loop
//! reaches the permission gate, and only a granted permission lets the loop
//! continue.
//!
//! ```
//! use loopkeeper::safety::{DenyAllPermissionHandler, DoomLoopAgent, DoomLoopDetector};
//! use loopkeeper::session::Message;
//! use std::sync::Arc;
//!
//! let agent = DoomLoopAgent::new(DoomLoopDetector::default())
//!     .with_handler(Arc::new(DenyAllPermissionHandler));
//!
//! let stuck: Vec<Message> = (0..3)
//!     .flat_map(|_| [Message::user("try again"), Message::assistant("same error")])
//!     .collect();
//! assert!(!agent.handle_doom_loop(&stuck)); // detected, then denied
//! assert!(!agent.handle_doom_loop(&[]));
//! ```

pub mod doom_loop;
pub mod permission;

pub use doom_loop::DoomLoopDetector;
pub use permission::{
    CallbackPermissionHandler, DenyAllPermissionHandler, PermissionManager,
    PermissionPromptHandler,
};

use crate::bus::{EventBus, EventType};
use crate::log_component;
use crate::session::Message;
use crate::state::AgentState;
use serde_json::json;
use std::sync::Arc;

/// Who answers once a loop is detected.
#[derive(Clone, Default)]
enum PermissionGate {
    Manager(Arc<PermissionManager>),
    Handler(Arc<dyn PermissionPromptHandler>),
    #[default]
    None,
}

impl PermissionGate {
    fn ask(&self, prompt: &str) -> bool {
        match self {
            PermissionGate::Manager(manager) => manager.request_permission(prompt),
            PermissionGate::Handler(handler) => handler.prompt_permission(prompt),
            PermissionGate::None => false,
        }
    }
}

/// Detector plus permission gate.
pub struct DoomLoopAgent {
    detector: DoomLoopDetector,
    gate: PermissionGate,
    agent_state: Option<Arc<AgentState>>,
    bus: Option<Arc<EventBus>>,
}

impl DoomLoopAgent {
    /// Agent with no gate: detected loops are never allowed to continue.
    pub fn new(detector: DoomLoopDetector) -> Self {
        Self {
            detector,
            gate: PermissionGate::None,
            agent_state: None,
            bus: None,
        }
    }

    /// Gate through a [`PermissionManager`] (replaces any handler).
    pub fn with_manager(mut self, manager: Arc<PermissionManager>) -> Self {
        self.gate = PermissionGate::Manager(manager);
        self
    }

    /// Gate through a bare handler (replaces any manager).
    pub fn with_handler(mut self, handler: Arc<dyn PermissionPromptHandler>) -> Self {
        self.gate = PermissionGate::Handler(handler);
        self
    }

    pub fn with_agent_state(mut self, state: Arc<AgentState>) -> Self {
        self.agent_state = Some(state);
        self
    }

    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn detector(&self) -> &DoomLoopDetector {
        &self.detector
    }

    /// Whether the loop may continue past a suspected doom loop.
    ///
    /// `false` without prompting when no loop is detected; otherwise the
    /// gate's answer.
    pub fn handle_doom_loop(&self, messages: &[Message]) -> bool {
        if !self.detector.is_doom_loop(messages) {
            return false;
        }

        let message = format!(
            "The last {} exchanges repeat each other (similarity >= {:.2}).",
            self.detector.window(),
            self.detector.similarity_threshold()
        );
        log_component!(
            warn,
            "doom_loop",
            "Doom loop detected",
            window = self.detector.window(),
            messages = messages.len(),
        );

        if let Some(state) = &self.agent_state {
            state.flag_doom_loop(&message);
        }
        if let Some(bus) = &self.bus {
            bus.publish_json(
                EventType::DoomLoopDetected,
                json!({ "message": message, "window": self.detector.window() }),
            );
        }

        self.gate.ask(&format!("{} Continue anyway?", message))
    }
}

impl std::fmt::Debug for DoomLoopAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let gate = match self.gate {
            PermissionGate::Manager(_) => "manager",
            PermissionGate::Handler(_) => "handler",
            PermissionGate::None => "none",
        };
        f.debug_struct("DoomLoopAgent")
            .field("detector", &self.detector)
            .field("gate", &gate)
            .finish()
    }
}
