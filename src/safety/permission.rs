//! Permission gate for risky continuation.
//!
//! A [`PermissionPromptHandler`] is whatever can answer "may the agent go
//! on?": a terminal prompt, a UI dialog, a policy. The default answer is no.
//! [`PermissionManager`] owns the configured handler and mirrors every
//! request into [`AgentState`] and the [`EventBus`] so a UI can show it.

use crate::bus::{EventBus, EventType};
use crate::state::AgentState;
use serde_json::json;
use std::sync::{Arc, RwLock};
use tracing::info;

/// Answers permission prompts.
///
/// The provided `prompt_permission` denies. Implementors that actually ask a
/// human override it.
#[cfg_attr(test, mockall::automock)]
pub trait PermissionPromptHandler: Send + Sync {
    /// Whether the agent may proceed with what `prompt` describes.
    fn prompt_permission(&self, prompt: &str) -> bool {
        let _ = prompt;
        false
    }
}

/// Denies every request.
#[derive(Debug, Clone, Copy, Default)]
pub struct DenyAllPermissionHandler;

impl PermissionPromptHandler for DenyAllPermissionHandler {}

/// Adapts a closure into a [`PermissionPromptHandler`].
///
/// ```
/// use loopkeeper::safety::{CallbackPermissionHandler, PermissionPromptHandler};
///
/// let handler = CallbackPermissionHandler::new(|prompt: &str| prompt.contains("read-only"));
/// assert!(handler.prompt_permission("continue read-only scan?"));
/// assert!(!handler.prompt_permission("delete the branch?"));
/// ```
pub struct CallbackPermissionHandler<F> {
    callback: F,
}

impl<F> CallbackPermissionHandler<F>
where
    F: Fn(&str) -> bool + Send + Sync,
{
    pub fn new(callback: F) -> Self {
        Self { callback }
    }
}

impl<F> PermissionPromptHandler for CallbackPermissionHandler<F>
where
    F: Fn(&str) -> bool + Send + Sync,
{
    fn prompt_permission(&self, prompt: &str) -> bool {
        (self.callback)(prompt)
    }
}

/// Routes permission requests to the configured handler.
#[derive(Default)]
pub struct PermissionManager {
    handler: RwLock<Option<Arc<dyn PermissionPromptHandler>>>,
    agent_state: Option<Arc<AgentState>>,
    bus: Option<Arc<EventBus>>,
}

impl PermissionManager {
    /// Manager with no handler: every request is denied.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_handler(self, handler: Arc<dyn PermissionPromptHandler>) -> Self {
        self.set_handler(Some(handler));
        self
    }

    /// Mirror requests into `state`'s permission fields.
    pub fn with_agent_state(mut self, state: Arc<AgentState>) -> Self {
        self.agent_state = Some(state);
        self
    }

    /// Publish `PermissionRequested` / `PermissionResolved` on `bus`.
    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Replace (or remove, with `None`) the handler.
    pub fn set_handler(&self, handler: Option<Arc<dyn PermissionPromptHandler>>) {
        *self.handler.write().unwrap_or_else(|e| e.into_inner()) = handler;
    }

    pub fn has_handler(&self) -> bool {
        self.handler
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    /// Ask the handler about `prompt`. `false` when no handler is configured.
    pub fn request_permission(&self, prompt: &str) -> bool {
        if let Some(state) = &self.agent_state {
            state.request_permission(prompt);
        }
        if let Some(bus) = &self.bus {
            bus.publish_json(EventType::PermissionRequested, json!({ "prompt": prompt }));
        }

        // Clone out so the handler runs without the lock held.
        let handler = self
            .handler
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        let granted = handler.is_some_and(|h| h.prompt_permission(prompt));
        info!(granted, prompt, "Permission request answered");

        if let Some(state) = &self.agent_state {
            state.resolve_permission(granted);
        }
        if let Some(bus) = &self.bus {
            bus.publish_json(
                EventType::PermissionResolved,
                json!({ "prompt": prompt, "granted": granted }),
            );
        }
        granted
    }
}

impl std::fmt::Debug for PermissionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PermissionManager")
            .field("has_handler", &self.has_handler())
            .finish()
    }
}
