//! Session module - conversation types and the message store seam
//!
//! The store is an external collaborator: the compactor only needs to append
//! a summary message and mark the session active. `InMemorySessionStore` is
//! the reference implementation used by the CLI and the tests; a persistent
//! backend lives outside this crate and implements [`SessionStore`].
//!
//! # Example
//!
//! ```
//! use loopkeeper::session::{InMemorySessionStore, Message, SessionStore};
//!
//! let store = InMemorySessionStore::new();
//! store.save_message("cli:1", &Message::user("Hello!")).unwrap();
//! assert_eq!(store.get_messages("cli:1").unwrap().len(), 1);
//! ```

pub mod types;

pub use types::{Message, Role, Session, ToolCall};

use crate::error::{LoopKeeperError, Result};
use std::collections::HashMap;
use std::sync::RwLock;

/// Message/session persistence consumed by the compactor.
///
/// Implementations must be safe to call from several threads at once.
#[cfg_attr(test, mockall::automock)]
pub trait SessionStore: Send + Sync {
    /// Append a message to the session, creating the session if needed.
    fn save_message(&self, session_id: &str, message: &Message) -> Result<()>;

    /// Full history of a session, oldest first. Unknown sessions yield an empty history.
    fn get_messages(&self, session_id: &str) -> Result<Vec<Message>>;

    /// Mark the session as active now.
    fn touch_session(&self, session_id: &str) -> Result<()>;
}

/// Process-local session store backed by a `HashMap`.
///
/// # Thread Safety
///
/// The map sits behind a `std::sync::RwLock`; every method takes `&self`
/// and may be shared via `Arc` across threads.
#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<String, Session>>,
}

impl InMemorySessionStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of a session, if it exists.
    pub fn session(&self, session_id: &str) -> Option<Session> {
        self.sessions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(session_id)
            .cloned()
    }

    /// Number of sessions held.
    pub fn len(&self) -> usize {
        self.sessions.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Whether the store holds no sessions.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SessionStore for InMemorySessionStore {
    fn save_message(&self, session_id: &str, message: &Message) -> Result<()> {
        let mut sessions = self.sessions.write().unwrap_or_else(|e| e.into_inner());
        sessions
            .entry(session_id.to_string())
            .or_insert_with(|| Session::new(session_id))
            .add_message(message.clone());
        Ok(())
    }

    fn get_messages(&self, session_id: &str) -> Result<Vec<Message>> {
        Ok(self
            .session(session_id)
            .map(|s| s.messages)
            .unwrap_or_default())
    }

    fn touch_session(&self, session_id: &str) -> Result<()> {
        let mut sessions = self.sessions.write().unwrap_or_else(|e| e.into_inner());
        match sessions.get_mut(session_id) {
            Some(session) => {
                session.touch();
                Ok(())
            }
            None => Err(LoopKeeperError::Session(format!(
                "cannot touch unknown session '{}'",
                session_id
            ))),
        }
    }
}
