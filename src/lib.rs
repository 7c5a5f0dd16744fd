//! LoopKeeper - keeps a long-running agent loop safe and inside its context budget
//!
//! - [`state`] / [`bus`]: reactive agent status broadcast to observers
//! - [`agent`]: token accounting, compaction trigger, pruning, summaries
//! - [`safety`]: doom-loop detection behind a permission gate
//!
//! The chat client and session store are external collaborators consumed
//! through [`providers::ChatClient`] and [`session::SessionStore`].

pub mod agent;
pub mod bus;
pub mod config;
pub mod error;
pub mod providers;
pub mod safety;
pub mod session;
pub mod state;
pub mod utils;

pub use agent::{CompactionResult, CompactionTrigger, SessionCompactor, TriggerLevel};
pub use bus::{Event, EventBus, EventType};
pub use config::Config;
pub use error::{LoopKeeperError, Result};
pub use safety::{DoomLoopAgent, DoomLoopDetector, PermissionManager, PermissionPromptHandler};
pub use session::{Message, Role, ToolCall};
pub use state::{AgentState, ReactiveState, StateRegistry};
