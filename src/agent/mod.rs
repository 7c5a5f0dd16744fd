//! Agent module - context budget management for the agent loop
//!
//! Everything the loop needs to keep a conversation inside the model's
//! context window:
//!
//! - [`tokens`]: stateless token estimates for text, messages and histories
//! - [`trigger`]: when to compact, and how urgent it is
//! - [`pruner`]: oldest-first removal down to a token target
//! - [`summary`]: local digests of removed turns and the LLM summary prompt
//! - [`compaction`]: the per-session orchestrator tying them together
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐     ┌───────────────────┐     ┌──────────────────┐
//! │  Agent loop │────>│ SessionCompactor  │────>│ CompactionTrigger│
//! └─────────────┘     └───────────────────┘     └──────────────────┘
//!                        │       │      │
//!                        ▼       ▼      ▼
//!              ┌────────────┐ ┌───────┐ ┌──────────────┐
//!              │HistoryPrun.│ │Summary│ │ SessionStore │
//!              └────────────┘ └───────┘ └──────────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use loopkeeper::agent::{CompactionTrigger, SessionCompactor};
//! use loopkeeper::config::CompactionConfig;
//! use loopkeeper::session::Message;
//!
//! let history: Vec<Message> = (0..12)
//!     .flat_map(|i| {
//!         [
//!             Message::user(&format!("question {}", i)),
//!             Message::assistant(&format!("answer {}", i)),
//!         ]
//!     })
//!     .collect();
//!
//! let trigger = CompactionTrigger::default();
//! assert!(trigger.should_compact(&history, "", 100_000)); // 24 messages
//!
//! let compactor = SessionCompactor::new(CompactionConfig::default());
//! let result = compactor.maybe_compact("cli:demo", &history, "").unwrap();
//! assert!(result.performed);
//! ```

pub mod compaction;
pub mod pruner;
pub mod summary;
pub mod tokens;
pub mod trigger;

pub use compaction::{CompactionResult, SessionCompactor};
pub use pruner::{HistoryPruner, PruneResult};
pub use summary::{build_summary_prompt, SummaryGenerator};
pub use trigger::{CompactionTrigger, TriggerLevel};
