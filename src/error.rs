//! Error types for LoopKeeper
//!
//! Most of the core never fails: degenerate input (empty histories, zero
//! budgets) yields defined sentinel results and permission denial is a plain
//! `bool`. Errors only surface where an external collaborator is involved
//! (session store, chat client, config file) or where a caller misuses the
//! type-erased state registry. Uses `thiserror` for the `Display` and `Error`
//! implementations.

use thiserror::Error;

/// The primary error type for LoopKeeper operations.
#[derive(Error, Debug)]
pub enum LoopKeeperError {
    /// Configuration-related errors (invalid values, unreadable file, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Session store failures (write rejected, session missing, etc.)
    #[error("Session error: {0}")]
    Session(String),

    /// Chat client failures during LLM-assisted summarisation
    #[error("Provider error: {0}")]
    Provider(String),

    /// A registry key already holds a state of a different value type
    #[error("State '{key}' is registered with a different value type")]
    StateTypeMismatch { key: String },

    /// Standard I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// A specialized `Result` type for LoopKeeper operations.
pub type Result<T> = std::result::Result<T, LoopKeeperError>;
