//! Utility modules for LoopKeeper

pub mod logging;

pub use logging::{init_logging, LogBuffer};
