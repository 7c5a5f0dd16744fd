//! Configuration type definitions for LoopKeeper
//!
//! This module defines all configuration structs used throughout the crate.
//! All types implement serde traits for JSON serialization and have sensible defaults.

use serde::{Deserialize, Serialize};

/// Main configuration struct for LoopKeeper
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Agent loop limits
    pub agent: AgentConfig,
    /// Context compaction configuration
    pub compaction: CompactionConfig,
    /// Doom-loop detection configuration
    pub doom_loop: DoomLoopConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

// ============================================================================
// Agent Configuration
// ============================================================================

/// Agent loop configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Model used for the agent loop (and LLM-assisted summaries when unset there).
    pub model: String,
    /// Maximum number of loop iterations per run.
    pub max_iterations: u32,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            model: "claude-sonnet-4-5-20250929".to_string(),
            max_iterations: 20,
        }
    }
}

// ============================================================================
// Compaction Configuration
// ============================================================================

/// Context compaction configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompactionConfig {
    /// Whether automatic context compaction is enabled.
    pub enabled: bool,
    /// Maximum context window size in tokens.
    pub context_limit: usize,
    /// Fraction (0.0-1.0) of context_limit that triggers compaction.
    pub threshold: f64,
    /// Message count that triggers compaction regardless of token usage.
    pub message_threshold: usize,
    /// Fraction of context_limit classified as `TriggerLevel::Warning`.
    pub warning_ratio: f64,
    /// Fraction of context_limit classified as `TriggerLevel::Critical`.
    pub critical_ratio: f64,
    /// Fraction of context_limit that pruning aims for once triggered.
    pub target_fraction: f64,
    /// Upper bound on the length of a locally generated summary, in characters.
    pub summary_max_chars: usize,
    /// Model for LLM-assisted summaries. Falls back to `agent.model` when unset.
    pub summary_model: Option<String>,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            context_limit: 100_000,
            threshold: 0.80,
            message_threshold: 20,
            warning_ratio: 0.75,
            critical_ratio: 0.90,
            target_fraction: 0.60,
            summary_max_chars: 1200,
            summary_model: None,
        }
    }
}

// ============================================================================
// Doom Loop Configuration
// ============================================================================

/// Doom-loop detection configuration.
///
/// `min_history_len` and `window` are independent: the history must hold at
/// least `min_history_len` messages before anything is evaluated, and then at
/// least `window` complete user/assistant exchanges.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DoomLoopConfig {
    /// Whether doom-loop detection is enabled.
    pub enabled: bool,
    /// Jaccard similarity at or above which two turns count as repeats.
    pub similarity_threshold: f64,
    /// Minimum number of messages before detection runs.
    pub min_history_len: usize,
    /// Number of consecutive similar exchanges that constitutes a loop.
    pub window: usize,
}

impl Default for DoomLoopConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            similarity_threshold: 0.8,
            min_history_len: 6,
            window: 3,
        }
    }
}

// ============================================================================
// Logging Configuration
// ============================================================================

/// Output format of the tracing subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Multi-line human readable output.
    Pretty,
    /// Compact single-line output, tagged by `component`.
    #[default]
    Component,
    /// JSON lines for log aggregators.
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Output format.
    pub format: LogFormat,
    /// Default level filter when `RUST_LOG` is unset.
    pub level: String,
    /// Optional file to append logs to (JSON format only).
    pub file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::default(),
            level: "info".to_string(),
            file: None,
        }
    }
}
