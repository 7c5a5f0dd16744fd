//! Compaction trigger: whether, and how urgently, a history needs shrinking.
//!
//! Two views over the same budget:
//! - [`CompactionTrigger::should_compact`]: boolean, fires on token-usage
//!   fraction *or* message count, for the per-turn "compact now?" check.
//! - [`CompactionTrigger::check_level`]: graded [`TriggerLevel`] against an
//!   absolute token budget, for status display and escalation.

use super::tokens::estimate_total_context_tokens;
use crate::config::CompactionConfig;
use crate::session::Message;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// How close a context is to its budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerLevel {
    /// Comfortably under the warning ratio.
    None,
    /// At or above the warning ratio.
    Warning,
    /// At or above the critical ratio.
    Critical,
}

impl std::fmt::Display for TriggerLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TriggerLevel::None => write!(f, "none"),
            TriggerLevel::Warning => write!(f, "warning"),
            TriggerLevel::Critical => write!(f, "critical"),
        }
    }
}

/// Decides when compaction should run.
#[derive(Debug, Clone)]
pub struct CompactionTrigger {
    token_threshold: f64,
    message_threshold: usize,
    max_tokens: usize,
    warning_ratio: f64,
    critical_ratio: f64,
}

impl Default for CompactionTrigger {
    fn default() -> Self {
        Self::from_config(&CompactionConfig::default())
    }
}

impl CompactionTrigger {
    /// Trigger with explicit thresholds and the default severity cut points.
    pub fn new(token_threshold: f64, message_threshold: usize, max_tokens: usize) -> Self {
        Self {
            token_threshold,
            message_threshold,
            max_tokens,
            ..Self::default()
        }
    }

    /// Build from the `compaction` config section.
    pub fn from_config(config: &CompactionConfig) -> Self {
        Self {
            token_threshold: config.threshold,
            message_threshold: config.message_threshold,
            max_tokens: config.context_limit,
            warning_ratio: config.warning_ratio,
            critical_ratio: config.critical_ratio,
        }
    }

    /// Override the absolute budget used by [`check_level`](Self::check_level).
    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Override the severity cut points.
    pub fn with_levels(mut self, warning_ratio: f64, critical_ratio: f64) -> Self {
        self.warning_ratio = warning_ratio;
        self.critical_ratio = critical_ratio;
        self
    }

    pub fn token_threshold(&self) -> f64 {
        self.token_threshold
    }

    pub fn message_threshold(&self) -> usize {
        self.message_threshold
    }

    /// Absolute token budget of the level check.
    pub fn max_tokens(&self) -> usize {
        self.max_tokens
    }

    /// Fraction of `max_context_tokens` used by history plus system prompt.
    ///
    /// Raw ratio: exceeds `1.0` once the context is over budget. `0.0` for a
    /// zero budget.
    pub fn calculate_token_usage(
        &self,
        history: &[Message],
        system_prompt: &str,
        max_context_tokens: usize,
    ) -> f64 {
        if max_context_tokens == 0 {
            return 0.0;
        }
        estimate_total_context_tokens(history, system_prompt) as f64 / max_context_tokens as f64
    }

    /// Whether the history should be compacted now.
    ///
    /// Always `false` for an empty history.
    pub fn should_compact(
        &self,
        history: &[Message],
        system_prompt: &str,
        max_context_tokens: usize,
    ) -> bool {
        if history.is_empty() {
            return false;
        }
        let usage = self.calculate_token_usage(history, system_prompt, max_context_tokens);
        let by_tokens = usage >= self.token_threshold;
        let by_count = history.len() >= self.message_threshold;
        debug!(
            usage,
            messages = history.len(),
            by_tokens,
            by_count,
            "Compaction check"
        );
        by_tokens || by_count
    }

    /// Classify `current_tokens` against the absolute budget.
    ///
    /// Boundaries are inclusive: exactly 75% of the budget is already a warning.
    pub fn check_level(&self, current_tokens: usize) -> TriggerLevel {
        if self.max_tokens == 0 {
            return TriggerLevel::None;
        }
        let ratio = current_tokens as f64 / self.max_tokens as f64;
        if ratio >= self.critical_ratio {
            TriggerLevel::Critical
        } else if ratio >= self.warning_ratio {
            TriggerLevel::Warning
        } else {
            TriggerLevel::None
        }
    }

    /// [`check_level`](Self::check_level) over an estimated history plus system prompt.
    pub fn check_history_level(&self, history: &[Message], system_prompt: &str) -> TriggerLevel {
        self.check_level(estimate_total_context_tokens(history, system_prompt))
    }
}
