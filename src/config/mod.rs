//! Configuration management for LoopKeeper
//!
//! This module provides configuration loading and validation.
//! Configuration is loaded from `~/.loopkeeper/config.json` with environment variable overrides.

mod types;
pub mod validate;

pub use types::*;

use crate::error::{LoopKeeperError, Result};
use std::path::{Path, PathBuf};

impl Config {
    /// Returns the LoopKeeper configuration directory path (~/.loopkeeper)
    pub fn dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".loopkeeper")
    }

    /// Returns the path to the config file (~/.loopkeeper/config.json)
    pub fn path() -> PathBuf {
        Self::dir().join("config.json")
    }

    /// Load configuration from the default path with environment overrides.
    ///
    /// If the config file doesn't exist, returns default configuration.
    /// Environment variables can override config values using the pattern:
    /// `LOOPKEEPER_SECTION_KEY`
    pub fn load() -> Result<Self> {
        Self::load_from_path(&Self::path())
    }

    /// Load configuration from a specific path with environment overrides.
    ///
    /// The result is validated; out-of-range values are reported as
    /// `LoopKeeperError::Config` listing every problem found.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            serde_json::from_str(&content)?
        } else {
            Config::default()
        };

        config.apply_env_overrides();

        let problems = validate::validate_config(&config);
        if !problems.is_empty() {
            return Err(LoopKeeperError::Config(problems.join("; ")));
        }

        Ok(config)
    }

    /// Apply environment variable overrides to the configuration.
    ///
    /// Environment variables follow the pattern: LOOPKEEPER_SECTION_KEY
    fn apply_env_overrides(&mut self) {
        // Agent
        if let Ok(val) = std::env::var("LOOPKEEPER_AGENT_MODEL") {
            self.agent.model = val;
        }
        if let Ok(val) = std::env::var("LOOPKEEPER_AGENT_MAX_ITERATIONS") {
            if let Ok(v) = val.parse() {
                self.agent.max_iterations = v;
            }
        }

        // Compaction
        if let Ok(val) = std::env::var("LOOPKEEPER_COMPACTION_ENABLED") {
            if let Ok(v) = val.parse() {
                self.compaction.enabled = v;
            }
        }
        if let Ok(val) = std::env::var("LOOPKEEPER_COMPACTION_CONTEXT_LIMIT") {
            if let Ok(v) = val.parse() {
                self.compaction.context_limit = v;
            }
        }
        if let Ok(val) = std::env::var("LOOPKEEPER_COMPACTION_THRESHOLD") {
            if let Ok(v) = val.parse() {
                self.compaction.threshold = v;
            }
        }
        if let Ok(val) = std::env::var("LOOPKEEPER_COMPACTION_MESSAGE_THRESHOLD") {
            if let Ok(v) = val.parse() {
                self.compaction.message_threshold = v;
            }
        }
        if let Ok(val) = std::env::var("LOOPKEEPER_COMPACTION_WARNING_RATIO") {
            if let Ok(v) = val.parse() {
                self.compaction.warning_ratio = v;
            }
        }
        if let Ok(val) = std::env::var("LOOPKEEPER_COMPACTION_CRITICAL_RATIO") {
            if let Ok(v) = val.parse() {
                self.compaction.critical_ratio = v;
            }
        }
        if let Ok(val) = std::env::var("LOOPKEEPER_COMPACTION_TARGET_FRACTION") {
            if let Ok(v) = val.parse() {
                self.compaction.target_fraction = v;
            }
        }
        if let Ok(val) = std::env::var("LOOPKEEPER_COMPACTION_SUMMARY_MAX_CHARS") {
            if let Ok(v) = val.parse() {
                self.compaction.summary_max_chars = v;
            }
        }
        if let Ok(val) = std::env::var("LOOPKEEPER_COMPACTION_SUMMARY_MODEL") {
            self.compaction.summary_model = Some(val);
        }

        // Doom loop
        if let Ok(val) = std::env::var("LOOPKEEPER_DOOM_LOOP_ENABLED") {
            if let Ok(v) = val.parse() {
                self.doom_loop.enabled = v;
            }
        }
        if let Ok(val) = std::env::var("LOOPKEEPER_DOOM_LOOP_SIMILARITY_THRESHOLD") {
            if let Ok(v) = val.parse() {
                self.doom_loop.similarity_threshold = v;
            }
        }
        if let Ok(val) = std::env::var("LOOPKEEPER_DOOM_LOOP_MIN_HISTORY_LEN") {
            if let Ok(v) = val.parse() {
                self.doom_loop.min_history_len = v;
            }
        }
        if let Ok(val) = std::env::var("LOOPKEEPER_DOOM_LOOP_WINDOW") {
            if let Ok(v) = val.parse() {
                self.doom_loop.window = v;
            }
        }

        // Logging
        if let Ok(val) = std::env::var("LOOPKEEPER_LOGGING_LEVEL") {
            self.logging.level = val;
        }
        if let Ok(val) = std::env::var("LOOPKEEPER_LOGGING_FILE") {
            self.logging.file = Some(val);
        }
    }

    /// Model used for LLM-assisted summaries.
    pub fn summary_model(&self) -> &str {
        self.compaction
            .summary_model
            .as_deref()
            .unwrap_or(&self.agent.model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.compaction.enabled);
        assert_eq!(config.compaction.context_limit, 100_000);
        assert!((config.compaction.threshold - 0.8).abs() < f64::EPSILON);
        assert_eq!(config.compaction.message_threshold, 20);
        assert_eq!(config.doom_loop.window, 3);
        assert_eq!(config.agent.max_iterations, 20);
    }

    #[test]
    fn test_load_missing_file_returns_default() {
        let dir = tempdir().unwrap();
        let config = Config::load_from_path(&dir.path().join("missing.json")).unwrap();
        assert_eq!(config.compaction.context_limit, 100_000);
    }

    #[test]
    fn test_load_partial_file_fills_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            r#"{{"compaction": {{"context_limit": 8000}}, "doom_loop": {{"window": 4}}}}"#
        )
        .unwrap();

        let config = Config::load_from_path(&path).unwrap();
        assert_eq!(config.compaction.context_limit, 8000);
        assert_eq!(config.compaction.message_threshold, 20);
        assert_eq!(config.doom_loop.window, 4);
        assert!((config.doom_loop.similarity_threshold - 0.8).abs() < f64::EPSILON);
    }

    #[test]
    fn test_load_rejects_invalid_values() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"compaction": {"threshold": 1.5}}"#).unwrap();

        let err = Config::load_from_path(&path).unwrap_err();
        assert!(matches!(err, LoopKeeperError::Config(_)));
        assert!(err.to_string().contains("compaction.threshold"));
    }

    #[test]
    fn test_load_rejects_malformed_json() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ nope").unwrap();

        let err = Config::load_from_path(&path).unwrap_err();
        assert!(matches!(err, LoopKeeperError::Json(_)));
    }

    #[test]
    fn test_env_override() {
        // Keys other tests in this module never assert on.
        std::env::set_var("LOOPKEEPER_COMPACTION_WARNING_RATIO", "0.7");
        std::env::set_var("LOOPKEEPER_COMPACTION_CRITICAL_RATIO", "0.95");
        std::env::set_var("LOOPKEEPER_COMPACTION_TARGET_FRACTION", "0.5");
        std::env::set_var("LOOPKEEPER_DOOM_LOOP_MIN_HISTORY_LEN", "10");
        std::env::set_var("LOOPKEEPER_COMPACTION_SUMMARY_MAX_CHARS", "not-a-number");

        let mut config = Config::default();
        config.apply_env_overrides();

        assert!((config.compaction.warning_ratio - 0.7).abs() < f64::EPSILON);
        assert!((config.compaction.critical_ratio - 0.95).abs() < f64::EPSILON);
        assert!((config.compaction.target_fraction - 0.5).abs() < f64::EPSILON);
        assert_eq!(config.doom_loop.min_history_len, 10);
        // Unparseable values leave the default alone.
        assert_eq!(config.compaction.summary_max_chars, 1200);

        std::env::remove_var("LOOPKEEPER_COMPACTION_WARNING_RATIO");
        std::env::remove_var("LOOPKEEPER_COMPACTION_CRITICAL_RATIO");
        std::env::remove_var("LOOPKEEPER_COMPACTION_TARGET_FRACTION");
        std::env::remove_var("LOOPKEEPER_DOOM_LOOP_MIN_HISTORY_LEN");
        std::env::remove_var("LOOPKEEPER_COMPACTION_SUMMARY_MAX_CHARS");
    }

    #[test]
    fn test_summary_model_falls_back_to_agent_model() {
        let mut config = Config::default();
        assert_eq!(config.summary_model(), config.agent.model);

        config.compaction.summary_model = Some("small-model".to_string());
        assert_eq!(config.summary_model(), "small-model");
    }

    #[test]
    fn test_config_dir_ends_with_loopkeeper() {
        assert!(Config::dir().ends_with(".loopkeeper"));
        assert!(Config::path().ends_with("config.json"));
    }
}
