//! Shared CLI helpers used across multiple command handlers.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::warn;

use loopkeeper::config::Config;
use loopkeeper::session::Message;

/// Expand `~/` prefix to the user's home directory.
pub(crate) fn expand_tilde(path: &Path) -> PathBuf {
    if let Ok(stripped) = path.strip_prefix("~") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    path.to_path_buf()
}

/// Load config, falling back to defaults (with a warning) when it is invalid.
pub(crate) fn load_config() -> Config {
    Config::load().unwrap_or_else(|e| {
        warn!(error = %e, "Config could not be loaded, using defaults");
        Config::default()
    })
}

/// Read a history file: a JSON array of messages.
pub(crate) fn load_history(path: &Path) -> Result<Vec<Message>> {
    let path = expand_tilde(path);
    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    parse_history(&content).with_context(|| format!("{} is not a JSON message array", path.display()))
}

pub(crate) fn parse_history(content: &str) -> Result<Vec<Message>> {
    Ok(serde_json::from_str(content)?)
}
