//! Config command handlers.

use anyhow::{Context, Result};

use loopkeeper::config::validate::validate_config;
use loopkeeper::config::Config;

use super::common::load_config;
use super::ConfigAction;

/// Validate or print configuration.
pub(crate) fn cmd_config(action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Check => {
            let config_path = Config::path();
            println!("Config file: {}", config_path.display());

            if !config_path.exists() {
                println!("[OK] No config file found (using defaults)");
                return Ok(());
            }

            let content =
                std::fs::read_to_string(&config_path).context("Failed to read config file")?;

            let config: Config = match serde_json::from_str(&content) {
                Ok(c) => c,
                Err(e) => {
                    println!("[ERROR] Invalid config: {}", e);
                    return Ok(());
                }
            };

            let problems = validate_config(&config);
            for problem in &problems {
                println!("[ERROR] {}", problem);
            }

            if problems.is_empty() {
                println!("\nConfiguration looks good!");
            } else {
                println!("\nFound {} error(s)", problems.len());
            }
        }
        ConfigAction::Show => {
            println!("{}", serde_json::to_string_pretty(&load_config())?);
        }
    }
    Ok(())
}
