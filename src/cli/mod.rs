//! CLI module: command parsing and dispatch
//!
//! All CLI logic lives here. `main.rs` calls `cli::run()`.

pub mod common;
pub mod compact;
pub mod config;
pub mod inspect;

use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "loopkeeper")]
#[command(version)]
#[command(about = "Context budget and loop-safety diagnostics for agent histories", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Estimate tokens of a text file or JSON history
    Tokens {
        /// Text file, or JSON array of messages
        file: PathBuf,
        /// Output format
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
    /// Report budget usage, trigger level and doom-loop verdict for a history
    Check {
        /// JSON array of messages
        history: PathBuf,
        /// System prompt text counted against the budget
        #[arg(long, default_value = "")]
        system_prompt: String,
        /// Context budget in tokens (defaults to compaction.context_limit)
        #[arg(long)]
        max_tokens: Option<usize>,
        /// Output format
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
    /// Compact a history and print the result as JSON
    Compact {
        /// JSON array of messages
        history: PathBuf,
        /// System prompt text counted against the budget
        #[arg(long, default_value = "")]
        system_prompt: String,
        /// Context budget in tokens (defaults to compaction.context_limit)
        #[arg(long)]
        max_tokens: Option<usize>,
        /// Only compact when the configured trigger fires
        #[arg(long)]
        if_needed: bool,
        /// Session id used with --if-needed (random when omitted)
        #[arg(long)]
        session: Option<String>,
    },
    /// Inspect configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Validate the config file
    Check,
    /// Print the effective config (file + environment) as JSON
    Show,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

/// Entry point for the CLI, called from main().
pub async fn run() -> Result<()> {
    // Respect the configured logging settings when the config loads; fall
    // back to defaults so a broken config can still be diagnosed.
    let logging_cfg = loopkeeper::config::Config::load()
        .map(|c| c.logging)
        .unwrap_or_default();
    loopkeeper::utils::init_logging(&logging_cfg)?;

    let cli = Cli::parse();

    match cli.command {
        None => {
            let mut cmd = Cli::command();
            cmd.print_help()?;
            println!();
        }
        Some(Commands::Tokens { file, format }) => {
            inspect::cmd_tokens(&file, format)?;
        }
        Some(Commands::Check {
            history,
            system_prompt,
            max_tokens,
            format,
        }) => {
            inspect::cmd_check(&history, &system_prompt, max_tokens, format)?;
        }
        Some(Commands::Compact {
            history,
            system_prompt,
            max_tokens,
            if_needed,
            session,
        }) => {
            compact::cmd_compact(&history, &system_prompt, max_tokens, if_needed, session).await?;
        }
        Some(Commands::Config { action }) => {
            config::cmd_config(action)?;
        }
    }

    Ok(())
}
