//! Read-only diagnostics: token estimates and budget checks.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;

use loopkeeper::agent::tokens::{
    calculate_token_usage_percentage, estimate_conversation_tokens, estimate_history_tokens,
    estimate_message_tokens, estimate_text_tokens, estimate_total_context_tokens,
};
use loopkeeper::agent::{CompactionTrigger, TriggerLevel};
use loopkeeper::safety::DoomLoopDetector;
use loopkeeper::session::Message;

use super::common::{expand_tilde, load_config, load_history, parse_history};
use super::OutputFormat;

#[derive(Debug, Serialize)]
struct TokenReport {
    /// "history" or "text"
    kind: &'static str,
    tokens: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    messages: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    conversation_tokens: Option<usize>,
}

fn token_report(content: &str) -> TokenReport {
    match parse_history(content) {
        Ok(history) => TokenReport {
            kind: "history",
            tokens: estimate_history_tokens(&history),
            messages: Some(history.len()),
            conversation_tokens: Some(estimate_conversation_tokens(&history)),
        },
        Err(_) => TokenReport {
            kind: "text",
            tokens: estimate_text_tokens(content),
            messages: None,
            conversation_tokens: None,
        },
    }
}

/// Estimate tokens of a file; JSON histories are counted per message.
pub(crate) fn cmd_tokens(file: &Path, format: OutputFormat) -> Result<()> {
    let path = expand_tilde(file);
    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let report = token_report(&content);

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Text => {
            println!("File: {}", path.display());
            match (report.messages, report.conversation_tokens) {
                (Some(messages), Some(conversation)) => {
                    println!("Messages:            {}", messages);
                    println!("Content tokens:      {}", report.tokens);
                    println!("With role overhead:  {}", conversation);
                    if let Ok(history) = parse_history(&content) {
                        println!();
                        for (i, message) in history.iter().enumerate() {
                            println!(
                                "  {:>4}  {:<9} {:>6}",
                                i,
                                message.role.to_string(),
                                estimate_message_tokens(message)
                            );
                        }
                    }
                }
                _ => println!("Tokens: {}", report.tokens),
            }
        }
    }
    Ok(())
}

#[derive(Debug, Serialize)]
struct CheckReport {
    messages: usize,
    tokens: usize,
    max_tokens: usize,
    usage_percent: f64,
    level: TriggerLevel,
    should_compact: bool,
    doom_loop: bool,
}

fn check_report(
    history: &[Message],
    system_prompt: &str,
    trigger: &CompactionTrigger,
    detector: &DoomLoopDetector,
) -> CheckReport {
    let tokens = estimate_total_context_tokens(history, system_prompt);
    let max_tokens = trigger.max_tokens();
    CheckReport {
        messages: history.len(),
        tokens,
        max_tokens,
        usage_percent: calculate_token_usage_percentage(tokens, max_tokens),
        level: trigger.check_level(tokens),
        should_compact: trigger.should_compact(history, system_prompt, max_tokens),
        doom_loop: detector.is_doom_loop(history),
    }
}

/// Budget usage, trigger level and doom-loop verdict for a history.
pub(crate) fn cmd_check(
    history_path: &Path,
    system_prompt: &str,
    max_tokens: Option<usize>,
    format: OutputFormat,
) -> Result<()> {
    let config = load_config();
    let history = load_history(history_path)?;

    let trigger = CompactionTrigger::from_config(&config.compaction)
        .with_max_tokens(max_tokens.unwrap_or(config.compaction.context_limit));
    let detector = DoomLoopDetector::from_config(&config.doom_loop);
    let report = check_report(&history, system_prompt, &trigger, &detector);

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Text => {
            println!("Messages:        {}", report.messages);
            println!(
                "Tokens:          {} / {} ({:.1}%)",
                report.tokens, report.max_tokens, report.usage_percent
            );
            println!("Level:           {}", report.level);
            println!(
                "Should compact:  {}",
                if report.should_compact { "yes" } else { "no" }
            );
            println!(
                "Doom loop:       {}",
                if report.doom_loop { "DETECTED" } else { "no" }
            );
        }
    }
    Ok(())
}
