//! Configuration validation.
//!
//! Serde fills in defaults for anything missing, so the only failures left to
//! catch are values that parse but make no sense (ratios outside `0..=1`,
//! a warning level above the critical level, a zero-length detection window).

use super::Config;

fn check_ratio(problems: &mut Vec<String>, path: &str, value: f64) {
    if !(0.0..=1.0).contains(&value) || value.is_nan() {
        problems.push(format!("{}: must be between 0.0 and 1.0 (got {})", path, value));
    }
}

/// Validate a parsed config, returning one message per problem found.
///
/// An empty vector means the config is usable.
pub fn validate_config(config: &Config) -> Vec<String> {
    let mut problems = Vec::new();
    let compaction = &config.compaction;

    check_ratio(&mut problems, "compaction.threshold", compaction.threshold);
    check_ratio(&mut problems, "compaction.warning_ratio", compaction.warning_ratio);
    check_ratio(&mut problems, "compaction.critical_ratio", compaction.critical_ratio);
    check_ratio(&mut problems, "compaction.target_fraction", compaction.target_fraction);

    if compaction.warning_ratio > compaction.critical_ratio {
        problems.push(format!(
            "compaction.warning_ratio: {} exceeds critical_ratio {}",
            compaction.warning_ratio, compaction.critical_ratio
        ));
    }
    if compaction.summary_max_chars == 0 {
        problems.push("compaction.summary_max_chars: must be greater than zero".to_string());
    }

    let doom = &config.doom_loop;
    check_ratio(
        &mut problems,
        "doom_loop.similarity_threshold",
        doom.similarity_threshold,
    );
    if doom.window < 2 {
        problems.push(format!(
            "doom_loop.window: at least 2 exchanges are needed to compare (got {})",
            doom.window
        ));
    }

    if config.agent.max_iterations == 0 {
        problems.push("agent.max_iterations: must be greater than zero".to_string());
    }

    problems
}
