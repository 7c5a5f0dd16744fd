//! Doom-loop detection: the agent repeating itself without progress.
//!
//! The conversation is read as exchanges, a user turn and the assistant turn
//! that answers it (including any tool calls the assistant makes on the way).
//! When the last `window` exchanges are all near-duplicates of each other, on
//! both the user side and the assistant side, the loop is stuck.
//!
//! Two independent knobs gate evaluation:
//! - `min_history_len`: messages required before anything is checked,
//! - `window`: exchanges compared.
//!
//! `min_history_len` is checked first. A history shorter than
//! `2 * window` can never hold `window` exchanges, so the effective minimum
//! is the larger of the two.

use crate::config::DoomLoopConfig;
use crate::session::{Message, Role};
use std::collections::HashSet;
use tracing::debug;

/// Detects repeated near-identical exchanges.
#[derive(Debug, Clone)]
pub struct DoomLoopDetector {
    enabled: bool,
    similarity_threshold: f64,
    min_history_len: usize,
    window: usize,
}

impl Default for DoomLoopDetector {
    fn default() -> Self {
        Self::from_config(&DoomLoopConfig::default())
    }
}

/// One user turn and everything the assistant said or called in reply.
#[derive(Debug, Clone, PartialEq)]
struct Exchange {
    user: String,
    assistant: String,
}

/// Text of an assistant message as seen by the detector: content plus tool calls.
fn turn_text(message: &Message) -> String {
    let mut text = message.content.clone();
    for call in message.tool_calls.iter().flatten() {
        text.push(' ');
        text.push_str(&call.name);
        text.push(' ');
        text.push_str(&call.arguments);
    }
    text
}

fn exchanges(messages: &[Message]) -> Vec<Exchange> {
    let mut out = Vec::new();
    let mut current: Option<Exchange> = None;

    for message in messages {
        match message.role {
            Role::User => {
                if let Some(done) = current.take().filter(|e| !e.assistant.is_empty()) {
                    out.push(done);
                }
                current = Some(Exchange {
                    user: message.content.clone(),
                    assistant: String::new(),
                });
            }
            Role::Assistant => {
                if let Some(exchange) = current.as_mut() {
                    if !exchange.assistant.is_empty() {
                        exchange.assistant.push(' ');
                    }
                    exchange.assistant.push_str(&turn_text(message));
                }
            }
            Role::System | Role::Tool => {}
        }
    }
    if let Some(done) = current.filter(|e| !e.assistant.is_empty()) {
        out.push(done);
    }
    out
}

impl DoomLoopDetector {
    /// Detector with explicit knobs. A `window` below 2 is raised to 2, since
    /// repetition needs at least two exchanges.
    pub fn new(similarity_threshold: f64, min_history_len: usize, window: usize) -> Self {
        Self {
            enabled: true,
            similarity_threshold,
            min_history_len,
            window: window.max(2),
        }
    }

    /// Build from the `doom_loop` config section.
    pub fn from_config(config: &DoomLoopConfig) -> Self {
        Self {
            enabled: config.enabled,
            ..Self::new(
                config.similarity_threshold,
                config.min_history_len,
                config.window,
            )
        }
    }

    pub fn similarity_threshold(&self) -> f64 {
        self.similarity_threshold
    }

    pub fn min_history_len(&self) -> usize {
        self.min_history_len
    }

    pub fn window(&self) -> usize {
        self.window
    }

    /// Smallest history length that can ever be reported as a loop.
    pub fn effective_min_len(&self) -> usize {
        self.min_history_len.max(2 * self.window)
    }

    /// Jaccard index of the lower-cased whitespace token sets of `a` and `b`.
    ///
    /// `0.0` when either side has no tokens.
    ///
    /// # Examples
    /// ```
    /// use loopkeeper::safety::DoomLoopDetector;
    ///
    /// assert_eq!(DoomLoopDetector::calculate_similarity("run the tests", "Run the TESTS"), 1.0);
    /// assert_eq!(DoomLoopDetector::calculate_similarity("Hello", "Goodbye"), 0.0);
    /// assert_eq!(DoomLoopDetector::calculate_similarity("a b", "b c"), 1.0 / 3.0);
    /// ```
    pub fn calculate_similarity(a: &str, b: &str) -> f64 {
        let lower_a = a.to_lowercase();
        let lower_b = b.to_lowercase();
        let set_a: HashSet<&str> = lower_a.split_whitespace().collect();
        let set_b: HashSet<&str> = lower_b.split_whitespace().collect();
        if set_a.is_empty() || set_b.is_empty() {
            return 0.0;
        }
        let intersection = set_a.intersection(&set_b).count();
        let union = set_a.union(&set_b).count();
        intersection as f64 / union as f64
    }

    fn similar(&self, a: &Exchange, b: &Exchange) -> bool {
        Self::calculate_similarity(&a.user, &b.user) >= self.similarity_threshold
            && Self::calculate_similarity(&a.assistant, &b.assistant) >= self.similarity_threshold
    }

    /// Whether the most recent exchanges are stuck repeating.
    pub fn is_doom_loop(&self, messages: &[Message]) -> bool {
        if !self.enabled || messages.is_empty() || messages.len() < self.min_history_len {
            return false;
        }

        let all = exchanges(messages);
        if all.len() < self.window {
            return false;
        }

        let recent = &all[all.len() - self.window..];
        let looping = recent
            .iter()
            .enumerate()
            .all(|(i, a)| recent[i + 1..].iter().all(|b| self.similar(a, b)));

        debug!(
            exchanges = all.len(),
            window = self.window,
            looping,
            "Doom loop check"
        );
        looping
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::ToolCall;

    fn repeated(n: usize) -> Vec<Message> {
        (0..n)
            .flat_map(|_| {
                [
                    Message::user("the build is still failing"),
                    Message::assistant("let me run cargo build again"),
                ]
            })
            .collect()
    }

    #[test]
    fn test_similarity_identical_and_disjoint() {
        assert_eq!(DoomLoopDetector::calculate_similarity("same words here", "same words here"), 1.0);
        assert_eq!(DoomLoopDetector::calculate_similarity("Hello", "Goodbye"), 0.0);
    }

    #[test]
    fn test_similarity_partial_overlap() {
        let s = DoomLoopDetector::calculate_similarity("fix the parser bug", "fix the lexer bug");
        assert!(s > 0.0 && s < 1.0);
        assert_eq!(s, 3.0 / 5.0);
    }

    #[test]
    fn test_similarity_empty_side() {
        assert_eq!(DoomLoopDetector::calculate_similarity("", ""), 0.0);
        assert_eq!(DoomLoopDetector::calculate_similarity("word", "   "), 0.0);
    }

    #[test]
    fn test_similarity_ignores_case_and_repeats() {
        assert_eq!(DoomLoopDetector::calculate_similarity("Retry RETRY retry", "retry"), 1.0);
    }

    #[test]
    fn test_empty_and_short_histories() {
        let detector = DoomLoopDetector::default();
        assert!(!detector.is_doom_loop(&[]));
        assert!(!detector.is_doom_loop(&repeated(2)));
    }

    #[test]
    fn test_detects_repetition() {
        assert!(DoomLoopDetector::default().is_doom_loop(&repeated(3)));
    }

    #[test]
    fn test_progress_is_not_a_loop() {
        let history: Vec<Message> = (0..4)
            .flat_map(|i| {
                [
                    Message::user(&format!("now do step {} of the plan", i)),
                    Message::assistant(&format!("finished item {}", i * 7)),
                ]
            })
            .collect();
        assert!(!DoomLoopDetector::default().is_doom_loop(&history));
    }

    #[test]
    fn test_user_repeats_but_assistant_varies() {
        let history: Vec<Message> = [
            "reading the config file",
            "the tests pass now",
            "opened a pull request",
        ]
        .into_iter()
        .flat_map(|reply| [Message::user("continue"), Message::assistant(reply)])
        .collect();
        assert!(!DoomLoopDetector::default().is_doom_loop(&history));
    }

    #[test]
    fn test_only_recent_window_counts() {
        let mut history = vec![
            Message::user("something unrelated"),
            Message::assistant("an unrelated answer"),
        ];
        history.extend(repeated(3));
        assert!(DoomLoopDetector::default().is_doom_loop(&history));
    }

    #[test]
    fn test_min_history_len_dominates() {
        let detector = DoomLoopDetector::new(0.8, 10, 3);
        assert!(!detector.is_doom_loop(&repeated(4))); // 8 messages
        assert!(detector.is_doom_loop(&repeated(5)));
        assert_eq!(detector.effective_min_len(), 10);
        assert_eq!(DoomLoopDetector::new(0.8, 2, 3).effective_min_len(), 6);
    }

    #[test]
    fn test_window_is_independent() {
        let detector = DoomLoopDetector::new(0.8, 0, 2);
        let mut history = vec![Message::user("first task"), Message::assistant("done with it")];
        history.extend(repeated(2));
        assert!(detector.is_doom_loop(&history));
        assert!(!DoomLoopDetector::new(0.8, 0, 4).is_doom_loop(&history));
    }

    #[test]
    fn test_repeated_tool_calls_count_as_assistant_turn() {
        let turn = || {
            [
                Message::user("check the file"),
                Message::assistant_with_tools("", vec![ToolCall::new("c", "read_file", r#"{"path":"src/main.rs"}"#)]),
                Message::tool_result("c", "fn main() {}"),
            ]
        };
        let history: Vec<Message> = (0..3).flat_map(|_| turn()).collect();
        assert!(DoomLoopDetector::default().is_doom_loop(&history));
    }

    #[test]
    fn test_unanswered_user_turn_is_not_an_exchange() {
        let mut history = repeated(2);
        history.push(Message::user("the build is still failing"));
        history.push(Message::user("hello?"));
        assert!(!DoomLoopDetector::new(0.8, 0, 3).is_doom_loop(&history));
    }

    #[test]
    fn test_disabled_never_fires() {
        let detector = DoomLoopDetector::from_config(&DoomLoopConfig {
            enabled: false,
            ..Default::default()
        });
        assert!(!detector.is_doom_loop(&repeated(10)));
    }

    #[test]
    fn test_window_below_two_is_raised() {
        assert_eq!(DoomLoopDetector::new(0.8, 0, 0).window(), 2);
    }
}
