//! Local extractive summaries of conversation history.
//!
//! The compactor replaces pruned turns with a digest so the model keeps a
//! sketch of what happened. [`SummaryGenerator`] builds that digest without a
//! model call; [`build_summary_prompt`] renders the transcript used when a
//! chat client is asked to do it instead.

use crate::config::CompactionConfig;
use crate::session::{Message, Role};
use std::collections::HashMap;

/// Summary returned for an empty history.
pub const NO_HISTORY_SUMMARY: &str = "No conversation history available.";

/// Prefix of the system message that carries a summary into a session.
pub const SUMMARY_MESSAGE_PREFIX: &str = "[Conversation Summary]";

/// Default upper bound on summary length, in characters.
pub const DEFAULT_SUMMARY_MAX_CHARS: usize = 1200;

/// Smallest accepted `max_chars`.
const MIN_SUMMARY_CHARS: usize = 80;

const TOP_TERMS: usize = 8;
const LEADING_SENTENCE_CHARS: usize = 160;
const LONG_WORD_CHARS: usize = 7;

const STOPWORDS: &[&str] = &[
    "about", "after", "again", "also", "because", "before", "being", "between", "could", "does",
    "doing", "during", "should", "something", "their", "there", "these", "those", "through",
    "would", "which", "while", "without",
];

/// Builds bounded digests of conversation history.
#[derive(Debug, Clone)]
pub struct SummaryGenerator {
    max_chars: usize,
}

impl Default for SummaryGenerator {
    fn default() -> Self {
        Self::new(DEFAULT_SUMMARY_MAX_CHARS)
    }
}

impl SummaryGenerator {
    /// Generator whose summaries never exceed `max_chars` characters.
    /// Values below 80 are raised to 80.
    pub fn new(max_chars: usize) -> Self {
        Self {
            max_chars: max_chars.max(MIN_SUMMARY_CHARS),
        }
    }

    pub fn from_config(config: &CompactionConfig) -> Self {
        Self::new(config.summary_max_chars)
    }

    pub fn max_chars(&self) -> usize {
        self.max_chars
    }

    /// Character budget for a transcript of `transcript_chars` characters:
    /// `max_chars`, and never more than half the transcript.
    fn budget(&self, transcript_chars: usize) -> usize {
        self.max_chars.min(transcript_chars / 2)
    }

    /// Summarise `messages`.
    ///
    /// The digest lists message counts by role, the most frequent content
    /// terms, the tools called, and then the leading sentence of each turn
    /// until the budget runs out. It is at most half as long as the
    /// transcript it summarises; histories too short for the full header get
    /// only a message count.
    ///
    /// # Examples
    /// ```
    /// use loopkeeper::agent::summary::{SummaryGenerator, NO_HISTORY_SUMMARY};
    /// use loopkeeper::session::Message;
    ///
    /// let generator = SummaryGenerator::default();
    /// assert_eq!(generator.generate_summary(&[]), NO_HISTORY_SUMMARY);
    ///
    /// let summary = generator.generate_summary(&[
    ///     Message::user("Please upgrade tokio to 1.40 across the workspace and rerun the tests."),
    ///     Message::assistant("Upgraded tokio in every crate, fixed two build errors, all tests pass."),
    /// ]);
    /// assert!(summary.starts_with("Conversation summary (2 messages: 1 user, 1 assistant)."));
    /// ```
    pub fn generate_summary(&self, messages: &[Message]) -> String {
        if messages.is_empty() {
            return NO_HISTORY_SUMMARY.to_string();
        }

        let budget = self.budget(render_transcript(messages).chars().count());

        let header = format!(
            "Conversation summary ({} messages: {}).",
            messages.len(),
            role_counts(messages)
        );
        if header.chars().count() > budget {
            return truncate_chars(&format!("{} messages.", messages.len()), budget);
        }
        let mut lines = vec![header];

        let terms = top_terms(messages, TOP_TERMS);
        if !terms.is_empty() {
            lines.push(format!("Key terms: {}.", terms.join(", ")));
        }

        let tools = tool_names(messages);
        if !tools.is_empty() {
            lines.push(format!("Tools used: {}.", tools.join(", ")));
        }

        let mut summary = String::new();
        for line in lines {
            push_line(&mut summary, &line, budget);
        }

        for message in messages {
            let Some(sentence) = leading_sentence(&message.content) else {
                continue;
            };
            let line = format!("- {}: {}", message.role, sentence);
            if !push_line(&mut summary, &line, budget) {
                break;
            }
        }
        summary
    }
}

/// Append `line` (newline-separated) if it fits within `budget` characters.
/// A first line that does not fit is truncated instead.
fn push_line(summary: &mut String, line: &str, budget: usize) -> bool {
    let used = summary.chars().count();
    let sep = usize::from(!summary.is_empty());
    let needed = line.chars().count() + sep;
    if used + needed <= budget {
        if sep == 1 {
            summary.push('\n');
        }
        summary.push_str(line);
        true
    } else {
        if summary.is_empty() {
            summary.push_str(&truncate_chars(line, budget));
        }
        false
    }
}

/// Cut `text` to at most `max` characters, marking the cut with `...`.
fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let keep = max.saturating_sub(3);
    let mut out: String = text.chars().take(keep).collect();
    out.push_str(&"..."[..max.min(3)]);
    out
}

fn role_counts(messages: &[Message]) -> String {
    [Role::System, Role::User, Role::Assistant, Role::Tool]
        .into_iter()
        .filter_map(|role| {
            let n = messages.iter().filter(|m| m.role == role).count();
            (n > 0).then(|| format!("{} {}", n, role))
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// Tool names in first-call order, deduplicated.
fn tool_names(messages: &[Message]) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for call in messages.iter().filter_map(|m| m.tool_calls.as_ref()).flatten() {
        if !names.iter().any(|n| n == &call.name) {
            names.push(call.name.clone());
        }
    }
    names
}

/// A word worth listing: a number, a name, an acronym or a long word.
///
/// A capital letter only marks a name away from the start of a sentence.
fn is_salient(word: &str, sentence_initial: bool) -> bool {
    if word.chars().any(|c| c.is_ascii_digit()) && word.chars().all(|c| c.is_ascii_digit() || c == '.') {
        return true;
    }
    let len = word.chars().count();
    if len < 2 || STOPWORDS.contains(&word.to_lowercase().as_str()) {
        return false;
    }
    let capitalised = word.chars().next().is_some_and(char::is_uppercase);
    let inner_upper = word.chars().skip(1).any(char::is_uppercase);
    (capitalised && !sentence_initial) || inner_upper || len >= LONG_WORD_CHARS
}

/// Most frequent salient terms, ties broken by first appearance.
fn top_terms(messages: &[Message], limit: usize) -> Vec<String> {
    // lowercase key -> (display form, count, first position)
    let mut seen: HashMap<String, (String, usize, usize)> = HashMap::new();
    let mut position = 0;

    for message in messages.iter().filter(|m| !m.is_system()) {
        let mut at_sentence_start = true;
        for raw in message.content.split_whitespace() {
            let sentence_initial = at_sentence_start;
            at_sentence_start = raw.ends_with(['.', '!', '?', ':']);

            let words = raw
                .split(|c: char| !(c.is_alphanumeric() || c == '_' || c == '.'))
                .map(|w| w.trim_matches('.'))
                .filter(|w| !w.is_empty());
            for (i, word) in words.enumerate() {
                position += 1;
                if !is_salient(word, sentence_initial && i == 0) {
                    continue;
                }
                let entry = seen
                    .entry(word.to_lowercase())
                    .or_insert_with(|| (word.to_string(), 0, position));
                entry.1 += 1;
            }
        }
    }

    let mut ranked: Vec<(String, usize, usize)> = seen.into_values().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.2.cmp(&b.2)));
    ranked.into_iter().take(limit).map(|(w, _, _)| w).collect()
}

/// First sentence of `content`, whitespace-collapsed and capped.
fn leading_sentence(content: &str) -> Option<String> {
    let first_line = content.lines().map(str::trim).find(|l| !l.is_empty())?;

    let mut end = first_line.len();
    let mut chars = first_line.char_indices().peekable();
    while let Some((idx, c)) = chars.next() {
        if matches!(c, '.' | '!' | '?')
            && chars.peek().map_or(true, |(_, next)| next.is_whitespace())
        {
            end = idx + c.len_utf8();
            break;
        }
    }

    let sentence = first_line[..end]
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    Some(truncate_chars(&sentence, LEADING_SENTENCE_CHARS))
}

fn render_transcript(messages: &[Message]) -> String {
    let mut transcript = String::new();
    for msg in messages {
        transcript.push_str(&format!("{}: {}\n", msg.role, msg.content));
        for call in msg.tool_calls.iter().flatten() {
            transcript.push_str(&format!("{} -> {}({})\n", msg.role, call.name, call.arguments));
        }
    }
    transcript
}

/// Build a prompt asking an LLM to summarize a set of messages.
///
/// # Examples
/// ```
/// use loopkeeper::agent::summary::build_summary_prompt;
/// use loopkeeper::session::Message;
///
/// let msgs = vec![Message::user("Hello"), Message::assistant("Hi there!")];
/// let prompt = build_summary_prompt(&msgs);
/// assert!(prompt.contains("user: Hello"));
/// assert!(prompt.contains("assistant: Hi there!"));
/// ```
pub fn build_summary_prompt(messages: &[Message]) -> String {
    format!(
        "Summarize the following conversation focusing on key decisions, \
         information exchanged, and actions taken. Be concise.\n\n{}",
        render_transcript(messages)
    )
}

/// Wrap `summary` in the system message stored in place of pruned turns.
pub fn summary_message(summary: &str) -> Message {
    Message::system(&format!("{}\n{}", SUMMARY_MESSAGE_PREFIX, summary))
}
