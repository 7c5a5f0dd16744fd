//! Token estimation utilities.
//!
//! Word-based heuristic, no tokenizer download required:
//! - each run of letters/digits (plus `_`, `'` inside a word) is one token,
//! - each standalone punctuation or symbol character is one token,
//! - each CJK ideograph, kana or hangul syllable is one token on its own.
//!
//! This tracks BPE tokenizers closely enough on English prose and source code
//! to drive compaction decisions, and unlike a bytes/4 rule it does not
//! undercount CJK text by a factor of three.

use crate::session::Message;

/// Fixed cost of a tool call on top of its name and arguments (id, wrapper).
pub const TOOL_CALL_OVERHEAD: usize = 3;

/// Per-message role marker and delimiter cost in the wire format.
pub const MESSAGE_ROLE_OVERHEAD: usize = 4;

/// Whether `c` is written without spaces and tokenized one glyph at a time.
pub fn is_cjk(c: char) -> bool {
    matches!(c,
        '\u{3040}'..='\u{30FF}'     // Hiragana, Katakana
        | '\u{3400}'..='\u{4DBF}'   // CJK Extension A
        | '\u{4E00}'..='\u{9FFF}'   // CJK Unified Ideographs
        | '\u{AC00}'..='\u{D7AF}'   // Hangul syllables
        | '\u{F900}'..='\u{FAFF}'   // CJK Compatibility Ideographs
        | '\u{20000}'..='\u{2A6DF}' // CJK Extension B
    )
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Estimate the token count of a string.
///
/// # Examples
/// ```
/// use loopkeeper::agent::tokens::estimate_text_tokens;
///
/// assert_eq!(estimate_text_tokens(""), 0);
/// assert_eq!(estimate_text_tokens("hello world"), 2);
/// assert_eq!(estimate_text_tokens("fn main() {}"), 6);
/// assert_eq!(estimate_text_tokens("你好"), 2);
/// ```
pub fn estimate_text_tokens(text: &str) -> usize {
    let mut tokens = 0;
    let mut in_word = false;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if is_cjk(c) {
            tokens += 1;
            in_word = false;
        } else if is_word_char(c) {
            if !in_word {
                tokens += 1;
                in_word = true;
            }
        } else if c == '\'' && in_word && chars.peek().is_some_and(|n| is_word_char(*n)) {
            // Apostrophe inside a word ("don't") does not split it.
        } else if c.is_whitespace() {
            in_word = false;
        } else {
            tokens += 1;
            in_word = false;
        }
    }
    tokens
}

/// Estimate tokens for a single tool call: name, arguments and fixed overhead.
pub fn estimate_tool_call_tokens(name: &str, arguments: &str) -> usize {
    estimate_text_tokens(name) + estimate_text_tokens(arguments) + TOOL_CALL_OVERHEAD
}

/// Estimate tokens for a single message: content plus any tool calls it carries.
pub fn estimate_message_tokens(message: &Message) -> usize {
    let tool_tokens: usize = message
        .tool_calls
        .iter()
        .flatten()
        .map(|tc| estimate_tool_call_tokens(&tc.name, &tc.arguments))
        .sum();
    estimate_text_tokens(&message.content) + tool_tokens
}

/// Sum of message estimates over a history.
pub fn estimate_history_tokens(messages: &[Message]) -> usize {
    messages.iter().map(estimate_message_tokens).sum()
}

/// History plus system prompt.
pub fn estimate_total_context_tokens(messages: &[Message], system_prompt: &str) -> usize {
    estimate_history_tokens(messages) + estimate_text_tokens(system_prompt)
}

/// History estimate plus the per-message role marker overhead.
pub fn estimate_conversation_tokens(messages: &[Message]) -> usize {
    estimate_history_tokens(messages) + messages.len() * MESSAGE_ROLE_OVERHEAD
}

/// `100 * used / total`, or `0.0` when `total` is zero.
pub fn calculate_token_usage_percentage(used: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    100.0 * used as f64 / total as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::ToolCall;

    #[test]
    fn test_empty_is_zero() {
        assert_eq!(estimate_text_tokens(""), 0);
        assert_eq!(estimate_text_tokens("   \n\t"), 0);
    }

    #[test]
    fn test_words() {
        assert_eq!(estimate_text_tokens("This is a test message"), 5);
        assert_eq!(estimate_text_tokens("snake_case_name"), 1);
    }

    #[test]
    fn test_punctuation_counts_separately() {
        assert_eq!(estimate_text_tokens("Hello, world!"), 4);
        assert_eq!(estimate_text_tokens("a.b"), 3);
    }

    #[test]
    fn test_contraction_is_one_word() {
        assert_eq!(estimate_text_tokens("don't stop"), 2);
        // A quote that does not sit between letters is punctuation.
        assert_eq!(estimate_text_tokens("'quoted'"), 3);
    }

    #[test]
    fn test_cjk_per_character() {
        assert_eq!(estimate_text_tokens("東京は大きい"), 6);
        assert_eq!(estimate_text_tokens("한국어"), 3);
    }

    #[test]
    fn test_mixed_script_sums() {
        // "Rust" + 3 ideographs + "code"
        assert_eq!(estimate_text_tokens("Rust語言程 code"), 5);
    }

    #[test]
    fn test_tool_call_tokens() {
        // read_file(1) + {"path": "a"} → { " path " : " a " } = 9, + overhead 3
        assert_eq!(
            estimate_tool_call_tokens("read_file", r#"{"path": "a"}"#),
            1 + 9 + TOOL_CALL_OVERHEAD
        );
        assert_eq!(estimate_tool_call_tokens("", ""), TOOL_CALL_OVERHEAD);
    }

    #[test]
    fn test_message_includes_tool_calls() {
        let plain = Message::assistant("Looking now");
        let with_call = Message::assistant_with_tools(
            "Looking now",
            vec![ToolCall::new("c1", "grep", "TODO")],
        );
        assert_eq!(estimate_message_tokens(&plain), 2);
        assert_eq!(estimate_message_tokens(&with_call), 2 + 1 + 1 + TOOL_CALL_OVERHEAD);
    }

    #[test]
    fn test_history_and_total() {
        let history = vec![Message::user("one two"), Message::assistant("three")];
        assert_eq!(estimate_history_tokens(&history), 3);
        assert_eq!(estimate_total_context_tokens(&history, "be brief"), 5);
        assert_eq!(estimate_total_context_tokens(&[], ""), 0);
    }

    #[test]
    fn test_conversation_adds_role_overhead() {
        let history = vec![Message::user("one"), Message::assistant("two")];
        assert_eq!(
            estimate_conversation_tokens(&history),
            2 + 2 * MESSAGE_ROLE_OVERHEAD
        );
    }

    #[test]
    fn test_usage_percentage() {
        assert_eq!(calculate_token_usage_percentage(50, 200), 25.0);
        assert_eq!(calculate_token_usage_percentage(10, 0), 0.0);
        assert_eq!(calculate_token_usage_percentage(300, 200), 150.0);
    }
}
