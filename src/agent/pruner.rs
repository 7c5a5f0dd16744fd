//! History pruning to a token budget.
//!
//! Removal order is oldest first. Two kinds of message are never removed:
//! system messages (instructions the model must keep seeing) and the final
//! exchange, i.e. the last two messages, which carry the turn the model is
//! answering. If those alone exceed the budget the result stays over budget;
//! callers that need a hard guarantee decide what to do next (see
//! `SessionCompactor`).

use super::tokens::{estimate_history_tokens, estimate_message_tokens};
use crate::session::Message;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Number of trailing messages treated as the final exchange.
pub const FINAL_EXCHANGE_LEN: usize = 2;

/// Outcome of [`HistoryPruner::prune`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PruneResult {
    /// Surviving messages in original order
    pub pruned_history: Vec<Message>,
    /// How many messages were removed
    pub messages_removed: usize,
}

/// Removes oldest non-essential messages until a history fits a token budget.
#[derive(Debug, Clone, Copy, Default)]
pub struct HistoryPruner;

impl HistoryPruner {
    pub fn new() -> Self {
        Self
    }

    /// Prune `history` to at most `target_tokens`, returning the survivors.
    ///
    /// - empty history or `target_tokens == 0` → empty
    /// - already within budget → unchanged copy
    /// - otherwise oldest non-system messages outside the final exchange are
    ///   dropped until the estimate fits, preserving relative order
    ///
    /// # Examples
    /// ```
    /// use loopkeeper::agent::HistoryPruner;
    /// use loopkeeper::session::Message;
    ///
    /// let history = vec![
    ///     Message::system("Be brief."),
    ///     Message::user("first question with several words"),
    ///     Message::assistant("first answer with several words"),
    ///     Message::user("second"),
    ///     Message::assistant("answer"),
    /// ];
    /// let pruned = HistoryPruner::new().prune_history(&history, 5);
    /// assert_eq!(pruned.len(), 3); // system + final exchange
    /// ```
    pub fn prune_history(&self, history: &[Message], target_tokens: usize) -> Vec<Message> {
        self.prune(history, target_tokens).pruned_history
    }

    /// Like [`prune_history`](Self::prune_history), also reporting how many
    /// messages were removed. Leading system messages always stay at the head.
    pub fn prune(&self, history: &[Message], target_tokens: usize) -> PruneResult {
        if history.is_empty() || target_tokens == 0 {
            return PruneResult {
                pruned_history: Vec::new(),
                messages_removed: history.len(),
            };
        }

        let mut total = estimate_history_tokens(history);
        if total <= target_tokens {
            return PruneResult {
                pruned_history: history.to_vec(),
                messages_removed: 0,
            };
        }

        let protected_from = history.len().saturating_sub(FINAL_EXCHANGE_LEN);
        let mut keep = vec![true; history.len()];
        let mut removed = 0;

        for (idx, message) in history.iter().enumerate().take(protected_from) {
            if total <= target_tokens {
                break;
            }
            if message.is_system() {
                continue;
            }
            keep[idx] = false;
            total -= estimate_message_tokens(message);
            removed += 1;
        }

        let pruned_history: Vec<Message> = history
            .iter()
            .zip(keep)
            .filter_map(|(m, k)| k.then(|| m.clone()))
            .collect();

        debug!(
            before = history.len(),
            after = pruned_history.len(),
            tokens = total,
            target = target_tokens,
            "Pruned history"
        );

        PruneResult {
            pruned_history,
            messages_removed: removed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::tokens::estimate_history_tokens;
    use crate::session::Role;

    fn conversation(pairs: usize) -> Vec<Message> {
        let mut history = vec![Message::system("You are a careful coding assistant.")];
        for i in 0..pairs {
            history.push(Message::user(&format!("question {} about the build script", i)));
            history.push(Message::assistant(&format!("answer {} about the build script", i)));
        }
        history
    }

    #[test]
    fn test_empty_history() {
        let result = HistoryPruner::new().prune(&[], 100);
        assert!(result.pruned_history.is_empty());
        assert_eq!(result.messages_removed, 0);
    }

    #[test]
    fn test_zero_target_is_empty() {
        let history = conversation(2);
        let result = HistoryPruner::new().prune(&history, 0);
        assert!(result.pruned_history.is_empty());
        assert_eq!(result.messages_removed, history.len());
    }

    #[test]
    fn test_under_budget_unchanged() {
        let history = conversation(2);
        let pruned = HistoryPruner::new().prune_history(&history, 10_000);
        assert_eq!(pruned, history);
    }

    #[test]
    fn test_prunes_to_budget_keeping_order() {
        let history = conversation(10);
        let target = estimate_history_tokens(&history) / 2;

        let result = HistoryPruner::new().prune(&history, target);
        assert!(result.messages_removed > 0);
        assert!(estimate_history_tokens(&result.pruned_history) <= target);

        // Survivors appear in the same relative order as in the input.
        let mut cursor = history.iter();
        for kept in &result.pruned_history {
            assert!(cursor.any(|m| m == kept));
        }
    }

    #[test]
    fn test_oldest_removed_first() {
        let history = conversation(5);
        let pruned = HistoryPruner::new().prune_history(&history, estimate_history_tokens(&history) - 1);

        // The first user question is the cheapest way to get under by one token.
        assert_eq!(pruned.len(), history.len() - 1);
        assert_eq!(pruned[0].role, Role::System);
        assert!(pruned[1].content.starts_with("answer 0"));
    }

    #[test]
    fn test_system_messages_never_dropped() {
        let mut history = conversation(4);
        history.insert(3, Message::system("Mid-conversation instruction."));

        let pruned = HistoryPruner::new().prune_history(&history, 1);
        let systems = pruned.iter().filter(|m| m.is_system()).count();
        assert_eq!(systems, 2);
        assert_eq!(pruned[0], history[0]);
    }

    #[test]
    fn test_final_exchange_kept_even_over_budget() {
        let history = conversation(3);
        let result = HistoryPruner::new().prune(&history, 1);

        let n = history.len();
        let m = result.pruned_history.len();
        assert_eq!(result.pruned_history[m - 2..], history[n - 2..]);
        assert_eq!(m, 3); // system + final exchange
        assert_eq!(result.messages_removed, n - 3);
    }

    #[test]
    fn test_leading_system_block_verbatim() {
        let mut history = vec![
            Message::system("Rule one."),
            Message::system("Rule two."),
        ];
        history.extend(conversation(6).into_iter().skip(1));

        let result = HistoryPruner::new().prune(&history, 20);
        assert_eq!(result.pruned_history[0], history[0]);
        assert_eq!(result.pruned_history[1], history[1]);
    }

    #[test]
    fn test_removed_plus_kept_is_total() {
        let history = conversation(7);
        let result = HistoryPruner::new().prune(&history, 30);
        assert_eq!(
            result.pruned_history.len() + result.messages_removed,
            history.len()
        );
    }
}
