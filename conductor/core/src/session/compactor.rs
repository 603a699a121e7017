//! History Compaction
//!
//! Trims a conversation to a token budget by evicting the oldest non-system
//! messages first.
//!
//! Token cost is `ceil(chars / 4)`, an approximation rather than a real
//! tokenizer.

use super::history::ConversationHistory;

/// Characters per estimated token
pub const CHARS_PER_TOKEN: usize = 4;

/// Default history budget in estimated tokens
pub const DEFAULT_MAX_HISTORY_TOKENS: usize = 30_720;

/// Estimate the token cost of `text`
#[must_use]
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(CHARS_PER_TOKEN)
}

/// Trim `history` until its estimated cost fits `max_tokens`
///
/// Evicts the oldest non-system message (index 1 when index 0 is the system
/// prompt, index 0 otherwise) while the budget is exceeded. The system prompt
/// is never evicted while other messages remain, and the sole remaining
/// message is never evicted, so the result may still exceed the budget.
///
/// Pure and idempotent.
#[must_use]
pub fn compact(history: &ConversationHistory, max_tokens: usize) -> ConversationHistory {
    let messages = history.messages();
    let mut total = history.estimated_tokens();
    if total <= max_tokens {
        return history.clone();
    }

    let start = usize::from(messages.first().is_some_and(|m| m.is_system()));
    let mut end = start;
    let mut remaining = messages.len();

    while total > max_tokens && end < messages.len() && remaining > 1 {
        total -= messages[end].estimated_tokens();
        end += 1;
        remaining -= 1;
    }

    let mut compacted = history.clone();
    compacted.drain_range(start..end);

    tracing::debug!(
        evicted = end - start,
        remaining = compacted.len(),
        estimated_tokens = total,
        max_tokens,
        "Compacted conversation history"
    );

    compacted
}

/// Compaction bound to a configured budget
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HistoryCompactor {
    max_tokens: usize,
}

impl Default for HistoryCompactor {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_HISTORY_TOKENS)
    }
}

impl HistoryCompactor {
    /// Create a compactor for `max_tokens`
    #[must_use]
    pub fn new(max_tokens: usize) -> Self {
        Self { max_tokens }
    }

    /// Configured budget
    #[must_use]
    pub fn max_tokens(&self) -> usize {
        self.max_tokens
    }

    /// Whether `history` is over budget
    #[must_use]
    pub fn needs_compaction(&self, history: &ConversationHistory) -> bool {
        history.estimated_tokens() > self.max_tokens
    }

    /// Compact `history` to the configured budget
    #[must_use]
    pub fn compact(&self, history: &ConversationHistory) -> ConversationHistory {
        compact(history, self.max_tokens)
    }
}
