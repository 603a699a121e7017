//! Conversation History
//!
//! The ordered message list for one session.
//!
//! # Invariants
//!
//! - A System message, if present, is unique and sits at index 0
//! - Sequence numbers are strictly increasing; compaction may leave gaps
//! - A history is a plain value: the store swaps whole snapshots, so a
//!   reader holding an `Arc<ConversationHistory>` never sees a partial write

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ConductorError, ConductorResult};
use crate::messages::MessageRole;

use super::compactor::estimate_tokens;

/// A message in the conversation
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConversationMessage {
    /// Who sent this message
    pub role: MessageRole,
    /// Message content
    pub content: String,
    /// Position in the session, monotonic
    pub sequence: u64,
    /// When the message was appended
    pub created_at: DateTime<Utc>,
}

impl ConversationMessage {
    /// Estimated token cost of this message
    #[must_use]
    pub fn estimated_tokens(&self) -> usize {
        estimate_tokens(&self.content)
    }

    /// Whether this is the system prompt
    #[must_use]
    pub fn is_system(&self) -> bool {
        self.role == MessageRole::System
    }
}

/// Ordered messages of one session
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ConversationHistory {
    messages: Vec<ConversationMessage>,
    next_sequence: u64,
}

impl ConversationHistory {
    /// Create an empty history
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a history seeded with a system prompt
    ///
    /// An empty prompt yields an empty history.
    #[must_use]
    pub fn with_system_prompt(prompt: &str) -> Self {
        let mut history = Self::new();
        if !prompt.is_empty() {
            history.push_unchecked(MessageRole::System, prompt.to_string());
        }
        history
    }

    /// Append a message
    ///
    /// # Errors
    ///
    /// Returns [`ConductorError::History`] when a System message would not be
    /// the first and only one.
    pub fn push(
        &mut self,
        role: MessageRole,
        content: impl Into<String>,
    ) -> ConductorResult<&ConversationMessage> {
        if role == MessageRole::System && !self.messages.is_empty() {
            return Err(ConductorError::History(
                "system message must be the first message".to_string(),
            ));
        }
        Ok(self.push_unchecked(role, content.into()))
    }

    fn push_unchecked(&mut self, role: MessageRole, content: String) -> &ConversationMessage {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.messages.push(ConversationMessage {
            role,
            content,
            sequence,
            created_at: Utc::now(),
        });
        &self.messages[self.messages.len() - 1]
    }

    /// All messages in order
    #[must_use]
    pub fn messages(&self) -> &[ConversationMessage] {
        &self.messages
    }

    /// Number of messages
    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Whether the history holds no messages
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Most recent message
    #[must_use]
    pub fn last(&self) -> Option<&ConversationMessage> {
        self.messages.last()
    }

    /// The system prompt, if the history starts with one
    #[must_use]
    pub fn system_prompt(&self) -> Option<&str> {
        self.messages
            .first()
            .filter(|m| m.is_system())
            .map(|m| m.content.as_str())
    }

    /// Total estimated tokens
    #[must_use]
    pub fn estimated_tokens(&self) -> usize {
        self.messages.iter().map(ConversationMessage::estimated_tokens).sum()
    }

    /// Role/content pairs, in order
    pub fn turns(&self) -> impl Iterator<Item = (MessageRole, &str)> {
        self.messages.iter().map(|m| (m.role, m.content.as_str()))
    }

    /// Drop messages in `range`; used by compaction only
    pub(crate) fn drain_range(&mut self, range: std::ops::Range<usize>) {
        self.messages.drain(range);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seeded_history_starts_with_system() {
        let history = ConversationHistory::with_system_prompt("You are helpful");

        assert_eq!(history.len(), 1);
        assert_eq!(history.system_prompt(), Some("You are helpful"));
        assert_eq!(history.messages()[0].sequence, 0);
    }

    #[test]
    fn test_empty_prompt_yields_empty_history() {
        let history = ConversationHistory::with_system_prompt("");
        assert!(history.is_empty());
        assert_eq!(history.system_prompt(), None);
    }

    #[test]
    fn test_sequences_are_monotonic() {
        let mut history = ConversationHistory::with_system_prompt("sys");
        history.push(MessageRole::User, "Hello").unwrap();
        history.push(MessageRole::Assistant, "Hi").unwrap();

        let sequences: Vec<u64> = history.messages().iter().map(|m| m.sequence).collect();
        assert_eq!(sequences, vec![0, 1, 2]);
    }

    #[test]
    fn test_second_system_message_rejected() {
        let mut history = ConversationHistory::with_system_prompt("sys");
        let result = history.push(MessageRole::System, "again");

        assert!(matches!(result, Err(ConductorError::History(_))));
        assert_eq!(history.len(), 1);
    }

    #[test]
    fn test_system_allowed_on_empty_history() {
        let mut history = ConversationHistory::new();
        history.push(MessageRole::System, "sys").unwrap();
        assert_eq!(history.system_prompt(), Some("sys"));
    }

    #[test]
    fn test_sequence_survives_drain() {
        let mut history = ConversationHistory::with_system_prompt("sys");
        history.push(MessageRole::User, "a").unwrap();
        history.push(MessageRole::Assistant, "b").unwrap();
        history.drain_range(1..3);

        let next = history.push(MessageRole::User, "c").unwrap();
        assert_eq!(next.sequence, 3);
    }

    #[test]
    fn test_estimated_tokens_sums_messages() {
        let mut history = ConversationHistory::with_system_prompt("abcd"); // 1
        history.push(MessageRole::User, "abcde").unwrap(); // 2
        assert_eq!(history.estimated_tokens(), 3);
    }
}
