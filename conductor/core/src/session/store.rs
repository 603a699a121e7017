//! Conversation Store
//!
//! Session-keyed conversation histories.
//!
//! # Thread Safety
//!
//! Histories live in a sharded `DashMap`, so operations on different sessions
//! do not contend. Each entry holds an `Arc<ConversationHistory>` snapshot.
//! Writers mutate through `Arc::make_mut` while holding the entry guard:
//! a reader that took a snapshot earlier keeps its old copy, and a reader that
//! arrives later sees the complete new one. Nobody observes a torn write.
//!
//! Guards are never held across an `.await`; every method here is sync.

use std::sync::Arc;

use dashmap::DashMap;

use crate::error::ConductorResult;
use crate::messages::{MessageRole, SessionId};

use super::history::{ConversationHistory, ConversationMessage};

/// Session-keyed conversation histories
#[derive(Debug)]
pub struct ConversationStore {
    histories: DashMap<SessionId, Arc<ConversationHistory>>,
    system_prompt: String,
}

impl ConversationStore {
    /// Create a store that seeds new histories with `system_prompt`
    pub fn new(system_prompt: impl Into<String>) -> Self {
        Self {
            histories: DashMap::new(),
            system_prompt: system_prompt.into(),
        }
    }

    /// The template used to seed new histories
    #[must_use]
    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    fn seed(&self) -> Arc<ConversationHistory> {
        Arc::new(ConversationHistory::with_system_prompt(&self.system_prompt))
    }

    /// Get the session's history, creating it if absent
    pub fn get_or_create(&self, session: &SessionId) -> Arc<ConversationHistory> {
        self.histories
            .entry(session.clone())
            .or_insert_with(|| {
                tracing::debug!(session = %session, "Created conversation history");
                self.seed()
            })
            .clone()
    }

    /// Snapshot of the session's history, if it exists
    #[must_use]
    pub fn snapshot(&self, session: &SessionId) -> Option<Arc<ConversationHistory>> {
        self.histories.get(session).map(|h| Arc::clone(h.value()))
    }

    /// Append a message, creating the history lazily
    ///
    /// # Errors
    ///
    /// Fails if the message would break the single-leading-system invariant.
    pub fn append(
        &self,
        session: &SessionId,
        role: MessageRole,
        content: impl Into<String>,
    ) -> ConductorResult<ConversationMessage> {
        self.update(session, |history| history.push(role, content).cloned())
    }

    /// Apply `f` to the session's history as one atomic write
    ///
    /// The history is created lazily. `f` runs under the entry guard and must
    /// not block.
    pub fn update<R>(
        &self,
        session: &SessionId,
        f: impl FnOnce(&mut ConversationHistory) -> R,
    ) -> R {
        let mut entry = self
            .histories
            .entry(session.clone())
            .or_insert_with(|| self.seed());
        f(Arc::make_mut(entry.value_mut()))
    }

    /// Atomically swap in a new history
    pub fn replace(&self, session: &SessionId, history: ConversationHistory) {
        self.histories.insert(session.clone(), Arc::new(history));
    }

    /// Remove the session's history
    pub fn remove(&self, session: &SessionId) -> Option<Arc<ConversationHistory>> {
        self.histories.remove(session).map(|(_, history)| history)
    }

    /// Whether the session has a history
    #[must_use]
    pub fn contains(&self, session: &SessionId) -> bool {
        self.histories.contains_key(session)
    }

    /// Number of sessions with a history
    #[must_use]
    pub fn len(&self) -> usize {
        self.histories.len()
    }

    /// Whether no session has a history
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.histories.is_empty()
    }
}
