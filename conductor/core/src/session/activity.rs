//! Session Activity
//!
//! Last known generation outcome per session, so handlers can answer
//! "what happened to my last question" without holding a stream open.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;

use crate::messages::{GenerationId, SessionId};
use crate::streaming::GenerationState;

/// Snapshot of a session's most recent generation
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SessionActivity {
    /// Generation this entry describes
    pub generation_id: GenerationId,
    /// Its current or final state
    pub state: GenerationState,
    /// Error reported to the client, for `Failed`
    pub error: Option<String>,
    /// Last update time
    pub updated_at: DateTime<Utc>,
}

/// Per-session activity entries
#[derive(Debug, Default)]
pub struct ActivityBoard {
    entries: DashMap<SessionId, SessionActivity>,
}

impl ActivityBoard {
    /// Create an empty board
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `generation` started; replaces whatever was there
    pub fn begin(&self, session: &SessionId, generation: GenerationId) {
        self.entries.insert(
            session.clone(),
            SessionActivity {
                generation_id: generation,
                state: GenerationState::Running,
                error: None,
                updated_at: Utc::now(),
            },
        );
    }

    /// Record the outcome of `generation`
    ///
    /// Ignored when a newer generation already owns the entry.
    pub fn finish(
        &self,
        session: &SessionId,
        generation: GenerationId,
        state: GenerationState,
        error: Option<String>,
    ) {
        if let Some(mut entry) = self.entries.get_mut(session) {
            if entry.generation_id == generation {
                entry.state = state;
                entry.error = error;
                entry.updated_at = Utc::now();
            }
        }
    }

    /// Current entry for `session`
    #[must_use]
    pub fn get(&self, session: &SessionId) -> Option<SessionActivity> {
        self.entries.get(session).map(|e| e.value().clone())
    }

    /// Forget `session`
    pub fn remove(&self, session: &SessionId) {
        self.entries.remove(session);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_begin_then_finish() {
        let board = ActivityBoard::new();
        let session = SessionId::from("s1");
        let generation = GenerationId::new();

        board.begin(&session, generation);
        assert_eq!(board.get(&session).unwrap().state, GenerationState::Running);

        board.finish(
            &session,
            generation,
            GenerationState::Failed,
            Some("invalid api key".to_string()),
        );
        let activity = board.get(&session).unwrap();
        assert_eq!(activity.state, GenerationState::Failed);
        assert_eq!(activity.error.as_deref(), Some("invalid api key"));
    }

    #[test]
    fn test_stale_finish_ignored() {
        let board = ActivityBoard::new();
        let session = SessionId::from("s1");
        let old = GenerationId::new();
        let new = GenerationId::new();

        board.begin(&session, old);
        board.begin(&session, new);
        board.finish(&session, old, GenerationState::Cancelled, None);

        let activity = board.get(&session).unwrap();
        assert_eq!(activity.generation_id, new);
        assert_eq!(activity.state, GenerationState::Running);
    }

    #[test]
    fn test_unknown_session() {
        let board = ActivityBoard::new();
        let session = SessionId::from("nobody");
        board.finish(&session, GenerationId::new(), GenerationState::Completed, None);
        assert!(board.get(&session).is_none());
    }
}
