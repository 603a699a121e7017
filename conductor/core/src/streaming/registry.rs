//! Cancellation Registry
//!
//! Maps each session to the handle of its in-flight generation. At most one
//! handle per session; registering a new one cancels the old one first.
//!
//! Per-key atomicity comes from the `DashMap` entry API. No guard is held
//! across an `.await`.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::messages::{GenerationId, SessionId};

use super::handle::GenerationHandle;

/// Session → active generation
#[derive(Debug, Default)]
pub struct CancellationRegistry {
    active: DashMap<SessionId, Arc<GenerationHandle>>,
}

impl CancellationRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Active handle for `session`
    #[must_use]
    pub fn get(&self, session: &SessionId) -> Option<Arc<GenerationHandle>> {
        self.active.get(session).map(|h| Arc::clone(h.value()))
    }

    /// Register `handle` for its session
    ///
    /// Any previous handle is cancelled before the new one becomes visible.
    /// Returns the replaced handle.
    pub fn set(&self, handle: Arc<GenerationHandle>) -> Option<Arc<GenerationHandle>> {
        match self.active.entry(handle.session().clone()) {
            Entry::Occupied(mut entry) => {
                let previous = entry.get();
                if previous.cancel() {
                    tracing::info!(
                        session = %handle.session(),
                        replaced = %previous.id(),
                        generation = %handle.id(),
                        "Replaced in-flight generation"
                    );
                }
                Some(entry.insert(handle))
            }
            Entry::Vacant(entry) => {
                entry.insert(handle);
                None
            }
        }
    }

    /// Deregister whatever is active for `session`; idempotent
    pub fn remove(&self, session: &SessionId) -> Option<Arc<GenerationHandle>> {
        self.active.remove(session).map(|(_, handle)| handle)
    }

    /// Deregister only if `generation` is still the active one
    pub fn remove_if(&self, session: &SessionId, generation: GenerationId) -> bool {
        self.active
            .remove_if(session, |_, handle| handle.id() == generation)
            .is_some()
    }

    /// Cancel and deregister the active generation for `session`
    ///
    /// Unknown session is a no-op. Returns whether anything was cancelled.
    pub fn cancel(&self, session: &SessionId) -> bool {
        self.remove(session).is_some_and(|handle| handle.cancel())
    }

    /// Cancel `generation` only if it is still the active one for `session`
    ///
    /// A late disconnect or stop aimed at a replaced generation never touches
    /// the fresh one.
    pub fn cancel_generation(&self, session: &SessionId, generation: GenerationId) -> bool {
        self.active
            .remove_if(session, |_, handle| handle.id() == generation)
            .is_some_and(|(_, handle)| handle.cancel())
    }

    /// Cancel every active generation
    pub fn cancel_all(&self) -> usize {
        let sessions: Vec<SessionId> = self.active.iter().map(|e| e.key().clone()).collect();
        sessions.iter().filter(|s| self.cancel(s)).count()
    }

    /// Active (session, generation) pairs
    #[must_use]
    pub fn active(&self) -> Vec<(SessionId, GenerationId)> {
        self.active
            .iter()
            .map(|e| (e.key().clone(), e.value().id()))
            .collect()
    }

    /// Number of active generations
    #[must_use]
    pub fn len(&self) -> usize {
        self.active.len()
    }

    /// Whether nothing is in flight
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }
}
