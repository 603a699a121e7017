//! Generation Handles
//!
//! One handle per in-flight generation. The handle owns the cancellation
//! token, the lifecycle state and the accumulation buffer.
//!
//! Chunk delivery, commit, failure and cancellation all run under the
//! handle's state lock. Once `cancel` returns, no further chunk reaches the
//! client and nothing from this generation is committed to history.

use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::messages::{GenerationId, SessionId};

use super::delivery::DeliveryChannel;

/// Lifecycle of one generation
///
/// ```text
/// Created ──► Running ──┬──► Completed
///    │                  ├──► Cancelled
///    │                  └──► Failed
///    └──► Cancelled / Failed
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GenerationState {
    /// Registered, backend not yet called
    Created,
    /// Backend call in progress
    Running,
    /// Answer committed and `on_complete` sent
    Completed,
    /// Stopped by request, disconnect, replacement or timeout
    Cancelled,
    /// Error reported via `on_error`
    Failed,
}

impl GenerationState {
    /// Whether no further transitions are accepted
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Failed)
    }

    /// Whether `self -> next` is a legal transition
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        match self {
            Self::Created => matches!(next, Self::Running | Self::Cancelled | Self::Failed),
            Self::Running => matches!(next, Self::Completed | Self::Cancelled | Self::Failed),
            Self::Completed | Self::Cancelled | Self::Failed => false,
        }
    }

    /// Lowercase name for logs
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for GenerationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug)]
struct HandleInner {
    state: GenerationState,
    buffer: String,
    chunks: u32,
}

impl HandleInner {
    fn transition(&mut self, next: GenerationState) -> bool {
        if self.state.can_transition_to(next) {
            self.state = next;
            true
        } else {
            false
        }
    }
}

/// One in-flight generation for a session
#[derive(Debug)]
pub struct GenerationHandle {
    id: GenerationId,
    session: SessionId,
    token: CancellationToken,
    started_at: Instant,
    inner: Mutex<HandleInner>,
}

impl GenerationHandle {
    /// Create a handle in the `Created` state
    #[must_use]
    pub fn new(session: SessionId) -> Self {
        Self {
            id: GenerationId::new(),
            session,
            token: CancellationToken::new(),
            started_at: Instant::now(),
            inner: Mutex::new(HandleInner {
                state: GenerationState::Created,
                buffer: String::new(),
                chunks: 0,
            }),
        }
    }

    /// Generation id
    #[must_use]
    pub fn id(&self) -> GenerationId {
        self.id
    }

    /// Owning session
    #[must_use]
    pub fn session(&self) -> &SessionId {
        &self.session
    }

    /// Token cancelled when this generation is cancelled
    #[must_use]
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> GenerationState {
        self.inner.lock().state
    }

    /// Whether the generation reached a terminal state
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.state().is_terminal()
    }

    /// Time since the handle was created
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Number of chunks delivered so far
    #[must_use]
    pub fn chunks_delivered(&self) -> u32 {
        self.inner.lock().chunks
    }

    /// `Created -> Running`
    pub fn mark_running(&self) -> bool {
        self.inner.lock().transition(GenerationState::Running)
    }

    /// Run `f` under the state lock if the generation is still `Created`
    ///
    /// A cancel that lands first makes this return `None` without running
    /// `f`; a cancel that lands later waits until `f` finished.
    pub fn while_created<R>(&self, f: impl FnOnce() -> R) -> Option<R> {
        let inner = self.inner.lock();
        if inner.state != GenerationState::Created {
            return None;
        }
        Some(f())
    }

    /// Buffer `chunk` and forward it to `channel`
    ///
    /// Returns `false` (and delivers nothing) unless the generation is running.
    pub fn deliver(&self, chunk: &str, channel: &dyn DeliveryChannel) -> bool {
        let mut inner = self.inner.lock();
        if inner.state != GenerationState::Running {
            return false;
        }
        inner.buffer.push_str(chunk);
        inner.chunks += 1;
        channel.on_chunk(chunk);
        true
    }

    /// `Running -> Completed`, handing the accumulated text to `commit`
    ///
    /// `commit` runs under the state lock, so a concurrent cancel either
    /// happens before (and `commit` never runs) or waits until it finished.
    pub fn complete<R>(&self, commit: impl FnOnce(String) -> R) -> Option<R> {
        let mut inner = self.inner.lock();
        if !inner.transition(GenerationState::Completed) {
            return None;
        }
        let text = std::mem::take(&mut inner.buffer);
        Some(commit(text))
    }

    /// Move to `Failed` and run `report` once
    pub fn fail(&self, report: impl FnOnce()) -> bool {
        let mut inner = self.inner.lock();
        if !inner.transition(GenerationState::Failed) {
            return false;
        }
        inner.buffer.clear();
        report();
        self.token.cancel();
        true
    }

    /// Move to `Cancelled`, discard the buffer and fire the token
    ///
    /// Returns `false` if the generation was already terminal.
    pub fn cancel(&self) -> bool {
        let mut inner = self.inner.lock();
        if !inner.transition(GenerationState::Cancelled) {
            return false;
        }
        inner.buffer.clear();
        self.token.cancel();
        tracing::debug!(
            session = %self.session,
            generation = %self.id,
            chunks = inner.chunks,
            "Generation cancelled"
        );
        true
    }
}
