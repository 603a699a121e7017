//! Cumulative → Incremental
//!
//! Some backends resend the whole answer so far with every event. The
//! orchestrator expects incremental chunks, so those streams are normalized
//! here: each cumulative text is diffed against what was already emitted.

use futures::future;
use futures::stream::StreamExt;
use tracing::warn;

use super::traits::ChunkStream;
use crate::error::BackendError;

/// Tracks what has been emitted so far
#[derive(Debug, Default, Clone)]
pub struct DeltaTracker {
    emitted: String,
}

impl DeltaTracker {
    /// Create an empty tracker
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// New text in `cumulative` since the last call
    ///
    /// `None` if `cumulative` does not extend what was already emitted: the
    /// backend rewrote its answer and the client already holds the old text.
    pub fn delta(&mut self, cumulative: &str) -> Option<String> {
        let rest = cumulative.strip_prefix(self.emitted.as_str())?.to_string();
        self.emitted.push_str(&rest);
        Some(rest)
    }

    /// Characters emitted so far
    #[must_use]
    pub fn emitted_chars(&self) -> usize {
        self.emitted.chars().count()
    }
}

/// Wrap a cumulative stream so it yields incremental chunks
///
/// Empty deltas are dropped; errors pass through unchanged. A rewrite of
/// already-emitted text fails the stream.
#[must_use]
pub fn into_incremental(stream: ChunkStream) -> ChunkStream {
    let mut tracker = DeltaTracker::new();
    stream
        .map(move |item| {
            let text = item?;
            tracker.delta(&text).ok_or_else(|| {
                warn!(
                    emitted_chars = tracker.emitted_chars(),
                    received_chars = text.chars().count(),
                    "Backend rewrote an answer that was already streamed"
                );
                BackendError::fatal("backend rewrote a streamed answer")
            })
        })
        .filter(|item| future::ready(!matches!(item, Ok(text) if text.is_empty())))
        .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    #[test]
    fn test_delta_tracks_prefix() {
        let mut tracker = DeltaTracker::new();
        assert_eq!(tracker.delta("Hi").as_deref(), Some("Hi"));
        assert_eq!(tracker.delta("Hi there").as_deref(), Some(" there"));
        assert_eq!(tracker.delta("Hi there.").as_deref(), Some("."));
        assert_eq!(tracker.delta("Hi there.").as_deref(), Some(""));
        assert_eq!(tracker.emitted_chars(), 9);
    }

    #[test]
    fn test_delta_rejects_rewrite() {
        let mut tracker = DeltaTracker::new();
        tracker.delta("Hello");
        assert_eq!(tracker.delta("Howdy"), None);
        // Baseline is unchanged after a rejected rewrite
        assert_eq!(tracker.delta("Hello!").as_deref(), Some("!"));
    }

    #[tokio::test]
    async fn test_rewrite_fails_stream() {
        let cumulative = stream::iter(vec![
            Ok("Hello".to_string()),
            Ok("Howdy".to_string()),
            Ok("Howdy!".to_string()),
        ])
        .boxed();

        let items: Vec<_> = into_incremental(cumulative).collect().await;

        assert_eq!(items[0], Ok("Hello".to_string()));
        assert_eq!(items[1], Err(BackendError::fatal("backend rewrote a streamed answer")));
    }

    #[tokio::test]
    async fn test_into_incremental() {
        let cumulative = stream::iter(vec![
            Ok("Hi".to_string()),
            Ok("Hi".to_string()),
            Ok("Hi there.".to_string()),
            Err(BackendError::retryable("reset")),
        ])
        .boxed();

        let items: Vec<_> = into_incremental(cumulative).collect().await;

        assert_eq!(
            items,
            vec![
                Ok("Hi".to_string()),
                Ok(" there.".to_string()),
                Err(BackendError::retryable("reset")),
            ]
        );
    }
}
