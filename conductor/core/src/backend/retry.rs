//! Retrying Inference Client
//!
//! Wraps an [`InferenceBackend`] with bounded exponential backoff.
//!
//! - Only [`BackendError::Retryable`] failures are retried
//! - Backoff is `base_delay * multiplier^attempt`: 2 s then 4 s by default
//! - Running out of attempts escalates to [`BackendError::Exhausted`]
//! - Streaming calls retry only until the first chunk arrives; a failure
//!   after that ends the stream with no replay
//!
//! Backoff is a `tokio::time::sleep`, so dropping the future (cancel) ends
//! the wait immediately.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::error::BackendError;

use super::traits::{ChunkStream, InferenceBackend, InferenceRequest, InferenceResponse};

/// Backoff policy
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    /// Delay unit multiplied by `multiplier^attempt`
    pub base_delay: Duration,
    /// Growth factor between attempts
    pub multiplier: u32,
    /// Upper bound for a single backoff
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            multiplier: 2,
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Policy that never retries
    #[must_use]
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    /// Backoff after failed attempt number `attempt` (1-based)
    #[must_use]
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.saturating_pow(attempt);
        self.base_delay
            .saturating_mul(factor)
            .min(self.max_delay)
    }

    fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

/// Backend client with retry
#[derive(Clone)]
pub struct RetryingInferenceClient {
    backend: Arc<dyn InferenceBackend>,
    policy: RetryPolicy,
}

impl std::fmt::Debug for RetryingInferenceClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryingInferenceClient")
            .field("backend", &self.backend.name())
            .field("policy", &self.policy)
            .finish()
    }
}

impl RetryingInferenceClient {
    /// Wrap `backend` with `policy`
    pub fn new(backend: Arc<dyn InferenceBackend>, policy: RetryPolicy) -> Self {
        Self { backend, policy }
    }

    /// The wrapped backend
    #[must_use]
    pub fn backend(&self) -> &Arc<dyn InferenceBackend> {
        &self.backend
    }

    /// The active policy
    #[must_use]
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Complete answer, retrying transient failures
    ///
    /// # Errors
    ///
    /// Fatal errors immediately, [`BackendError::Exhausted`] once the retry
    /// budget is spent.
    pub async fn call(
        &self,
        request: &InferenceRequest,
    ) -> Result<InferenceResponse, BackendError> {
        let backend = &self.backend;
        self.with_retry("submit", || backend.submit(request)).await
    }

    /// Streaming answer, retrying transient failures before the first chunk
    ///
    /// The first chunk is pulled eagerly so a backend that fails right after
    /// connecting is retried like one that failed to connect.
    ///
    /// # Errors
    ///
    /// As [`call`](Self::call). Errors after the first chunk arrive as stream
    /// items instead.
    pub async fn stream_call(
        &self,
        request: &InferenceRequest,
    ) -> Result<ChunkStream, BackendError> {
        let backend = &self.backend;
        self.with_retry("submit_streaming", || async move {
            let mut upstream = backend.submit_streaming(request).await?;
            match upstream.next().await {
                Some(Ok(first)) => Ok(stream::once(async move { Ok(first) })
                    .chain(upstream)
                    .boxed()),
                Some(Err(err)) => Err(err),
                None => Ok(stream::empty().boxed()),
            }
        })
        .await
    }

    async fn with_retry<T, F, Fut>(
        &self,
        operation: &'static str,
        mut attempt_fn: F,
    ) -> Result<T, BackendError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, BackendError>>,
    {
        let max_attempts = self.policy.attempts();
        let mut attempt = 0;

        loop {
            attempt += 1;
            match attempt_fn().await {
                Ok(value) => {
                    if attempt > 1 {
                        info!(
                            backend = self.backend.name(),
                            operation,
                            attempt,
                            "Backend call succeeded after retry"
                        );
                    }
                    return Ok(value);
                }
                Err(err) if err.is_retryable() => {
                    if attempt >= max_attempts {
                        error!(
                            backend = self.backend.name(),
                            operation,
                            attempts = attempt,
                            error = %err,
                            "Backend call failed, retries exhausted"
                        );
                        return Err(BackendError::Exhausted {
                            attempts: attempt,
                            last_error: err.to_string(),
                        });
                    }

                    let delay = self.policy.backoff_for_attempt(attempt);
                    warn!(
                        backend = self.backend.name(),
                        operation,
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Backend call failed, retrying"
                    );
                    sleep(delay).await;
                }
                Err(err) => {
                    warn!(
                        backend = self.backend.name(),
                        operation,
                        attempt,
                        error = %err,
                        "Backend call failed with non-retryable error"
                    );
                    return Err(err);
                }
            }
        }
    }
}
