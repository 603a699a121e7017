//! Error Types
//!
//! Error taxonomy for the orchestration core:
//!
//! - [`ValidationError`]: malformed requests, rejected synchronously
//! - [`BackendError`]: inference failures, classified retryable or fatal
//! - [`ConductorError`]: what the orchestrator's public operations return
//!
//! A client disconnect is not an error at all. It is routed through the
//! cancellation registry as an implicit cancel.

use thiserror::Error;

/// Request validation failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// Session id was empty or whitespace
    #[error("session id is required")]
    MissingSessionId,

    /// Question was empty or whitespace
    #[error("question must not be empty")]
    EmptyQuestion,

    /// Question alone cannot fit the history budget
    #[error("question is too long: ~{tokens} tokens exceeds the {budget} token budget")]
    QuestionTooLong {
        /// Estimated question tokens
        tokens: usize,
        /// Tokens left after the system prompt
        budget: usize,
    },
}

/// Inference backend failures
///
/// Classification drives the retry policy: only [`BackendError::Retryable`]
/// is ever retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    /// Transport or generic API fault; worth another attempt
    #[error("{0}")]
    Retryable(String),

    /// Bad credentials, invalid input, unknown model; never retried
    #[error("{0}")]
    Fatal(String),

    /// Retry budget spent on retryable failures
    #[error("exhausted retries after {attempts} attempts: {last_error}")]
    Exhausted {
        /// Attempts made
        attempts: u32,
        /// Message of the final failure
        last_error: String,
    },
}

impl BackendError {
    /// Retryable failure
    pub fn retryable(message: impl Into<String>) -> Self {
        Self::Retryable(message.into())
    }

    /// Fatal failure
    pub fn fatal(message: impl Into<String>) -> Self {
        Self::Fatal(message.into())
    }

    /// Whether the retry wrapper may try again
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable(_))
    }

    /// Classify an HTTP status returned by a backend
    ///
    /// 401/403 are credential problems, other 4xx are bad input, 429 and 5xx
    /// are transient.
    pub fn from_status(status: u16, body: impl Into<String>) -> Self {
        let body = body.into();
        match status {
            401 | 403 => Self::Fatal(if body.is_empty() {
                "invalid api key".to_string()
            } else {
                body
            }),
            429 | 500..=599 => Self::Retryable(format!("backend returned {status}: {body}")),
            _ => Self::Fatal(format!("backend rejected request ({status}): {body}")),
        }
    }
}

impl From<reqwest::Error> for BackendError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            return Self::from_status(status.as_u16(), err.to_string());
        }
        if err.is_builder() || err.is_decode() {
            return Self::Fatal(err.to_string());
        }
        Self::Retryable(err.to_string())
    }
}

/// Errors returned by the orchestrator's public operations
#[derive(Debug, Error)]
pub enum ConductorError {
    /// Request rejected before any work started
    #[error("invalid request: {0}")]
    Validation(#[from] ValidationError),

    /// Backend failed (after retries, where applicable)
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// The generation was cancelled before it produced an answer
    #[error("generation cancelled")]
    Cancelled,

    /// History invariant violated by a caller
    #[error("history error: {0}")]
    History(String),
}

/// Result alias for orchestrator operations
pub type ConductorResult<T> = Result<T, ConductorError>;
