//! Inference Backend Traits
//!
//! Trait definitions for inference backends. The orchestrator only ever talks
//! to an [`InferenceBackend`]; provider-specific details (endpoints, auth,
//! response shapes) stay behind it.
//!
//! # Contract
//!
//! - `submit` returns one complete answer
//! - `submit_streaming` returns a lazy, finite, non-restartable stream of
//!   incremental text chunks; dropping the stream disposes the upstream call
//! - every failure is a [`BackendError`], classified retryable or fatal

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::Serialize;

use crate::error::BackendError;
use crate::messages::MessageRole;
use crate::session::ConversationHistory;

/// Incremental chunks of one streaming generation
pub type ChunkStream = BoxStream<'static, Result<String, BackendError>>;

/// Model parameters sent with every request
#[derive(Clone, Debug, PartialEq)]
pub struct ModelParams {
    /// Backend-specific model identifier
    pub model: String,
    /// Sampling temperature (0.0-2.0)
    pub temperature: f32,
    /// Nucleus sampling
    pub top_p: f32,
    /// Maximum tokens in the answer (0 = backend default)
    pub max_tokens: u32,
    /// Let the backend consult web search
    pub enable_search: bool,
}

impl Default for ModelParams {
    fn default() -> Self {
        Self {
            model: "qwen-plus".to_string(),
            temperature: 0.7,
            top_p: 0.9,
            max_tokens: 0,
            enable_search: false,
        }
    }
}

impl ModelParams {
    /// Parameters for `model` with defaults elsewhere
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Default::default()
        }
    }

    /// Set temperature
    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature.clamp(0.0, 2.0);
        self
    }

    /// Set top-p
    #[must_use]
    pub fn with_top_p(mut self, top_p: f32) -> Self {
        self.top_p = top_p.clamp(0.0, 1.0);
        self
    }

    /// Set max tokens
    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Toggle web search
    #[must_use]
    pub fn with_search(mut self, enable_search: bool) -> Self {
        self.enable_search = enable_search;
        self
    }
}

/// One message of the prompt
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PromptMessage {
    /// Speaker
    pub role: MessageRole,
    /// Text
    pub content: String,
}

/// A complete request to a backend
#[derive(Clone, Debug, PartialEq)]
pub struct InferenceRequest {
    /// Conversation so far, including the new question
    pub messages: Vec<PromptMessage>,
    /// Model parameters
    pub params: ModelParams,
}

impl InferenceRequest {
    /// Build a request from a conversation history
    #[must_use]
    pub fn from_history(history: &ConversationHistory, params: ModelParams) -> Self {
        Self {
            messages: history
                .turns()
                .map(|(role, content)| PromptMessage {
                    role,
                    content: content.to_string(),
                })
                .collect(),
            params,
        }
    }

    /// The last user question, if any
    #[must_use]
    pub fn last_question(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == MessageRole::User)
            .map(|m| m.content.as_str())
    }
}

/// Response from a non-streaming request
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InferenceResponse {
    /// The answer text
    pub content: String,
    /// Model that generated the answer
    pub model: String,
    /// Tokens used (if reported)
    pub tokens_used: Option<u32>,
    /// Generation time in milliseconds
    pub duration_ms: Option<u64>,
}

/// Inference backend trait
///
/// Implement this to add support for a provider.
#[async_trait]
pub trait InferenceBackend: Send + Sync {
    /// Backend name for logs
    fn name(&self) -> &str;

    /// Send a request and wait for the complete answer
    async fn submit(&self, request: &InferenceRequest) -> Result<InferenceResponse, BackendError>;

    /// Send a request and stream the answer incrementally
    ///
    /// Errors before the stream exists are returned directly; errors after
    /// that arrive as stream items.
    async fn submit_streaming(&self, request: &InferenceRequest)
        -> Result<ChunkStream, BackendError>;

    /// Check if the backend is reachable
    async fn health_check(&self) -> bool {
        true
    }
}

#[async_trait]
impl<B: InferenceBackend + ?Sized> InferenceBackend for Arc<B> {
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn submit(&self, request: &InferenceRequest) -> Result<InferenceResponse, BackendError> {
        (**self).submit(request).await
    }

    async fn submit_streaming(
        &self,
        request: &InferenceRequest,
    ) -> Result<ChunkStream, BackendError> {
        (**self).submit_streaming(request).await
    }

    async fn health_check(&self) -> bool {
        (**self).health_check().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_params_builder() {
        let params = ModelParams::new("qwen-max")
            .with_temperature(0.3)
            .with_top_p(1.5)
            .with_max_tokens(256)
            .with_search(true);

        assert_eq!(params.model, "qwen-max");
        assert!((params.temperature - 0.3).abs() < f32::EPSILON);
        assert!((params.top_p - 1.0).abs() < f32::EPSILON);
        assert_eq!(params.max_tokens, 256);
        assert!(params.enable_search);
    }

    #[test]
    fn test_request_from_history() {
        let mut history = ConversationHistory::with_system_prompt("sys");
        history.push(MessageRole::User, "first").unwrap();
        history.push(MessageRole::Assistant, "answer").unwrap();
        history.push(MessageRole::User, "second").unwrap();

        let request = InferenceRequest::from_history(&history, ModelParams::default());

        assert_eq!(request.messages.len(), 4);
        assert_eq!(request.messages[0].role, MessageRole::System);
        assert_eq!(request.last_question(), Some("second"));
    }
}
