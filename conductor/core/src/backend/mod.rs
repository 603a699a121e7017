//! Inference Backend Integration
//!
//! Abstracted access to inference providers through one trait, plus the
//! retry wrapper every orchestrator call goes through.
//!
//! # Available Backends
//!
//! - **OpenAI-compatible**: any `/chat/completions` endpoint (default:
//!   DashScope compatible mode)
//!
//! # Usage
//!
//! ```ignore
//! use std::sync::Arc;
//! use chat_conductor::backend::{
//!     OpenAiCompatBackend, OpenAiCompatConfig, RetryPolicy, RetryingInferenceClient,
//! };
//!
//! let backend = OpenAiCompatBackend::new(OpenAiCompatConfig::default())?;
//! let client = RetryingInferenceClient::new(Arc::new(backend), RetryPolicy::default());
//! let chunks = client.stream_call(&request).await?;
//! ```

mod delta;
mod openai_compat;
mod retry;
mod traits;

pub use delta::{into_incremental, DeltaTracker};
pub use openai_compat::{OpenAiCompatBackend, OpenAiCompatConfig, DEFAULT_BASE_URL};
pub use retry::{RetryPolicy, RetryingInferenceClient};
pub use traits::{
    ChunkStream, InferenceBackend, InferenceRequest, InferenceResponse, ModelParams,
    PromptMessage,
};
