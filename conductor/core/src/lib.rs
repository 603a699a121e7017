//! Chat Conductor Core - Session-Scoped Streaming Chat Orchestration
//!
//! This crate accepts questions bound to a session, keeps a bounded
//! conversation history per session, forwards requests to a remote inference
//! backend, and streams the incremental answer back to a waiting client. Any
//! in-flight generation can be cancelled at any moment, transient backend
//! failures are retried with backoff, and at most one generation writes to a
//! session's history at a time.
//!
//! It is completely independent of any transport. It can sit behind an event
//! stream, a socket, or a test harness.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                      Transports / Handlers                       │
//! │    event stream   │   Unix socket daemon   │   test harness      │
//! └───────────┬──────────────────────────────────────▲───────────────┘
//!             │ ChatRequest / cancel / clear         │ ChatEvent
//!             ▼                                      │
//! ┌──────────────────────────────────────────────────┴───────────────┐
//! │                       StreamOrchestrator                         │
//! │  ┌──────────────┐ ┌────────────────┐ ┌─────────────────────────┐ │
//! │  │Conversation  │ │ Cancellation   │ │ DeliveryChannel         │ │
//! │  │Store +       │ │ Registry       │ │ (per generation)        │ │
//! │  │Compactor     │ │                │ │                         │ │
//! │  └──────────────┘ └────────────────┘ └─────────────────────────┘ │
//! │  ┌────────────────────────────┐ ┌─────────────────────────────┐  │
//! │  │ RetryingInferenceClient    │ │ FallbackResponder           │  │
//! │  └─────────────┬──────────────┘ └─────────────────────────────┘  │
//! └────────────────┼─────────────────────────────────────────────────┘
//!                  ▼
//!          InferenceBackend (OpenAI-compatible HTTP)
//! ```
//!
//! # Key Types
//!
//! - [`StreamOrchestrator`]: top-level state machine; start, cancel, ask, clear
//! - [`ConversationStore`]: session-keyed, copy-on-write histories
//! - [`HistoryCompactor`]: token-budget trimming
//! - [`RetryingInferenceClient`]: bounded exponential backoff around a backend
//! - [`CancellationRegistry`]: one active generation per session
//! - [`DeliveryChannel`]: where chunks go
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use chat_conductor::{
//!     backend::{OpenAiCompatBackend, OpenAiCompatConfig},
//!     ChannelDelivery, ChatRequest, ConductorConfig, StreamOrchestrator,
//! };
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let backend = OpenAiCompatBackend::new(OpenAiCompatConfig::default())?;
//!     let conductor = StreamOrchestrator::new(Arc::new(backend), ConductorConfig::default());
//!
//!     let request = ChatRequest::new("session-1", "hello");
//!     let (channel, mut events) = ChannelDelivery::new(request.session_id.clone());
//!     conductor.start(request, Arc::new(channel))?;
//!
//!     while let Some(event) = events.recv().await {
//!         let done = event.is_terminal();
//!         println!("{}", serde_json::to_string(&event)?);
//!         if done {
//!             break;
//!         }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Module Overview
//!
//! - [`backend`]: inference backend trait, HTTP backend, retry wrapper
//! - [`conductor`]: the orchestrator
//! - [`config`]: TOML/env/CLI configuration
//! - [`error`]: error taxonomy
//! - [`messages`]: requests and streamed events
//! - [`session`]: histories, store, compaction, activity
//! - [`storage`]: session file storage
//! - [`streaming`]: handles, registry, delivery, canned answers
//! - [`transport`]: frame codec and daemon protocol

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod backend;
pub mod conductor;
pub mod config;
pub mod error;
pub mod messages;
pub mod session;
pub mod storage;
pub mod streaming;
pub mod transport;

// Re-exports for convenience
pub use backend::{
    ChunkStream, InferenceBackend, InferenceRequest, InferenceResponse, ModelParams,
    OpenAiCompatBackend, OpenAiCompatConfig, RetryPolicy, RetryingInferenceClient,
};
pub use conductor::{
    ConductorConfig, GenerationTicket, OrchestratorBuilder, StreamOrchestrator,
    DEFAULT_GENERATION_TIMEOUT, DEFAULT_SYSTEM_PROMPT,
};
pub use error::{BackendError, ConductorError, ConductorResult, ValidationError};
pub use messages::{
    ChatEvent, ChatOptions, ChatRequest, GenerationId, MessageRole, SessionId, DONE_MARKER,
    STOPPED_ACK,
};
pub use session::{
    ConversationHistory, ConversationMessage, ConversationStore, HistoryCompactor,
    SessionActivity,
};
pub use storage::{FileStore, LocalFileStore, NoopFileStore, StorageError};
pub use streaming::{
    CancellationRegistry, ChannelDelivery, DeliveryChannel, FallbackResponder, GenerationHandle,
    GenerationState,
};

// Config exports
pub use config::{
    default_config_path, load_config, load_config_from_path, ConductorSettings, ConductorToml,
    ConfigError, ConfigOverrides, ConfigSource,
};
