//! Conductor Messages
//!
//! Request and event types exchanged between the orchestration core and
//! whatever transport carries them to a client (event stream, socket, test
//! harness).
//!
//! # Wire Shape
//!
//! ```text
//! chat request   {"sessionId": "s1", "question": "hello", "options": {"enableSearch": false}}
//! chunk event    {"event": "message", "data": {"content": "Hi "}}
//! done event     {"event": "done",    "data": "[DONE]"}
//! error event    {"event": "error",   "data": {"error": "invalid api key"}}
//! ```
//!
//! The core never serializes these itself; transports do.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Marker carried by the terminal `done` event
pub const DONE_MARKER: &str = "[DONE]";

/// Acknowledgement returned by a stop request
pub const STOPPED_ACK: &str = "stopped";

/// Session identifier
///
/// Opaque to the core. Uniqueness is a property of the maps keyed by it,
/// nothing more.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub String);

impl SessionId {
    /// Wrap a raw identifier
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the raw identifier
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the identifier is empty or whitespace
    #[must_use]
    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for SessionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Identifier of a single generation (one question/answer cycle)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GenerationId(Uuid);

impl GenerationId {
    /// Generate a new unique generation ID
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for GenerationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for GenerationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "gen-{}", self.0.simple())
    }
}

/// Who sent a message
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// System prompt seeded at the head of every history
    System,
    /// User input
    User,
    /// Model output
    Assistant,
}

impl MessageRole {
    /// Role name as understood by chat-completion backends
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-request generation options
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChatOptions {
    /// Let the backend augment the answer with web search
    pub enable_search: bool,
}

/// A question bound to a session
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    /// Target session
    pub session_id: SessionId,
    /// The user's question
    pub question: String,
    /// Generation options
    #[serde(default)]
    pub options: ChatOptions,
}

impl ChatRequest {
    /// Create a request with default options
    pub fn new(session_id: impl Into<SessionId>, question: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            question: question.into(),
            options: ChatOptions::default(),
        }
    }

    /// Toggle web search for this request
    #[must_use]
    pub fn with_search(mut self, enable_search: bool) -> Self {
        self.options.enable_search = enable_search;
        self
    }
}

/// Streamed event delivered to a client for one generation
///
/// A client observes either `Message*` followed by `Done`, or a single
/// `Error`. Never both.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "lowercase")]
pub enum ChatEvent {
    /// An incremental chunk of generated text
    Message {
        /// Chunk text
        content: String,
    },
    /// Generation completed; carries [`DONE_MARKER`]
    Done(String),
    /// Generation failed
    Error {
        /// Human-readable error
        error: String,
    },
}

impl ChatEvent {
    /// Chunk event
    pub fn chunk(content: impl Into<String>) -> Self {
        Self::Message {
            content: content.into(),
        }
    }

    /// Terminal done event
    #[must_use]
    pub fn done() -> Self {
        Self::Done(DONE_MARKER.to_string())
    }

    /// Terminal error event
    pub fn error(error: impl Into<String>) -> Self {
        Self::Error {
            error: error.into(),
        }
    }

    /// Whether this event ends the stream
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Message { .. })
    }
}
