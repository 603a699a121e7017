//! Daemon Wire Protocol
//!
//! Messages carried inside frames on the daemon socket. One connection can
//! run chats for several sessions; every server frame names its session.
//!
//! ```text
//! client                                  daemon
//!   │ Chat {request}                        │
//!   │ ────────────────────────────────────► │
//!   │              Event {message} × n      │
//!   │ ◄──────────────────────────────────── │
//!   │              Event {done | error}     │
//!   │ ◄──────────────────────────────────── │
//!   │ Stop {sessionId}                      │
//!   │ ────────────────────────────────────► │
//!   │              Stopped {"stopped"}      │
//!   │ ◄──────────────────────────────────── │
//! ```

use serde::{Deserialize, Serialize};

use crate::messages::{ChatEvent, ChatRequest, MessageRole, SessionId};
use crate::session::ConversationHistory;

/// Client → daemon
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientRequest {
    /// Ask a question and stream the answer
    Chat {
        /// The chat request
        #[serde(flatten)]
        request: ChatRequest,
    },
    /// Stop the session's in-flight generation
    Stop {
        /// Target session
        #[serde(rename = "sessionId")]
        session_id: SessionId,
    },
    /// Forget the session
    Clear {
        /// Target session
        #[serde(rename = "sessionId")]
        session_id: SessionId,
    },
    /// Fetch the session's history
    History {
        /// Target session
        #[serde(rename = "sessionId")]
        session_id: SessionId,
    },
}

/// One history entry as sent to clients
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Speaker
    pub role: MessageRole,
    /// Text
    pub content: String,
}

impl HistoryEntry {
    /// Entries for every message of `history`
    #[must_use]
    pub fn from_history(history: &ConversationHistory) -> Vec<Self> {
        history
            .turns()
            .map(|(role, content)| Self {
                role,
                content: content.to_string(),
            })
            .collect()
    }
}

/// Daemon → client
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// A chat event for the session
    Event {
        /// Session the event belongs to
        #[serde(rename = "sessionId")]
        session_id: SessionId,
        /// The event
        #[serde(flatten)]
        event: ChatEvent,
    },
    /// Stop acknowledgement
    Stopped {
        /// Session that was stopped
        #[serde(rename = "sessionId")]
        session_id: SessionId,
        /// Always `"stopped"`
        ack: String,
    },
    /// Clear acknowledgement
    Cleared {
        /// Session that was cleared
        #[serde(rename = "sessionId")]
        session_id: SessionId,
    },
    /// History snapshot (empty if the session is unknown)
    History {
        /// Session the history belongs to
        #[serde(rename = "sessionId")]
        session_id: SessionId,
        /// Messages, oldest first
        messages: Vec<HistoryEntry>,
    },
    /// Request refused before any work started
    Rejected {
        /// Session named by the request, if any
        #[serde(rename = "sessionId", default, skip_serializing_if = "Option::is_none")]
        session_id: Option<SessionId>,
        /// Reason
        error: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_chat_request_wire_shape() {
        let value = json!({
            "type": "chat",
            "sessionId": "s1",
            "question": "hello",
            "options": {"enableSearch": true}
        });
        let request: ClientRequest = serde_json::from_value(value).unwrap();

        match request {
            ClientRequest::Chat { request } => {
                assert_eq!(request.session_id.as_str(), "s1");
                assert_eq!(request.question, "hello");
                assert!(request.options.enable_search);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_chat_options_are_optional() {
        let request: ClientRequest =
            serde_json::from_value(json!({"type": "chat", "sessionId": "s1", "question": "hi"}))
                .unwrap();
        assert!(matches!(
            request,
            ClientRequest::Chat { request } if !request.options.enable_search
        ));
    }

    #[test]
    fn test_event_frame_wire_shape() {
        let frame = ServerFrame::Event {
            session_id: "s1".into(),
            event: ChatEvent::chunk("Hi "),
        };
        assert_eq!(
            serde_json::to_value(&frame).unwrap(),
            json!({
                "type": "event",
                "sessionId": "s1",
                "event": "message",
                "data": {"content": "Hi "}
            })
        );
    }

    #[test]
    fn test_rejected_without_session() {
        let frame = ServerFrame::Rejected {
            session_id: None,
            error: "bad frame".to_string(),
        };
        assert_eq!(
            serde_json::to_value(&frame).unwrap(),
            json!({"type": "rejected", "error": "bad frame"})
        );
    }
}
