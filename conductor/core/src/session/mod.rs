//! Session Management
//!
//! Conversation state per session: the message history itself, the store
//! that keys histories by session, token-budget compaction, and a small
//! board of last-generation outcomes.

pub mod activity;
pub mod compactor;
pub mod history;
pub mod store;

pub use activity::{ActivityBoard, SessionActivity};
pub use compactor::{
    compact, estimate_tokens, HistoryCompactor, CHARS_PER_TOKEN, DEFAULT_MAX_HISTORY_TOKENS,
};
pub use history::{ConversationHistory, ConversationMessage};
pub use store::ConversationStore;
