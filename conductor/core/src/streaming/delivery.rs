//! Delivery Channels
//!
//! Where generated text goes. The orchestrator pushes chunks into a
//! [`DeliveryChannel`] and never knows whether the other end is an event
//! stream, a socket or a test recorder.
//!
//! # Contract
//!
//! - `on_chunk` is best effort; a closed channel logs and drops
//! - `on_complete` and `on_error` are each called at most once, and never both
//! - `disconnected` resolves when the client went away
//!
//! The push methods are sync so they can run under a generation's state lock.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::messages::{ChatEvent, SessionId};

/// Push sink for one generation
#[async_trait]
pub trait DeliveryChannel: Send + Sync {
    /// Forward one chunk of answer text
    fn on_chunk(&self, text: &str);

    /// The answer is complete
    fn on_complete(&self);

    /// The generation failed
    fn on_error(&self, error: &str);

    /// Resolves once the client is gone
    ///
    /// Defaults to never resolving, for sinks without a disconnect signal.
    async fn disconnected(&self) {
        futures::future::pending::<()>().await;
    }
}

/// [`DeliveryChannel`] over an unbounded tokio mpsc of [`ChatEvent`]s
///
/// Dropping the receiver counts as a client disconnect.
#[derive(Debug, Clone)]
pub struct ChannelDelivery {
    session: SessionId,
    tx: mpsc::UnboundedSender<ChatEvent>,
}

impl ChannelDelivery {
    /// Create a delivery channel and the receiver a transport drains
    #[must_use]
    pub fn new(session: SessionId) -> (Self, mpsc::UnboundedReceiver<ChatEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { session, tx }, rx)
    }

    /// Wrap an existing sender
    #[must_use]
    pub fn from_sender(session: SessionId, tx: mpsc::UnboundedSender<ChatEvent>) -> Self {
        Self { session, tx }
    }

    fn send(&self, event: ChatEvent) {
        if self.tx.send(event).is_err() {
            tracing::debug!(session = %self.session, "Delivery channel closed, dropping event");
        }
    }
}

#[async_trait]
impl DeliveryChannel for ChannelDelivery {
    fn on_chunk(&self, text: &str) {
        self.send(ChatEvent::chunk(text));
    }

    fn on_complete(&self) {
        self.send(ChatEvent::done());
    }

    fn on_error(&self, error: &str) {
        self.send(ChatEvent::error(error));
    }

    async fn disconnected(&self) {
        self.tx.closed().await;
    }
}
