//! Message sink: the create-or-edit surface a turn writes its answer through.

use crate::channels::turn::{ConversationTurn, OutboundSnapshot};
use async_trait::async_trait;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("rate limited: {0}")]
    RateLimited(String),
    #[error("sink request failed: {0}")]
    Request(String),
    #[error("sink api error: {0}")]
    Api(String),
    #[error("sink call timed out after {0:?}")]
    Timeout(Duration),
}

/// Outbound side of a conversation.
///
/// `create_reply` is called exactly once per turn, before any `edit_message` for
/// that turn. Callers never issue two calls concurrently for the same reply id.
#[async_trait]
pub trait MessageSink: Send + Sync {
    /// Post the initial reply to `turn.message_id` and return the reply anchor.
    async fn create_reply(&self, turn: &ConversationTurn) -> Result<String, SinkError>;

    /// Replace the content of a previously created reply. Sending the same snapshot twice is harmless.
    async fn edit_message(
        &self,
        reply_message_id: &str,
        snapshot: &OutboundSnapshot,
    ) -> Result<(), SinkError>;

    /// Reply with a plain text message (fallbacks such as unsupported content).
    async fn reply_text(&self, message_id: &str, text: &str) -> Result<(), SinkError>;
}
