//! Handler for `im.message.receive_v1`: turns an inbound message into one QA turn.

use crate::aggregator::{self, StreamPolicy};
use crate::channels::{ConversationTurn, MessageSink};
use crate::events::{EventEnvelope, EventHandler, HandlerError};
use crate::qa::AnswerSource;
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;

pub const MESSAGE_RECEIVE_EVENT: &str = "im.message.receive_v1";

/// Fixed reply for anything that is not a text message.
pub const UNSUPPORTED_MESSAGE_REPLY: &str = "Unsupported message type, please send a text message.";

/// Group-chat mentions arrive in the text as `@_user_1`, `@_user_2`, ...
const MENTION_PREFIX: &str = "@_user_";

#[derive(Debug, Deserialize)]
struct MessageReceiveEvent {
    message: ReceivedMessage,
}

#[derive(Debug, Deserialize)]
struct ReceivedMessage {
    message_id: String,
    message_type: String,
    /// JSON-encoded content; for text messages `{"text": "..."}`.
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
struct TextContent {
    text: String,
}

/// Answers text messages through the QA pipeline, streaming into a reply card.
pub struct MessageHandler {
    sink: Arc<dyn MessageSink>,
    qa: Arc<dyn AnswerSource>,
    policy: StreamPolicy,
}

impl MessageHandler {
    pub fn new(sink: Arc<dyn MessageSink>, qa: Arc<dyn AnswerSource>, policy: StreamPolicy) -> Self {
        Self { sink, qa, policy }
    }
}

/// Question text of a message, with mention placeholders removed.
fn question_text(message: &ReceivedMessage) -> Result<String, HandlerError> {
    if message.message_type != "text" {
        return Err(HandlerError::UnsupportedContent(message.message_type.clone()));
    }
    let content: TextContent = serde_json::from_str(&message.content)
        .map_err(|e| HandlerError::Malformed(format!("text content: {}", e)))?;
    Ok(strip_mentions(&content.text))
}

/// Drop `@_user_N` placeholders (and the space after each); all other whitespace is kept.
fn strip_mentions(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(pos) = rest.find(MENTION_PREFIX) {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + MENTION_PREFIX.len()..];
        let digits = after
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(after.len());
        if digits == 0 {
            out.push_str(MENTION_PREFIX);
            rest = after;
            continue;
        }
        let tail = &after[digits..];
        rest = tail.strip_prefix(' ').unwrap_or(tail);
    }
    out.push_str(rest);
    out.trim().to_string()
}

#[async_trait]
impl EventHandler for MessageHandler {
    async fn handle(&self, envelope: EventEnvelope) -> Result<(), HandlerError> {
        let event: MessageReceiveEvent = serde_json::from_value(envelope.payload)
            .map_err(|e| HandlerError::Malformed(e.to_string()))?;
        let message = event.message;
        let question = match question_text(&message) {
            Ok(q) => q,
            Err(HandlerError::UnsupportedContent(kind)) => {
                log::info!(
                    "message {}: unsupported type {}, sending fallback",
                    message.message_id,
                    kind
                );
                self.sink
                    .reply_text(&message.message_id, UNSUPPORTED_MESSAGE_REPLY)
                    .await?;
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        if question.is_empty() {
            log::debug!("message {}: empty question, ignoring", message.message_id);
            return Ok(());
        }

        let turn = ConversationTurn {
            message_id: message.message_id,
            question,
        };
        log::info!("turn {}: answering", turn.message_id);
        let stream = self.qa.start(&turn.question).await?;
        if let Err(e) = aggregator::run_turn(self.sink.as_ref(), &turn, stream, &self.policy).await {
            log::warn!("turn {} ended early: {}", turn.message_id, e);
        }
        Ok(())
    }
}
