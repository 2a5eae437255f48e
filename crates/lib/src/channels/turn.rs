//! Conversation turn and the values that flow from the QA pipeline to the message sink.

use serde::{Deserialize, Serialize};

/// One question-to-answer cycle triggered by a single inbound text message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationTurn {
    /// Platform id of the inbound message being answered (the reply target).
    pub message_id: String,
    pub question: String,
}

/// A cited document. No identity beyond value equality.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Source {
    pub title: String,
    pub url: String,
}

/// Full rendering of the answer so far plus any resolved citations, sent as one edit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundSnapshot {
    pub reply_message_id: String,
    pub text: String,
    pub sources: Vec<Source>,
}
