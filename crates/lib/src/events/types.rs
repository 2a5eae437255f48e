//! Inbound webhook event, challenge response and decoded envelope.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One webhook delivery as received over HTTP. Consumed once by the verifier.
#[derive(Debug, Clone)]
pub struct InboundEvent {
    /// Outer `type` field (`url_verification`, `event_callback`); empty when the body is encrypted or uses schema 2.0.
    pub event_type: String,
    /// True when the body is an `{"encrypt": ...}` envelope.
    pub encrypted: bool,
    /// Header names are lowercased.
    pub headers: HashMap<String, String>,
    pub raw_body: Vec<u8>,
}

impl InboundEvent {
    pub fn new(headers: HashMap<String, String>, raw_body: Vec<u8>) -> Self {
        let outer: serde_json::Value =
            serde_json::from_slice(&raw_body).unwrap_or(serde_json::Value::Null);
        let encrypted = outer.get("encrypt").is_some_and(|v| v.is_string());
        let event_type = outer
            .get("type")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string();
        Self {
            event_type,
            encrypted,
            headers: headers
                .into_iter()
                .map(|(k, v)| (k.to_ascii_lowercase(), v))
                .collect(),
            raw_body,
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(|s| s.as_str())
    }
}

/// Echo returned to the platform during URL verification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChallengeResponse {
    pub challenge: String,
}

/// Verified, decoded event handed to the dispatcher.
#[derive(Debug, Clone)]
pub struct EventEnvelope {
    /// Platform event id (used for logging; retried deliveries repeat it).
    pub event_id: Option<String>,
    /// Event type, e.g. `im.message.receive_v1`.
    pub event_type: String,
    /// The `event` object of the payload.
    pub payload: serde_json::Value,
}
