//! Webhook verification: URL-verification challenges, payload decryption, token and signature checks.
//!
//! Encrypted bodies are `{"encrypt": "<base64>"}`. The AES-256-CBC key is SHA-256 of the
//! configured encrypt key; the first 16 bytes of the decoded blob are the IV.

use crate::events::types::{ChallengeResponse, EventEnvelope, InboundEvent};
use base64::Engine;
use cbc::cipher::{block_padding::Pkcs7, BlockDecryptMut, KeyIvInit};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

const CHALLENGE_TYPE: &str = "url_verification";
const SIGNATURE_HEADER: &str = "x-lark-signature";
const TIMESTAMP_HEADER: &str = "x-lark-request-timestamp";
const NONCE_HEADER: &str = "x-lark-request-nonce";
const IV_LEN: usize = 16;

#[derive(Debug, thiserror::Error)]
pub enum VerifyError {
    #[error("malformed event payload: {0}")]
    Malformed(String),
    #[error("encrypted event received but no encrypt key is configured")]
    MissingEncryptKey,
    #[error("event decryption failed: {0}")]
    Decrypt(String),
    #[error("event authentication failed: {0}")]
    Authentication(String),
}

/// Outcome of a successful verification.
#[derive(Debug, Clone)]
pub enum Verified {
    /// Liveness challenge; answer with the echo and dispatch nothing.
    Challenge(ChallengeResponse),
    Event(EventEnvelope),
}

/// Verifies inbound webhook deliveries against the app's verification token and encrypt key.
pub struct EventVerifier {
    verification_token: String,
    encrypt_key: Option<String>,
}

impl EventVerifier {
    pub fn new(verification_token: String, encrypt_key: Option<String>) -> Self {
        Self {
            verification_token,
            encrypt_key: encrypt_key.filter(|k| !k.is_empty()),
        }
    }

    pub fn verify(&self, event: &InboundEvent) -> Result<Verified, VerifyError> {
        let outer: serde_json::Value = serde_json::from_slice(&event.raw_body)
            .map_err(|e| VerifyError::Malformed(e.to_string()))?;
        let body: serde_json::Value = if event.encrypted {
            let key = self
                .encrypt_key
                .as_deref()
                .ok_or(VerifyError::MissingEncryptKey)?;
            let blob = outer
                .get("encrypt")
                .and_then(|v| v.as_str())
                .ok_or_else(|| VerifyError::Malformed("encrypt is not a string".to_string()))?;
            let plain = decrypt_payload(key, blob)?;
            serde_json::from_str(&plain).map_err(|e| VerifyError::Malformed(e.to_string()))?
        } else {
            outer
        };

        if body.get("type").and_then(|v| v.as_str()) == Some(CHALLENGE_TYPE) {
            let challenge = body
                .get("challenge")
                .and_then(|v| v.as_str())
                .ok_or_else(|| VerifyError::Malformed("challenge missing".to_string()))?;
            return Ok(Verified::Challenge(ChallengeResponse {
                challenge: challenge.to_string(),
            }));
        }

        self.check_signature(event)?;
        self.check_token(&body)?;
        envelope_from_body(body).map(Verified::Event)
    }

    /// Schema 2.0 carries the token in `header.token`, schema 1.0 at the top level.
    fn check_token(&self, body: &serde_json::Value) -> Result<(), VerifyError> {
        let token = body
            .get("header")
            .and_then(|h| h.get("token"))
            .or_else(|| body.get("token"))
            .and_then(|v| v.as_str())
            .ok_or_else(|| VerifyError::Authentication("verification token missing".to_string()))?;
        if !constant_time_eq(token, &self.verification_token) {
            return Err(VerifyError::Authentication(
                "verification token mismatch".to_string(),
            ));
        }
        Ok(())
    }

    /// Checked only when the platform sent signature headers and an encrypt key is configured.
    fn check_signature(&self, event: &InboundEvent) -> Result<(), VerifyError> {
        let (Some(key), Some(provided)) = (self.encrypt_key.as_deref(), event.header(SIGNATURE_HEADER))
        else {
            return Ok(());
        };
        let timestamp = event.header(TIMESTAMP_HEADER).unwrap_or("");
        let nonce = event.header(NONCE_HEADER).unwrap_or("");
        let expected = signature(timestamp, nonce, key, &event.raw_body);
        if !constant_time_eq(provided, &expected) {
            return Err(VerifyError::Authentication("signature mismatch".to_string()));
        }
        Ok(())
    }
}

fn envelope_from_body(mut body: serde_json::Value) -> Result<EventEnvelope, VerifyError> {
    let payload = body
        .get_mut("event")
        .map(serde_json::Value::take)
        .ok_or_else(|| VerifyError::Malformed("event missing".to_string()))?;
    if let Some(header) = body.get("header") {
        let event_type = header
            .get("event_type")
            .and_then(|v| v.as_str())
            .ok_or_else(|| VerifyError::Malformed("header.event_type missing".to_string()))?;
        return Ok(EventEnvelope {
            event_id: header
                .get("event_id")
                .and_then(|v| v.as_str())
                .map(str::to_string),
            event_type: event_type.to_string(),
            payload,
        });
    }
    let event_type = payload
        .get("type")
        .and_then(|v| v.as_str())
        .ok_or_else(|| VerifyError::Malformed("event.type missing".to_string()))?
        .to_string();
    Ok(EventEnvelope {
        event_id: body.get("uuid").and_then(|v| v.as_str()).map(str::to_string),
        event_type,
        payload,
    })
}

/// Decrypt an `encrypt` field into the plaintext JSON string.
pub fn decrypt_payload(encrypt_key: &str, encrypted: &str) -> Result<String, VerifyError> {
    let raw = base64::engine::general_purpose::STANDARD
        .decode(encrypted.trim())
        .map_err(|e| VerifyError::Decrypt(format!("invalid base64: {}", e)))?;
    if raw.len() <= IV_LEN {
        return Err(VerifyError::Decrypt("ciphertext too short".to_string()));
    }
    let (iv, ciphertext) = raw.split_at(IV_LEN);
    let key = Sha256::digest(encrypt_key.as_bytes());
    let cipher = Aes256CbcDec::new_from_slices(key.as_slice(), iv)
        .map_err(|e| VerifyError::Decrypt(e.to_string()))?;
    let mut buf = ciphertext.to_vec();
    let plain = cipher
        .decrypt_padded_mut::<Pkcs7>(&mut buf)
        .map_err(|_| VerifyError::Decrypt("bad padding (wrong encrypt key?)".to_string()))?;
    String::from_utf8(plain.to_vec()).map_err(|e| VerifyError::Decrypt(e.to_string()))
}

/// Lowercase hex SHA-256 of `timestamp + nonce + encrypt_key + body`.
pub fn signature(timestamp: &str, nonce: &str, encrypt_key: &str, body: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(timestamp.as_bytes());
    hasher.update(nonce.as_bytes());
    hasher.update(encrypt_key.as_bytes());
    hasher.update(body);
    hex::encode(hasher.finalize())
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}
