//! Inbound webhook events: verification and dispatch.

mod dispatcher;
mod types;
mod verifier;

pub use dispatcher::{EventDispatcher, EventHandler, HandlerError};
pub use types::{ChallengeResponse, EventEnvelope, InboundEvent};
pub use verifier::{decrypt_payload, signature, EventVerifier, Verified, VerifyError};
