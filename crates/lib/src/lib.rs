//! Lark knowledge-base QA bridge: verifies webhook events, answers questions with a
//! retrieval-augmented model and streams the answer back as edited reply cards.

pub mod aggregator;
pub mod channels;
pub mod config;
pub mod events;
pub mod gateway;
pub mod handlers;
pub mod llm;
pub mod qa;
pub mod retrieval;
