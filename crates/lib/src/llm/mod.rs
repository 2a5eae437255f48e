//! Language-model backend (OpenAI chat completions and embeddings).

mod openai;

pub use openai::{ChatMessage, ChatStream, LlmError, OpenAiClient};
