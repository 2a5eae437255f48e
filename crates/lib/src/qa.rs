//! Retrieval-augmented question answering.
//!
//! [`AnswerSource::start`] retrieves context, opens the model stream and returns two
//! independent receivers: answer tokens, and the citation list which resolves only
//! after the token stream has closed. Dropping the token receiver cancels the model
//! stream.

use crate::channels::Source;
use crate::llm::{ChatMessage, LlmError, OpenAiClient};
use crate::retrieval::{collect_sources, RetrievalError, Retriever};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

const TOKEN_BUFFER: usize = 256;

pub const DEFAULT_PROMPT_TEMPLATE: &str = "You are an assistant to the IT administrators. Use the following documents to answer the question at the end. If you don't know the answer, say that you don't know; do not make up an answer.

{context}

Q: {question}
A: ";

/// Upstream failures (model or vector store).
#[derive(Debug, thiserror::Error)]
pub enum QaError {
    #[error("retrieval unavailable: {0}")]
    Retrieval(#[from] RetrievalError),
    #[error("model unavailable: {0}")]
    Model(#[from] LlmError),
}

/// Live answer for one question.
pub struct AnswerStream {
    /// Answer tokens in order. Closes when generation ends; an `Err` item is terminal.
    pub tokens: mpsc::Receiver<Result<String, QaError>>,
    /// Sources backing the answer; sent after `tokens` closes. Dropped on failure.
    pub citations: oneshot::Receiver<Vec<Source>>,
}

#[async_trait]
pub trait AnswerSource: Send + Sync {
    /// Start answering `question`. Errors here happen before any token is produced.
    async fn start(&self, question: &str) -> Result<AnswerStream, QaError>;
}

#[derive(Debug, Clone)]
pub struct QaSettings {
    pub model: String,
    pub temperature: f32,
    /// Number of chunks retrieved as context.
    pub match_count: usize,
    /// Prompt with `{context}` and `{question}` placeholders.
    pub prompt_template: String,
}

/// Retriever + streaming chat model.
pub struct RetrievalQa {
    llm: OpenAiClient,
    retriever: Arc<dyn Retriever>,
    settings: QaSettings,
}

impl RetrievalQa {
    pub fn new(llm: OpenAiClient, retriever: Arc<dyn Retriever>, settings: QaSettings) -> Self {
        Self {
            llm,
            retriever,
            settings,
        }
    }
}

#[async_trait]
impl AnswerSource for RetrievalQa {
    async fn start(&self, question: &str) -> Result<AnswerStream, QaError> {
        let docs = self
            .retriever
            .retrieve(question, self.settings.match_count)
            .await?;
        let context = docs
            .iter()
            .map(|d| d.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");
        let prompt = render_prompt(&self.settings.prompt_template, &context, question);
        let messages = [ChatMessage::user(prompt)];
        let mut chat = self
            .llm
            .chat_stream(&self.settings.model, &messages, self.settings.temperature)
            .await?;
        let sources = collect_sources(&docs);

        let (token_tx, tokens) = mpsc::channel(TOKEN_BUFFER);
        let (citation_tx, citations) = oneshot::channel();
        tokio::spawn(async move {
            while let Some(delta) = chat.next_delta().await {
                let failed = delta.is_err();
                if token_tx.send(delta.map_err(QaError::from)).await.is_err() {
                    log::debug!("qa: answer consumer gone, cancelling model stream");
                    return;
                }
                if failed {
                    return;
                }
            }
            drop(token_tx);
            let _ = citation_tx.send(sources);
        });
        Ok(AnswerStream { tokens, citations })
    }
}

/// Substitute `{context}` and `{question}` in one pass, so neither value is re-scanned.
pub fn render_prompt(template: &str, context: &str, question: &str) -> String {
    let mut out = String::with_capacity(template.len() + context.len() + question.len());
    let mut rest = template;
    while let Some(i) = rest.find('{') {
        out.push_str(&rest[..i]);
        let tail = &rest[i..];
        if let Some(after) = tail.strip_prefix("{context}") {
            out.push_str(context);
            rest = after;
        } else if let Some(after) = tail.strip_prefix("{question}") {
            out.push_str(question);
            rest = after;
        } else {
            out.push('{');
            rest = &tail[1..];
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_substitutes_both_placeholders() {
        let p = render_prompt("ctx={context}; q={question}", "docs", "why?");
        assert_eq!(p, "ctx=docs; q=why?");
    }

    #[test]
    fn prompt_values_are_not_rescanned() {
        let p = render_prompt("{context}|{question}", "{question}", "{context}");
        assert_eq!(p, "{question}|{context}");
    }

    #[test]
    fn prompt_keeps_unknown_braces() {
        assert_eq!(render_prompt("{x} {question}", "", "q"), "{x} q");
    }

    #[test]
    fn default_template_has_placeholders() {
        assert!(DEFAULT_PROMPT_TEMPLATE.contains("{context}"));
        assert!(DEFAULT_PROMPT_TEMPLATE.contains("{question}"));
    }
}
