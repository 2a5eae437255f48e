//! OpenAI API client: streaming chat completions (SSE) and embeddings.

use futures_util::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::pin::Pin;
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Bound on embeddings and on waiting for the chat stream's response headers.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
/// Longest silence tolerated between two chunks of a chat stream.
const STREAM_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("openai request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("openai api error: {0}")]
    Api(String),
    #[error("openai {0} timed out")]
    Timeout(&'static str),
}

/// Client for the OpenAI HTTP API.
#[derive(Clone)]
pub struct OpenAiClient {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: Option<StreamDelta>,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingObject>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingObject {
    embedding: Vec<f32>,
}

impl OpenAiClient {
    pub fn new(api_key: String, base_url: Option<String>) -> Result<Self, LlmError> {
        let base_url = base_url
            .map(|u| u.trim_end_matches('/').to_string())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        // No whole-request timeout here: it would cut long streams. Streams are
        // bounded per chunk instead, see `ChatStream`.
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()?;
        Ok(Self {
            base_url,
            api_key,
            client,
        })
    }

    /// POST /chat/completions with stream: true. Returns once the response headers arrive;
    /// content deltas are then pulled from the returned [`ChatStream`].
    pub async fn chat_stream(
        &self,
        model: &str,
        messages: &[ChatMessage],
        temperature: f32,
    ) -> Result<ChatStream, LlmError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = ChatRequest {
            model,
            messages,
            temperature,
            stream: true,
        };
        let send = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send();
        let res = tokio::time::timeout(REQUEST_TIMEOUT, send)
            .await
            .map_err(|_| LlmError::Timeout("chat request"))??;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(LlmError::Api(format!("{} {}", status, body)));
        }
        let bytes = res.bytes_stream().map(|r| r.map(|b| b.to_vec()));
        Ok(ChatStream::new(Box::pin(bytes), STREAM_IDLE_TIMEOUT))
    }

    /// POST /embeddings — embedding vector for one input.
    pub async fn embed(&self, model: &str, input: &str) -> Result<Vec<f32>, LlmError> {
        let url = format!("{}/embeddings", self.base_url);
        let res = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .timeout(REQUEST_TIMEOUT)
            .json(&EmbeddingRequest { model, input })
            .send()
            .await?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(LlmError::Api(format!("{} {}", status, body)));
        }
        let data: EmbeddingResponse = res.json().await?;
        data.data
            .into_iter()
            .next()
            .map(|o| o.embedding)
            .ok_or_else(|| LlmError::Api("empty embedding response".to_string()))
    }
}

type ByteStream = Pin<Box<dyn Stream<Item = reqwest::Result<Vec<u8>>> + Send>>;

/// Content deltas of a streaming chat completion.
pub struct ChatStream {
    inner: ByteStream,
    idle_timeout: Duration,
    decoder: SseDecoder,
    pending: VecDeque<String>,
    finished: bool,
}

impl ChatStream {
    fn new(inner: ByteStream, idle_timeout: Duration) -> Self {
        Self {
            inner,
            idle_timeout,
            decoder: SseDecoder::default(),
            pending: VecDeque::new(),
            finished: false,
        }
    }

    /// Next non-empty content delta; None once the server sends `[DONE]` or closes the stream.
    pub async fn next_delta(&mut self) -> Option<Result<String, LlmError>> {
        loop {
            if let Some(delta) = self.pending.pop_front() {
                return Some(Ok(delta));
            }
            if self.finished {
                return None;
            }
            let Ok(next) = tokio::time::timeout(self.idle_timeout, self.inner.next()).await else {
                self.finished = true;
                return Some(Err(LlmError::Timeout("chat stream")));
            };
            match next {
                Some(Ok(chunk)) => {
                    for event in self.decoder.push(&chunk) {
                        match event {
                            SseEvent::Done => self.finished = true,
                            SseEvent::Delta(d) => {
                                if !self.finished {
                                    self.pending.push_back(d);
                                }
                            }
                        }
                    }
                }
                Some(Err(e)) => {
                    self.finished = true;
                    return Some(Err(LlmError::Request(e)));
                }
                None => self.finished = true,
            }
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum SseEvent {
    Delta(String),
    Done,
}

/// Incremental decoder for `data: {...}` server-sent events separated by blank lines.
#[derive(Default)]
struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(chunk);
        let mut out = Vec::new();
        while let Some(pos) = self.buffer.windows(2).position(|w| w == b"\n\n") {
            let block: Vec<u8> = self.buffer.drain(..pos).collect();
            self.buffer.drain(..2);
            let block = String::from_utf8_lossy(&block);
            for line in block.lines() {
                let Some(data) = line.trim().strip_prefix("data:") else {
                    continue;
                };
                let data = data.trim();
                if data == "[DONE]" {
                    out.push(SseEvent::Done);
                    continue;
                }
                let Ok(chunk) = serde_json::from_str::<StreamChunk>(data) else {
                    log::debug!("openai: skipping undecodable stream chunk");
                    continue;
                };
                let content = chunk
                    .choices
                    .into_iter()
                    .next()
                    .and_then(|c| c.delta)
                    .and_then(|d| d.content)
                    .filter(|c| !c.is_empty());
                if let Some(c) = content {
                    out.push(SseEvent::Delta(c));
                }
            }
        }
        out
    }
}
