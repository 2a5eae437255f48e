//! Answer stream aggregator: turns a token stream plus a late citation list into an
//! ordered, throttled sequence of message edits for one turn.
//!
//! Everything for a turn runs in one task: the token receiver, the throttle ticker and
//! the sink calls are driven from a single `select!` loop, and every sink call is
//! awaited before the next event is taken. At most one edit is in flight per turn, so
//! edits reach the platform in send order and the visible text never shrinks.
//!
//! Emission policy is a fixed-cadence throttle: every `window`, if the text grew since
//! the last emission, the latest snapshot is sent. Token arrival never resets the
//! ticker, so a continuous stream still produces an edit per window. Stream completion
//! always forces a final emission, and resolved citations add exactly one more.

use crate::channels::{ConversationTurn, MessageSink, OutboundSnapshot, SinkError, Source};
use crate::qa::{AnswerStream, QaError};
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};

pub const DEFAULT_WINDOW: Duration = Duration::from_millis(400);
pub const DEFAULT_CITATION_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_SINK_TIMEOUT: Duration = Duration::from_secs(15);
/// Final text for a turn whose answer stream produced nothing.
pub const NO_ANSWER_TEXT: &str = "Sorry, no answer could be produced for this question.";

/// Timing for one turn's emissions.
#[derive(Debug, Clone)]
pub struct StreamPolicy {
    /// Coalescing window; at most one intermediate edit per window.
    pub window: Duration,
    /// How long to wait for citations after the token stream completes.
    pub citation_timeout: Duration,
    /// Upper bound on a single sink call; a stalled call counts as failed.
    pub sink_timeout: Duration,
}

impl Default for StreamPolicy {
    fn default() -> Self {
        Self {
            window: DEFAULT_WINDOW,
            citation_timeout: DEFAULT_CITATION_TIMEOUT,
            sink_timeout: DEFAULT_SINK_TIMEOUT,
        }
    }
}

/// Answer accumulated for one turn. `text` only grows; `sources` is set once, after `complete`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnswerState {
    pub text: String,
    pub sources: Vec<Source>,
    pub complete: bool,
}

impl AnswerState {
    fn push_token(&mut self, token: &str) {
        self.text.push_str(token);
    }

    fn no_answer() -> Self {
        Self {
            text: NO_ANSWER_TEXT.to_string(),
            sources: Vec::new(),
            complete: true,
        }
    }

    fn snapshot(&self, reply_message_id: &str) -> OutboundSnapshot {
        OutboundSnapshot {
            reply_message_id: reply_message_id.to_string(),
            text: self.text.clone(),
            sources: self.sources.clone(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TurnError {
    #[error("could not create reply: {0}")]
    CreateReply(SinkError),
    #[error("answer stream failed: {0}")]
    Upstream(QaError),
}

/// Sequential writer for one reply anchor.
struct Emitter<'a> {
    sink: &'a dyn MessageSink,
    reply_message_id: String,
    call_timeout: Duration,
    /// Text length of the last emission attempt.
    emitted_len: usize,
}

impl Emitter<'_> {
    async fn emit(&mut self, state: &AnswerState) -> Result<(), SinkError> {
        self.emitted_len = state.text.len();
        let snapshot = state.snapshot(&self.reply_message_id);
        bounded(
            self.call_timeout,
            self.sink.edit_message(&self.reply_message_id, &snapshot),
        )
        .await
    }

    /// Intermediate frame: emitted only when the text grew; failures are dropped.
    async fn emit_progress(&mut self, state: &AnswerState) {
        if state.text.len() <= self.emitted_len {
            return;
        }
        if let Err(e) = self.emit(state).await {
            log::debug!(
                "aggregator: dropped intermediate edit for {}: {}",
                self.reply_message_id,
                e
            );
        }
    }

    /// Frames that must land: one retry, then give up with a log line.
    async fn emit_required(&mut self, state: &AnswerState) {
        if let Err(first) = self.emit(state).await {
            log::debug!(
                "aggregator: edit for {} failed, retrying once: {}",
                self.reply_message_id,
                first
            );
            if let Err(e) = self.emit(state).await {
                log::warn!(
                    "aggregator: giving up on edit for {}: {}",
                    self.reply_message_id,
                    e
                );
            }
        }
    }
}

async fn bounded<T>(
    limit: Duration,
    call: impl std::future::Future<Output = Result<T, SinkError>>,
) -> Result<T, SinkError> {
    tokio::time::timeout(limit, call)
        .await
        .unwrap_or(Err(SinkError::Timeout(limit)))
}

/// Deliver `stream` as a live reply to `turn`.
///
/// Creates the reply exactly once, then applies the throttle until the token stream
/// ends. On success the returned state holds the full text and the resolved sources.
pub async fn run_turn(
    sink: &dyn MessageSink,
    turn: &ConversationTurn,
    stream: AnswerStream,
    policy: &StreamPolicy,
) -> Result<AnswerState, TurnError> {
    let AnswerStream {
        mut tokens,
        citations,
    } = stream;

    // Dropping `tokens` on this early return cancels the model stream.
    let reply_message_id = bounded(policy.sink_timeout, sink.create_reply(turn))
        .await
        .map_err(TurnError::CreateReply)?;
    log::info!(
        "turn {}: reply {} created, streaming answer",
        turn.message_id,
        reply_message_id
    );

    let mut state = AnswerState::default();
    let mut emitter = Emitter {
        sink,
        reply_message_id,
        call_timeout: policy.sink_timeout,
        emitted_len: 0,
    };
    let window = policy.window.max(Duration::from_millis(1));
    let mut ticker = tokio::time::interval_at(Instant::now() + window, window);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut failure = None;
    loop {
        tokio::select! {
            biased;

            _ = ticker.tick() => emitter.emit_progress(&state).await,
            token = tokens.recv() => match token {
                Some(Ok(t)) => state.push_token(&t),
                Some(Err(e)) => {
                    failure = Some(e);
                    break;
                }
                None => break,
            },
        }
    }
    drop(tokens);

    state.complete = true;
    if state.text.is_empty() {
        // The card never shows an empty answer.
        emitter.emit_required(&AnswerState::no_answer()).await;
    } else {
        emitter.emit_required(&state).await;
    }

    if let Some(e) = failure {
        log::warn!("turn {}: answer stream failed: {}", turn.message_id, e);
        return Err(TurnError::Upstream(e));
    }
    if state.text.is_empty() {
        log::warn!("turn {}: answer stream produced no text", turn.message_id);
        return Ok(state);
    }

    match tokio::time::timeout(policy.citation_timeout, citations).await {
        Ok(Ok(sources)) => {
            state.sources = sources;
            emitter.emit_required(&state).await;
        }
        Ok(Err(_)) => log::debug!("turn {}: citation resolver dropped", turn.message_id),
        Err(_) => log::warn!("turn {}: citations timed out", turn.message_id),
    }
    log::info!(
        "turn {}: answer delivered ({} chars, {} source(s))",
        turn.message_id,
        state.text.len(),
        state.sources.len()
    );
    Ok(state)
}
