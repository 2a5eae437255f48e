//! Event dispatcher: one handler per event type, run fire-and-forget.

use crate::channels::SinkError;
use crate::events::types::EventEnvelope;
use crate::qa::QaError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinHandle;

#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("unsupported content: {0}")]
    UnsupportedContent(String),
    #[error("malformed event: {0}")]
    Malformed(String),
    #[error(transparent)]
    Qa(#[from] QaError),
    #[error(transparent)]
    Sink(#[from] SinkError),
}

/// Handles one verified event. Runs in its own task; errors end in the log.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, envelope: EventEnvelope) -> Result<(), HandlerError>;
}

/// Registry of event type to handler. Built at startup, shared read-only afterwards.
#[derive(Default)]
pub struct EventDispatcher {
    handlers: HashMap<String, Arc<dyn EventHandler>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Associate `handler` with `event_type`. A second registration for the same type replaces the first.
    pub fn register(&mut self, event_type: impl Into<String>, handler: Arc<dyn EventHandler>) {
        let event_type = event_type.into();
        if self.handlers.insert(event_type.clone(), handler).is_some() {
            log::debug!("dispatcher: handler for {} replaced", event_type);
        }
    }

    /// Spawn the handler for `envelope.event_type` and return without waiting for it.
    /// Unknown event types are ignored (returns None).
    pub fn invoke(&self, envelope: EventEnvelope) -> Option<JoinHandle<()>> {
        let Some(handler) = self.handlers.get(&envelope.event_type).cloned() else {
            log::debug!("dispatcher: no handler for {}", envelope.event_type);
            return None;
        };
        Some(tokio::spawn(async move {
            let event_type = envelope.event_type.clone();
            let event_id = envelope.event_id.clone().unwrap_or_default();
            if let Err(e) = handler.handle(envelope).await {
                log::warn!("handler for {} (event {}) failed: {}", event_type, event_id, e);
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct Counting {
        calls: Arc<AtomicUsize>,
        fail: bool,
    }

    #[async_trait]
    impl EventHandler for Counting {
        async fn handle(&self, _envelope: EventEnvelope) -> Result<(), HandlerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(HandlerError::Malformed("boom".to_string()));
            }
            Ok(())
        }
    }

    struct Slow;

    #[async_trait]
    impl EventHandler for Slow {
        async fn handle(&self, _envelope: EventEnvelope) -> Result<(), HandlerError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        }
    }

    fn envelope(event_type: &str) -> EventEnvelope {
        EventEnvelope {
            event_id: Some("ev".to_string()),
            event_type: event_type.to_string(),
            payload: serde_json::json!({}),
        }
    }

    fn counting(fail: bool) -> (Arc<AtomicUsize>, Arc<dyn EventHandler>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let handler = Arc::new(Counting {
            calls: calls.clone(),
            fail,
        });
        (calls, handler)
    }

    #[tokio::test]
    async fn unknown_type_is_a_no_op() {
        let (calls, handler) = counting(false);
        let mut d = EventDispatcher::new();
        d.register("a", handler);
        assert!(d.invoke(envelope("b")).is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn last_registration_wins() {
        let (first, h1) = counting(false);
        let (second, h2) = counting(false);
        let mut d = EventDispatcher::new();
        d.register("a", h1);
        d.register("a", h2);
        d.invoke(envelope("a")).unwrap().await.unwrap();
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn handler_error_is_contained() {
        let (calls, handler) = counting(true);
        let mut d = EventDispatcher::new();
        d.register("a", handler);
        let task = d.invoke(envelope("a")).unwrap();
        assert!(task.await.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn invoke_does_not_wait_for_handler() {
        let mut d = EventDispatcher::new();
        d.register("slow", Arc::new(Slow));
        let task = d.invoke(envelope("slow")).unwrap();
        assert!(!task.is_finished());
        task.abort();
    }
}
