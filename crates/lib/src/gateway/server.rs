//! Webhook HTTP server: `POST /events` and a greeting on `GET /`.
//!
//! `/events` always answers 200: `{"challenge": ...}` for URL verification, `{}` for
//! everything else, including events that fail verification. Verified events are
//! handed to the dispatcher, which runs the handler in its own task.

use crate::aggregator::StreamPolicy;
use crate::channels::{LarkClient, MessageSink};
use crate::config::{Config, Credentials};
use crate::events::{EventDispatcher, EventVerifier, InboundEvent, Verified, VerifyError};
use crate::handlers::{MessageHandler, MESSAGE_RECEIVE_EVENT};
use crate::llm::OpenAiClient;
use crate::qa::{AnswerSource, RetrievalQa};
use crate::retrieval::SupabaseRetriever;
use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::State,
    http::HeaderMap,
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;

pub const GREETING: &str = "Hello from lark-qa!";

/// Shared state for the HTTP layer. Services are constructed once and injected.
#[derive(Clone)]
pub struct AppState {
    pub verifier: Arc<EventVerifier>,
    pub dispatcher: Arc<EventDispatcher>,
}

/// Services a running gateway answers with.
pub struct Services {
    pub sink: Arc<dyn MessageSink>,
    pub qa: Arc<dyn AnswerSource>,
}

impl Services {
    /// Production wiring: Lark client as sink, Supabase retrieval + OpenAI streaming as QA.
    pub fn from_config(config: &Config, credentials: &Credentials) -> Result<Self> {
        let lark = LarkClient::new(
            credentials.app_id.clone(),
            credentials.app_secret.clone(),
            config.lark.base_url.clone(),
            config.lark.request_timeout(),
        )
        .context("building lark client")?;
        let openai = OpenAiClient::new(
            credentials.openai_api_key.clone(),
            config.qa.openai_base_url.clone(),
        )
        .context("building openai client")?;
        let retriever = SupabaseRetriever::new(
            credentials.supabase_url.clone(),
            credentials.supabase_private_key.clone(),
            config.qa.query_name.clone(),
            config.qa.embedding_model.clone(),
            openai.clone(),
        )
        .context("building supabase client")?;
        let qa = RetrievalQa::new(openai, Arc::new(retriever), config.qa.settings());
        Ok(Self {
            sink: Arc::new(lark),
            qa: Arc::new(qa),
        })
    }
}

/// Build the dispatcher with the message handler registered.
pub fn build_dispatcher(services: &Services, policy: StreamPolicy) -> EventDispatcher {
    let mut dispatcher = EventDispatcher::new();
    dispatcher.register(
        MESSAGE_RECEIVE_EVENT,
        Arc::new(MessageHandler::new(
            services.sink.clone(),
            services.qa.clone(),
            policy,
        )),
    );
    dispatcher
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(health_http))
        .route("/events", post(events_webhook))
        .with_state(state)
}

/// Run the gateway; binds to config.gateway.bind:config.gateway.port and blocks until shutdown (e.g. Ctrl+C).
pub async fn run_gateway(config: Config, credentials: Credentials) -> Result<()> {
    let services = Services::from_config(&config, &credentials)?;
    let dispatcher = build_dispatcher(&services, config.stream.policy());
    let state = AppState {
        verifier: Arc::new(EventVerifier::new(
            credentials.verification_token.clone(),
            Some(credentials.encrypt_key.clone()),
        )),
        dispatcher: Arc::new(dispatcher),
    };
    log::info!(
        "answering from knowledge space {} with model {}",
        credentials.space_id,
        config.qa.model
    );

    let bind_addr = format!("{}:{}", config.gateway.bind.trim(), config.gateway.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("binding to {}", bind_addr))?;
    log::info!("gateway listening on {}", bind_addr);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("gateway server exited")?;
    log::info!("gateway stopped");
    Ok(())
}

/// Future that completes on SIGINT or SIGTERM. In-flight turns are not awaited.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::warn!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => {
                log::warn!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    log::info!("shutdown signal received");
}

fn header_map(headers: &HeaderMap) -> HashMap<String, String> {
    headers
        .iter()
        .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.as_str().to_string(), v.to_string())))
        .collect()
}

/// POST /events — verify, answer challenges, dispatch events. Always 200.
async fn events_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Json<serde_json::Value> {
    let event = InboundEvent::new(header_map(&headers), body.to_vec());
    match state.verifier.verify(&event) {
        Ok(Verified::Challenge(c)) => {
            log::info!("answering url verification challenge");
            Json(json!(c))
        }
        Ok(Verified::Event(envelope)) => {
            log::debug!(
                "event {} ({})",
                envelope.event_type,
                envelope.event_id.as_deref().unwrap_or("-")
            );
            state.dispatcher.invoke(envelope);
            Json(json!({}))
        }
        Err(e @ VerifyError::Authentication(_)) => {
            log::warn!("dropping {} event: {}", delivery_kind(&event), e);
            Json(json!({}))
        }
        Err(e) => {
            log::warn!("dropping undecodable {} event: {}", delivery_kind(&event), e);
            Json(json!({}))
        }
    }
}

fn delivery_kind(event: &InboundEvent) -> &str {
    match event.event_type.as_str() {
        "" if event.encrypted => "encrypted",
        "" => "untyped",
        t => t,
    }
}

/// GET / — fixed greeting (for health checks).
async fn health_http() -> &'static str {
    GREETING
}
