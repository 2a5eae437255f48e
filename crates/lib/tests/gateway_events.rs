//! Integration test: serve the webhook router on a free port and drive it over HTTP.
//! Uses a recording handler instead of Lark/OpenAI, so no network access is needed.

use async_trait::async_trait;
use lark_qa::events::{EventDispatcher, EventEnvelope, EventHandler, EventVerifier, HandlerError};
use lark_qa::gateway::{self, AppState};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const TOKEN: &str = "verification-token";

#[derive(Default)]
struct Recording {
    seen: Mutex<Vec<String>>,
}

#[async_trait]
impl EventHandler for Recording {
    async fn handle(&self, envelope: EventEnvelope) -> Result<(), HandlerError> {
        self.seen.lock().unwrap().push(envelope.event_type);
        Ok(())
    }
}

async fn start() -> (String, Arc<Recording>) {
    let recording = Arc::new(Recording::default());
    let mut dispatcher = EventDispatcher::new();
    dispatcher.register("im.message.receive_v1", recording.clone());
    let state = AppState {
        verifier: Arc::new(EventVerifier::new(TOKEN.to_string(), None)),
        dispatcher: Arc::new(dispatcher),
    };
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind free port");
    let addr = listener.local_addr().expect("local_addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, gateway::router(state)).await;
    });
    (format!("http://{}", addr), recording)
}

fn message_event(token: &str) -> serde_json::Value {
    serde_json::json!({
        "schema": "2.0",
        "header": {
            "event_id": "ev-1",
            "event_type": "im.message.receive_v1",
            "token": token,
        },
        "event": {
            "message": {
                "message_id": "om_1",
                "message_type": "text",
                "content": "{\"text\":\"hello\"}",
            }
        }
    })
}

async fn wait_for_calls(recording: &Recording, n: usize) -> usize {
    for _ in 0..100 {
        let len = recording.seen.lock().unwrap().len();
        if len >= n {
            return len;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    recording.seen.lock().unwrap().len()
}

#[tokio::test]
async fn root_returns_greeting() {
    let (base, _) = start().await;
    let res = reqwest::get(format!("{}/", base)).await.expect("GET /");
    assert!(res.status().is_success());
    assert_eq!(res.text().await.unwrap(), gateway::GREETING);
}

#[tokio::test]
async fn challenge_is_echoed_as_json() {
    let (base, recording) = start().await;
    let res = reqwest::Client::new()
        .post(format!("{}/events", base))
        .json(&serde_json::json!({
            "challenge": "abc-123",
            "token": TOKEN,
            "type": "url_verification",
        }))
        .send()
        .await
        .expect("POST /events");
    assert_eq!(res.status(), reqwest::StatusCode::OK);
    let content_type = res
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();
    assert!(content_type.starts_with("application/json"));
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body, serde_json::json!({ "challenge": "abc-123" }));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(recording.seen.lock().unwrap().is_empty());
}

#[tokio::test]
async fn bad_token_is_acknowledged_but_not_dispatched() {
    let (base, recording) = start().await;
    let res = reqwest::Client::new()
        .post(format!("{}/events", base))
        .json(&message_event("forged"))
        .send()
        .await
        .expect("POST /events");
    assert_eq!(res.status(), reqwest::StatusCode::OK);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body, serde_json::json!({}));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(recording.seen.lock().unwrap().is_empty());
}

#[tokio::test]
async fn garbage_body_is_acknowledged() {
    let (base, recording) = start().await;
    let res = reqwest::Client::new()
        .post(format!("{}/events", base))
        .body("not json")
        .send()
        .await
        .expect("POST /events");
    assert_eq!(res.status(), reqwest::StatusCode::OK);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(recording.seen.lock().unwrap().is_empty());
}

#[tokio::test]
async fn valid_event_is_dispatched_once() {
    let (base, recording) = start().await;
    let res = reqwest::Client::new()
        .post(format!("{}/events", base))
        .json(&message_event(TOKEN))
        .send()
        .await
        .expect("POST /events");
    assert_eq!(res.status(), reqwest::StatusCode::OK);
    assert_eq!(wait_for_calls(&recording, 1).await, 1);
    assert_eq!(
        *recording.seen.lock().unwrap(),
        vec!["im.message.receive_v1".to_string()]
    );
}
