//! Lark (Feishu) Open API client: tenant token, message reply and message patch.

use crate::channels::card::{render_card, text_content};
use crate::channels::sink::{MessageSink, SinkError};
use crate::channels::turn::{ConversationTurn, OutboundSnapshot};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

const DEFAULT_BASE_URL: &str = "https://open.feishu.cn";
/// Lark error code for "request trigger frequency limit".
const RATE_LIMIT_CODE: i64 = 99991400;
/// Refresh the tenant token this long before Lark says it expires.
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(60);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Shown in the reply until the first answer snapshot replaces it.
const PENDING_PLACEHOLDER: &str = "…";

#[derive(Debug, thiserror::Error)]
pub enum LarkError {
    #[error("lark request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("lark rate limited: {0}")]
    RateLimited(String),
    #[error("lark api error {code}: {msg}")]
    Api { code: i64, msg: String },
}

impl From<LarkError> for SinkError {
    fn from(e: LarkError) -> Self {
        match e {
            LarkError::Request(e) => SinkError::Request(e.to_string()),
            LarkError::RateLimited(m) => SinkError::RateLimited(m),
            e @ LarkError::Api { .. } => SinkError::Api(e.to_string()),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TenantTokenResponse {
    code: i64,
    #[serde(default)]
    msg: String,
    #[serde(default)]
    tenant_access_token: Option<String>,
    #[serde(default)]
    expire: u64,
}

/// Common envelope of Lark Open API responses: `{ code, msg, data }`.
#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    code: i64,
    #[serde(default)]
    msg: String,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct MessageData {
    message_id: String,
}

struct CachedToken {
    value: String,
    refresh_at: Instant,
}

/// Client for the Lark Open API, shared by every turn for the life of the process.
#[derive(Clone)]
pub struct LarkClient {
    base_url: String,
    app_id: String,
    app_secret: String,
    client: reqwest::Client,
    token: Arc<Mutex<Option<CachedToken>>>,
}

impl LarkClient {
    /// Every request, including the tenant token fetch, is bounded by `timeout`.
    pub fn new(
        app_id: String,
        app_secret: String,
        base_url: Option<String>,
        timeout: Duration,
    ) -> Result<Self, LarkError> {
        let base_url = base_url
            .map(|u| u.trim_end_matches('/').to_string())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT.min(timeout))
            .timeout(timeout)
            .build()?;
        Ok(Self {
            base_url,
            app_id,
            app_secret,
            client,
            token: Arc::new(Mutex::new(None)),
        })
    }

    /// Tenant access token for API calls; fetched on first use and refreshed before expiry.
    ///
    /// The cache lock is released during the fetch, so a slow token endpoint never
    /// blocks turns that already hold a valid token.
    async fn tenant_token(&self) -> Result<String, LarkError> {
        if let Some(ref t) = *self.token.lock().await {
            if Instant::now() < t.refresh_at {
                return Ok(t.value.clone());
            }
        }
        let url = format!(
            "{}/open-apis/auth/v3/tenant_access_token/internal",
            self.base_url
        );
        let body = serde_json::json!({ "app_id": self.app_id, "app_secret": self.app_secret });
        let res = self.client.post(&url).json(&body).send().await?;
        let data: TenantTokenResponse = res.json().await?;
        let value = match data.tenant_access_token {
            Some(t) if data.code == 0 => t,
            _ => {
                return Err(LarkError::Api {
                    code: data.code,
                    msg: data.msg,
                })
            }
        };
        let ttl = Duration::from_secs(data.expire).saturating_sub(TOKEN_REFRESH_MARGIN);
        log::debug!("lark: tenant token refreshed, valid for {}s", ttl.as_secs());
        *self.token.lock().await = Some(CachedToken {
            value: value.clone(),
            refresh_at: Instant::now() + ttl,
        });
        Ok(value)
    }

    /// POST /open-apis/im/v1/messages/{message_id}/reply — returns the new message id.
    pub async fn reply(
        &self,
        message_id: &str,
        msg_type: &str,
        content: String,
    ) -> Result<String, LarkError> {
        let token = self.tenant_token().await?;
        let url = format!(
            "{}/open-apis/im/v1/messages/{}/reply",
            self.base_url, message_id
        );
        let body = serde_json::json!({ "msg_type": msg_type, "content": content });
        let res = self
            .client
            .post(&url)
            .bearer_auth(token)
            .json(&body)
            .send()
            .await?;
        let data: MessageData = read_api_response(res).await?.ok_or_else(|| LarkError::Api {
            code: 0,
            msg: "reply response carried no message id".to_string(),
        })?;
        Ok(data.message_id)
    }

    /// PATCH /open-apis/im/v1/messages/{message_id} — replace the content of a card message.
    pub async fn patch(&self, message_id: &str, content: String) -> Result<(), LarkError> {
        let token = self.tenant_token().await?;
        let url = format!("{}/open-apis/im/v1/messages/{}", self.base_url, message_id);
        let body = serde_json::json!({ "content": content });
        let res = self
            .client
            .patch(&url)
            .bearer_auth(token)
            .json(&body)
            .send()
            .await?;
        read_api_response::<serde_json::Value>(res).await?;
        Ok(())
    }
}

/// Map HTTP status and the `{code, msg}` envelope to a result.
async fn read_api_response<T: serde::de::DeserializeOwned>(
    res: reqwest::Response,
) -> Result<Option<T>, LarkError> {
    let status = res.status();
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        let body = res.text().await.unwrap_or_default();
        return Err(LarkError::RateLimited(body));
    }
    if !status.is_success() {
        let body = res.text().await.unwrap_or_default();
        return Err(LarkError::Api {
            code: i64::from(status.as_u16()),
            msg: body,
        });
    }
    let data: ApiResponse<T> = res.json().await?;
    match data.code {
        0 => Ok(data.data),
        RATE_LIMIT_CODE => Err(LarkError::RateLimited(data.msg)),
        code => Err(LarkError::Api {
            code,
            msg: data.msg,
        }),
    }
}

#[async_trait]
impl MessageSink for LarkClient {
    async fn create_reply(&self, turn: &ConversationTurn) -> Result<String, SinkError> {
        let card = render_card(PENDING_PLACEHOLDER, &[]);
        Ok(self
            .reply(&turn.message_id, "interactive", card.to_string())
            .await?)
    }

    async fn edit_message(
        &self,
        reply_message_id: &str,
        snapshot: &OutboundSnapshot,
    ) -> Result<(), SinkError> {
        let card = render_card(&snapshot.text, &snapshot.sources);
        Ok(self.patch(reply_message_id, card.to_string()).await?)
    }

    async fn reply_text(&self, message_id: &str, text: &str) -> Result<(), SinkError> {
        self.reply(message_id, "text", text_content(text)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limit_maps_to_sink_rate_limited() {
        let e: SinkError = LarkError::RateLimited("slow down".to_string()).into();
        assert!(matches!(e, SinkError::RateLimited(ref m) if m == "slow down"));
    }

    #[test]
    fn api_error_keeps_code_in_message() {
        let e: SinkError = LarkError::Api {
            code: 230001,
            msg: "invalid message".to_string(),
        }
        .into();
        assert_eq!(e.to_string(), "sink api error: lark api error 230001: invalid message");
    }

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let c = LarkClient::new(
            "app".to_string(),
            "secret".to_string(),
            Some("http://127.0.0.1:9/".to_string()),
            Duration::from_secs(1),
        )
        .unwrap();
        assert_eq!(c.base_url, "http://127.0.0.1:9");
    }

    /// Accepts connections and never answers them.
    async fn silent_server() -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn unresponsive_api_times_out() {
        let c = LarkClient::new(
            "app".to_string(),
            "secret".to_string(),
            Some(silent_server().await),
            Duration::from_millis(200),
        )
        .unwrap();
        let err = tokio::time::timeout(Duration::from_secs(5), c.patch("om_1", "{}".to_string()))
            .await
            .expect("patch did not give up")
            .unwrap_err();
        assert!(matches!(err, LarkError::Request(ref e) if e.is_timeout()), "{}", err);
    }

    #[tokio::test]
    async fn token_cache_is_not_locked_during_fetch() {
        let c = LarkClient::new(
            "app".to_string(),
            "secret".to_string(),
            Some(silent_server().await),
            Duration::from_secs(2),
        )
        .unwrap();
        let fetching = c.clone();
        let fetch = tokio::spawn(async move { fetching.tenant_token().await });
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!fetch.is_finished());
        assert!(c.token.try_lock().is_ok());
        fetch.abort();
    }
}
