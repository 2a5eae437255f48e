//! Configuration types and loading.
//!
//! Tunables are loaded from a JSON file (e.g. `~/.lark-qa/config.json`); a missing file
//! means defaults. Credentials come from the environment only and are all required.

use crate::aggregator::StreamPolicy;
use crate::qa::{QaSettings, DEFAULT_PROMPT_TEMPLATE};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

const MIN_WINDOW_MS: u64 = 50;
const MAX_WINDOW_MS: u64 = 5000;

/// Top-level application config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// HTTP server settings.
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Answer streaming (throttle window, citation wait).
    #[serde(default)]
    pub stream: StreamConfig,

    /// Model and retrieval settings.
    #[serde(default)]
    pub qa: QaConfig,

    /// Lark Open API settings.
    #[serde(default)]
    pub lark: LarkConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayConfig {
    /// Port for the webhook endpoint (default 3000).
    #[serde(default = "default_gateway_port")]
    pub port: u16,

    /// Bind address (default "0.0.0.0"; the platform must be able to reach the webhook).
    #[serde(default = "default_gateway_bind")]
    pub bind: String,
}

fn default_gateway_port() -> u16 {
    3000
}

fn default_gateway_bind() -> String {
    "0.0.0.0".to_string()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_gateway_port(),
            bind: default_gateway_bind(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamConfig {
    /// Coalescing window in milliseconds, clamped to 50..=5000 (default 400).
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,

    /// Seconds to wait for citations after the answer completes (default 30).
    #[serde(default = "default_citation_timeout_secs")]
    pub citation_timeout_secs: u64,

    /// Seconds a single Lark create/edit call may take before it counts as failed (default 15).
    #[serde(default = "default_sink_timeout_secs")]
    pub sink_timeout_secs: u64,
}

fn default_window_ms() -> u64 {
    400
}

fn default_sink_timeout_secs() -> u64 {
    15
}

fn default_citation_timeout_secs() -> u64 {
    30
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            window_ms: default_window_ms(),
            citation_timeout_secs: default_citation_timeout_secs(),
            sink_timeout_secs: default_sink_timeout_secs(),
        }
    }
}

impl StreamConfig {
    pub fn policy(&self) -> StreamPolicy {
        StreamPolicy {
            window: Duration::from_millis(self.window_ms.clamp(MIN_WINDOW_MS, MAX_WINDOW_MS)),
            citation_timeout: Duration::from_secs(self.citation_timeout_secs),
            sink_timeout: Duration::from_secs(self.sink_timeout_secs.max(1)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QaConfig {
    /// Chat model (default "gpt-3.5-turbo").
    #[serde(default = "default_model")]
    pub model: String,

    /// Sampling temperature (default 0.3).
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Embedding model used for retrieval (default "text-embedding-ada-002").
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,

    /// Chunks retrieved per question (default 4).
    #[serde(default = "default_match_count")]
    pub match_count: usize,

    /// Supabase RPC used for similarity search (default "match_documents").
    #[serde(default = "default_query_name")]
    pub query_name: String,

    /// Prompt with `{context}` and `{question}` placeholders. Default is the built-in IT-helpdesk prompt.
    #[serde(default)]
    pub prompt_template: Option<String>,

    /// OpenAI-compatible API base (default https://api.openai.com/v1).
    #[serde(default)]
    pub openai_base_url: Option<String>,
}

fn default_model() -> String {
    "gpt-3.5-turbo".to_string()
}

fn default_temperature() -> f32 {
    0.3
}

fn default_embedding_model() -> String {
    "text-embedding-ada-002".to_string()
}

fn default_match_count() -> usize {
    4
}

fn default_query_name() -> String {
    "match_documents".to_string()
}

impl Default for QaConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            temperature: default_temperature(),
            embedding_model: default_embedding_model(),
            match_count: default_match_count(),
            query_name: default_query_name(),
            prompt_template: None,
            openai_base_url: None,
        }
    }
}

impl QaConfig {
    pub fn settings(&self) -> QaSettings {
        QaSettings {
            model: self.model.clone(),
            temperature: self.temperature,
            match_count: self.match_count.max(1),
            prompt_template: self
                .prompt_template
                .clone()
                .filter(|t| !t.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_PROMPT_TEMPLATE.to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LarkConfig {
    /// Open API base (default https://open.feishu.cn; use https://open.larksuite.com for Lark international).
    #[serde(default)]
    pub base_url: Option<String>,

    /// Whole-request timeout for Open API calls in seconds (default 10).
    #[serde(default = "default_lark_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_lark_request_timeout_secs() -> u64 {
    10
}

impl Default for LarkConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            request_timeout_secs: default_lark_request_timeout_secs(),
        }
    }
}

impl LarkConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required environment variable(s): {}", .0.join(", "))]
    Missing(Vec<&'static str>),
}

/// Secrets and identifiers supplied by the environment.
#[derive(Clone)]
pub struct Credentials {
    pub app_id: String,
    pub app_secret: String,
    pub verification_token: String,
    pub encrypt_key: String,
    pub supabase_url: String,
    pub supabase_private_key: String,
    /// Knowledge space the index was built from.
    pub space_id: String,
    pub openai_api_key: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("app_id", &self.app_id)
            .field("supabase_url", &self.supabase_url)
            .field("space_id", &self.space_id)
            .finish_non_exhaustive()
    }
}

impl Credentials {
    /// Read every credential from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Resolve credentials through `lookup`; blank values count as missing. Reports all missing names at once.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut missing = Vec::new();
        let mut get = |name: &'static str| {
            match lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty()) {
                Some(v) => v,
                None => {
                    missing.push(name);
                    String::new()
                }
            }
        };
        let creds = Self {
            app_id: get("APP_ID"),
            app_secret: get("APP_SECRET"),
            verification_token: get("VERIFICATION_TOKEN"),
            encrypt_key: get("ENCRYPT_KEY"),
            supabase_url: get("SUPABASE_URL"),
            supabase_private_key: get("SUPABASE_PRIVATE_KEY"),
            space_id: get("SPACE_ID"),
            openai_api_key: get("OPENAI_API_KEY"),
        };
        if missing.is_empty() {
            Ok(creds)
        } else {
            Err(ConfigError::Missing(missing))
        }
    }
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var("LARK_QA_CONFIG_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            dirs::home_dir()
                .map(|h| h.join(".lark-qa").join("config.json"))
                .unwrap_or_else(|| PathBuf::from("config.json"))
        })
}

/// Load config from `path` (or the default path). Missing file => default config.
pub fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let config = if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        Config::default()
    } else {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        serde_json::from_str(&s)
            .with_context(|| format!("parsing config from {}", path.display()))?
    };
    Ok((config, path))
}
