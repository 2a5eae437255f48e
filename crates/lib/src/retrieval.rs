//! Document retrieval from a Supabase pgvector index (`match_documents` RPC).
//!
//! Rows are the chunks written by the wiki crawler: `content` plus `metadata`
//! with the page `title` and `url`.

use crate::channels::Source;
use crate::llm::{LlmError, OpenAiClient};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashSet;
use std::time::Duration;

const RPC_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum RetrievalError {
    #[error("embedding failed: {0}")]
    Embedding(#[from] LlmError),
    #[error("vector store request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("vector store error: {0}")]
    Api(String),
}

/// One retrieved chunk.
#[derive(Debug, Clone, Deserialize)]
pub struct Document {
    pub content: String,
    #[serde(default)]
    pub metadata: serde_json::Value,
    #[serde(default)]
    pub similarity: Option<f64>,
}

impl Document {
    /// Citation for this chunk, when its metadata carries a title and url.
    pub fn source(&self) -> Option<Source> {
        let title = self.metadata.get("title")?.as_str()?;
        let url = self.metadata.get("url")?.as_str()?;
        Some(Source {
            title: title.to_string(),
            url: url.to_string(),
        })
    }
}

/// Citations for `docs` in rank order, one per url.
pub fn collect_sources(docs: &[Document]) -> Vec<Source> {
    let mut seen = HashSet::new();
    docs.iter()
        .filter_map(Document::source)
        .filter(|s| seen.insert(s.url.clone()))
        .collect()
}

#[async_trait]
pub trait Retriever: Send + Sync {
    /// Top `k` chunks for `query`, most similar first.
    async fn retrieve(&self, query: &str, k: usize) -> Result<Vec<Document>, RetrievalError>;
}

/// Retriever backed by Supabase PostgREST and OpenAI embeddings.
pub struct SupabaseRetriever {
    url: String,
    private_key: String,
    query_name: String,
    embedding_model: String,
    embedder: OpenAiClient,
    client: reqwest::Client,
}

impl SupabaseRetriever {
    pub fn new(
        url: String,
        private_key: String,
        query_name: String,
        embedding_model: String,
        embedder: OpenAiClient,
    ) -> Result<Self, RetrievalError> {
        let client = reqwest::Client::builder()
            .timeout(RPC_TIMEOUT)
            .build()?;
        Ok(Self {
            url: url.trim_end_matches('/').to_string(),
            private_key,
            query_name,
            embedding_model,
            embedder,
            client,
        })
    }
}

#[async_trait]
impl Retriever for SupabaseRetriever {
    async fn retrieve(&self, query: &str, k: usize) -> Result<Vec<Document>, RetrievalError> {
        let embedding = self.embedder.embed(&self.embedding_model, query).await?;
        let url = format!("{}/rest/v1/rpc/{}", self.url, self.query_name);
        let body = serde_json::json!({
            "query_embedding": embedding,
            "match_count": k,
            "filter": {},
        });
        let res = self
            .client
            .post(&url)
            .header("apikey", &self.private_key)
            .bearer_auth(&self.private_key)
            .json(&body)
            .send()
            .await?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(RetrievalError::Api(format!("{} {}", status, body)));
        }
        let docs: Vec<Document> = res.json().await?;
        log::debug!("retrieval: {} document(s) for query", docs.len());
        Ok(docs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(title: &str, url: &str) -> Document {
        Document {
            content: format!("# {}\nbody", title),
            metadata: serde_json::json!({ "title": title, "url": url }),
            similarity: None,
        }
    }

    #[test]
    fn sources_are_deduplicated_by_url_in_rank_order() {
        let docs = vec![
            doc("VPN", "https://wiki/vpn"),
            doc("Printers", "https://wiki/printers"),
            doc("VPN", "https://wiki/vpn"),
        ];
        let sources = collect_sources(&docs);
        assert_eq!(sources.len(), 2);
        assert_eq!(sources[0].title, "VPN");
        assert_eq!(sources[1].url, "https://wiki/printers");
    }

    #[test]
    fn documents_without_metadata_have_no_source() {
        let d: Document =
            serde_json::from_value(serde_json::json!({ "content": "x", "similarity": 0.8 }))
                .unwrap();
        assert!(d.source().is_none());
        assert!(collect_sources(&[d]).is_empty());
    }
}
