//! Embedding provider abstraction and the OpenAI-compatible backend.
//!
//! The [`Embedder`] trait turns a batch of chunk texts into vectors plus a
//! billable token count. The production backend calls a `POST /embeddings`
//! endpoint with the OpenAI wire format.
//!
//! # Retry Strategy
//!
//! Transient errors are retried with exponential backoff:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;

use crate::config::EmbeddingConfig;

/// Result of one embedding call: vectors in input order plus the total
/// token count the provider billed for the batch.
#[derive(Debug, Clone)]
pub struct EmbeddingBatch {
    pub vectors: Vec<Vec<f32>>,
    pub tokens: u64,
}

/// Trait for embedding providers.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Returns the model identifier (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;

    /// Embed a batch of texts, returning one vector per input in order.
    async fn embed(&self, texts: &[String]) -> Result<EmbeddingBatch>;
}

/// Embedding provider using the OpenAI embeddings wire format.
///
/// Requires the `OPENAI_API_KEY` environment variable. The base URL is
/// configurable so OpenAI-compatible gateways work too.
pub struct OpenAiEmbedder {
    model: String,
    base_url: String,
    max_retries: u32,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAiEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("failed to build embedding http client")?;

        Ok(Self {
            model: config.model.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            max_retries: config.max_retries,
            api_key,
            client,
        })
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed(&self, texts: &[String]) -> Result<EmbeddingBatch> {
        if texts.is_empty() {
            return Ok(EmbeddingBatch {
                vectors: Vec::new(),
                tokens: 0,
            });
        }

        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                // Exponential backoff: 1s, 2s, 4s, 8s, ...
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .client
                .post(format!("{}/embeddings", self.base_url))
                .header("Authorization", format!("Bearer {}", self.api_key))
                .header("Content-Type", "application/json")
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: serde_json::Value = response.json().await?;
                        return parse_embedding_response(&json);
                    }

                    // Rate limited or server error — retry
                    if status.as_u16() == 429 || status.is_server_error() {
                        let body_text = response.text().await.unwrap_or_default();
                        last_err = Some(anyhow::anyhow!(
                            "Embedding API error {}: {}",
                            status,
                            body_text
                        ));
                        continue;
                    }

                    // Client error (not 429) — don't retry
                    let body_text = response.text().await.unwrap_or_default();
                    bail!("Embedding API error {}: {}", status, body_text);
                }
                Err(e) => {
                    last_err = Some(e.into());
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("Embedding failed after retries")))
    }
}

/// Parse the embeddings API response JSON.
///
/// Extracts `data[].embedding` in order plus `usage.total_tokens`.
fn parse_embedding_response(json: &serde_json::Value) -> Result<EmbeddingBatch> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid embedding response: missing data array"))?;

    let mut vectors = Vec::with_capacity(data.len());

    for item in data {
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| anyhow::anyhow!("Invalid embedding response: missing embedding"))?;

        let vec: Vec<f32> = embedding
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();

        vectors.push(vec);
    }

    let tokens = json
        .get("usage")
        .and_then(|u| u.get("total_tokens"))
        .and_then(|t| t.as_u64())
        .unwrap_or(0);

    Ok(EmbeddingBatch { vectors, tokens })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_embedding_response() {
        let json = serde_json::json!({
            "data": [
                {"index": 0, "embedding": [0.1, 0.2]},
                {"index": 1, "embedding": [0.3, 0.4]},
            ],
            "usage": {"prompt_tokens": 12, "total_tokens": 12},
        });
        let batch = parse_embedding_response(&json).unwrap();
        assert_eq!(batch.vectors.len(), 2);
        assert_eq!(batch.vectors[0], vec![0.1f32, 0.2f32]);
        assert_eq!(batch.tokens, 12);
    }

    #[test]
    fn test_parse_embedding_response_missing_data() {
        let json = serde_json::json!({"error": {"message": "bad request"}});
        assert!(parse_embedding_response(&json).is_err());
    }

    #[test]
    fn test_parse_embedding_response_missing_usage() {
        let json = serde_json::json!({
            "data": [{"index": 0, "embedding": [1.0]}],
        });
        let batch = parse_embedding_response(&json).unwrap();
        assert_eq!(batch.tokens, 0);
    }
}
