//! LLM-backed file content extraction.
//!
//! Binary uploads (PDFs, office docs) are turned into markdown by sending
//! the raw bytes to a multimodal model. Two backends exist: OpenAI
//! chat-completions (file attached as a base64 data URL) and Gemini
//! `generateContent` (file attached as `inline_data`). Both report token
//! usage so every extraction is billable.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use base64::Engine;
use serde_json::json;

use crate::billing::UsageItem;
use crate::config::ExtractionConfig;

/// Instruction sent with every extraction request.
const EXTRACT_PROMPT: &str = "Extract and return only the text content from this document in markdown format. Exclude any formatting instructions or additional commentary.";

/// Result of one extraction: the markdown text plus the billable usage.
#[derive(Debug, Clone)]
pub struct Extraction {
    pub markdown: String,
    pub usage: UsageItem,
}

/// Trait for file extraction backends.
#[async_trait]
pub trait Extractor: Send + Sync {
    async fn extract(&self, bytes: &[u8], mime_type: &str) -> Result<Extraction>;
}

/// Extraction backend using the OpenAI chat-completions wire format.
///
/// Requires the `OPENAI_API_KEY` environment variable.
pub struct OpenAiExtractor {
    model: String,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAiExtractor {
    pub fn new(config: &ExtractionConfig) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("failed to build extraction http client")?;

        Ok(Self {
            model: config.model.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            client,
        })
    }
}

#[async_trait]
impl Extractor for OpenAiExtractor {
    async fn extract(&self, bytes: &[u8], mime_type: &str) -> Result<Extraction> {
        let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
        let body = json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": EXTRACT_PROMPT},
                {
                    "role": "user",
                    "content": [
                        {
                            "type": "file",
                            "file": {
                                "filename": "upload",
                                "file_data": format!("data:{};base64,{}", mime_type, encoded),
                            },
                        }
                    ],
                },
            ],
        });

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .context("extraction request failed")?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            bail!("Extraction API error {}: {}", status, text);
        }

        let json: serde_json::Value = response.json().await?;
        let markdown = json
            .get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(|t| t.as_str())
            .ok_or_else(|| anyhow::anyhow!("Invalid extraction response: missing content"))?
            .to_string();

        let usage = UsageItem::LlmUsage {
            model: self.model.clone(),
            input_tokens: token_count(&json, "usage", "prompt_tokens"),
            output_tokens: token_count(&json, "usage", "completion_tokens"),
            context: "rag.files.llm_usage".to_string(),
        };

        Ok(Extraction { markdown, usage })
    }
}

/// Extraction backend using the Gemini `generateContent` API.
///
/// Requires the `GEMINI_API_KEY` environment variable.
pub struct GeminiExtractor {
    model: String,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl GeminiExtractor {
    pub fn new(config: &ExtractionConfig) -> Result<Self> {
        let api_key = std::env::var("GEMINI_API_KEY")
            .map_err(|_| anyhow::anyhow!("GEMINI_API_KEY environment variable not set"))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("failed to build extraction http client")?;

        Ok(Self {
            model: config.model.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            client,
        })
    }
}

#[async_trait]
impl Extractor for GeminiExtractor {
    async fn extract(&self, bytes: &[u8], mime_type: &str) -> Result<Extraction> {
        let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
        let body = json!({
            "contents": [
                {
                    "parts": [
                        {"text": EXTRACT_PROMPT},
                        {
                            "inline_data": {
                                "mime_type": mime_type,
                                "data": encoded,
                            },
                        },
                    ],
                }
            ],
        });

        let response = self
            .client
            .post(format!(
                "{}/models/{}:generateContent",
                self.base_url, self.model
            ))
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .context("extraction request failed")?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            bail!("Extraction API error {}: {}", status, text);
        }

        let json: serde_json::Value = response.json().await?;
        let markdown = json
            .get("candidates")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("content"))
            .and_then(|c| c.get("parts"))
            .and_then(|p| p.get(0))
            .and_then(|p| p.get("text"))
            .and_then(|t| t.as_str())
            .ok_or_else(|| anyhow::anyhow!("Invalid extraction response: missing text part"))?
            .to_string();

        let usage = UsageItem::LlmUsage {
            model: self.model.clone(),
            input_tokens: token_count(&json, "usageMetadata", "promptTokenCount"),
            output_tokens: token_count(&json, "usageMetadata", "candidatesTokenCount"),
            context: "rag.files.llm_usage".to_string(),
        };

        Ok(Extraction { markdown, usage })
    }
}

fn token_count(json: &serde_json::Value, section: &str, field: &str) -> u64 {
    json.get(section)
        .and_then(|u| u.get(field))
        .and_then(|t| t.as_u64())
        .unwrap_or(0)
}

/// Create the appropriate [`Extractor`] based on configuration.
pub fn create_extractor(config: &ExtractionConfig) -> Result<Box<dyn Extractor>> {
    match config.provider.as_str() {
        "openai" => Ok(Box::new(OpenAiExtractor::new(config)?)),
        "gemini" => Ok(Box::new(GeminiExtractor::new(config)?)),
        other => bail!("Unknown extraction provider: {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_count_present() {
        let json = json!({"usage": {"prompt_tokens": 42, "completion_tokens": 7}});
        assert_eq!(token_count(&json, "usage", "prompt_tokens"), 42);
        assert_eq!(token_count(&json, "usage", "completion_tokens"), 7);
    }

    #[test]
    fn test_token_count_missing_defaults_to_zero() {
        let json = json!({});
        assert_eq!(token_count(&json, "usageMetadata", "promptTokenCount"), 0);
    }
}
