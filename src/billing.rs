//! Billing collaborator: credit authorization and usage reporting.
//!
//! The worker authorizes each document against the billing service before
//! processing it and reports the usage it accrued afterwards, success or
//! not. Usage is collected as a value ([`UsageReport`]) returned up the
//! call stack and merged by the scheduler, never through a shared mutable
//! tracker.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::BillingConfig;

/// One record of billable consumption, tagged with a context string for
/// provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UsageItem {
    LlmUsage {
        model: String,
        input_tokens: u64,
        output_tokens: u64,
        context: String,
    },
    EmbeddingUsage {
        model: String,
        tokens: u64,
        context: String,
    },
    ScrapeUsage {
        context: String,
    },
}

/// Per-attempt accumulation of [`UsageItem`]s.
///
/// Pipeline stages return their usage inside this value; callers merge
/// reports upward and the scheduler flushes the final report once per
/// document.
#[derive(Debug, Clone, Default)]
pub struct UsageReport {
    items: Vec<UsageItem>,
}

impl UsageReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, item: UsageItem) {
        self.items.push(item);
    }

    /// Absorb another report, preserving item order.
    pub fn merge(&mut self, other: UsageReport) {
        self.items.extend(other.items);
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn items(&self) -> &[UsageItem] {
        &self.items
    }

    pub fn into_items(self) -> Vec<UsageItem> {
        self.items
    }
}

/// Generic "spend credits" authorization request.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthorizeRequest {
    UseCredits,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthorizeResponse {
    pub success: bool,
    #[serde(default)]
    pub error: Option<String>,
}

/// Raised when credit authorization or customer resolution fails, so the
/// scheduler can record it on the job's `billing_error` field.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct BillingError(pub String);

/// Call contract the worker holds against the billing service.
#[async_trait]
pub trait Billing: Send + Sync {
    /// Resolve the billing customer that owns a project.
    async fn customer_id_for_project(&self, project_id: &str) -> Result<String>;

    /// Check whether the customer may spend credits right now.
    async fn authorize(
        &self,
        customer_id: &str,
        request: AuthorizeRequest,
    ) -> Result<AuthorizeResponse>;

    /// Report accrued usage items for the customer.
    async fn log_usage(&self, customer_id: &str, items: Vec<UsageItem>) -> Result<()>;
}

/// HTTP client for the billing service's customer endpoints.
///
/// Reads the API key from `BILLING_API_KEY` and authenticates with a
/// bearer header on every call.
pub struct HttpBilling {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl HttpBilling {
    pub fn new(config: &BillingConfig) -> Result<Self> {
        let base_url = config
            .base_url
            .clone()
            .ok_or_else(|| anyhow::anyhow!("billing.base_url required"))?;
        let api_key = std::env::var("BILLING_API_KEY")
            .map_err(|_| anyhow::anyhow!("BILLING_API_KEY environment variable not set"))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            client,
        })
    }
}

#[async_trait]
impl Billing for HttpBilling {
    async fn customer_id_for_project(&self, project_id: &str) -> Result<String> {
        let url = format!("{}/api/projects/{}/customer", self.base_url, project_id);
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.api_key)
            .send()
            .await
            .context("billing customer lookup failed")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("Failed to fetch billing customer: {} {}", status, body);
        }

        let json: serde_json::Value = response.json().await?;
        json.get("id")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| anyhow::anyhow!("Invalid billing customer response: missing id"))
    }

    async fn authorize(
        &self,
        customer_id: &str,
        request: AuthorizeRequest,
    ) -> Result<AuthorizeResponse> {
        let url = format!("{}/api/customers/{}/authorize", self.base_url, customer_id);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .context("billing authorize call failed")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("Failed to authorize billing: {} {}", status, body);
        }

        Ok(response.json().await?)
    }

    async fn log_usage(&self, customer_id: &str, items: Vec<UsageItem>) -> Result<()> {
        let url = format!("{}/api/customers/{}/log-usage", self.base_url, customer_id);
        tracing::debug!(customer_id, items = items.len(), "logging billing usage");
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({ "items": items }))
            .send()
            .await
            .context("billing log-usage call failed")?;

        let status = response.status();
        tracing::debug!(customer_id, %status, "billing usage logged");
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("Failed to log usage: {} {}", status, body);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn llm_item(context: &str) -> UsageItem {
        UsageItem::LlmUsage {
            model: "gpt-4.1".to_string(),
            input_tokens: 100,
            output_tokens: 50,
            context: context.to_string(),
        }
    }

    #[test]
    fn test_report_merge_preserves_order() {
        let mut first = UsageReport::new();
        first.record(llm_item("rag.files.llm_usage"));

        let mut second = UsageReport::new();
        second.record(UsageItem::EmbeddingUsage {
            model: "text-embedding-3-small".to_string(),
            tokens: 12,
            context: "rag.files.embedding_usage".to_string(),
        });

        first.merge(second);
        assert_eq!(first.len(), 2);
        assert!(matches!(first.items()[0], UsageItem::LlmUsage { .. }));
        assert!(matches!(
            first.items()[1],
            UsageItem::EmbeddingUsage { .. }
        ));
    }

    #[test]
    fn test_usage_item_wire_format() {
        let item = UsageItem::ScrapeUsage {
            context: "rag.urls.firecrawl_scrape".to_string(),
        };
        let json = serde_json::to_value(&item).unwrap();
        assert_eq!(json["type"], "scrape_usage");
        assert_eq!(json["context"], "rag.urls.firecrawl_scrape");
    }

    #[test]
    fn test_authorize_request_wire_format() {
        let json = serde_json::to_value(AuthorizeRequest::UseCredits).unwrap();
        assert_eq!(json["type"], "use_credits");
    }
}
