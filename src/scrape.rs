//! URL scraping via the Firecrawl API.
//!
//! URL documents are fetched through a hosted scraper that renders the
//! page and returns its main content as markdown. One successful scrape
//! is one billable unit regardless of attempts.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde_json::json;

use crate::config::ScrapeConfig;

/// Scrape result: the page as markdown, plus the title when the scraper
/// detected one.
#[derive(Debug, Clone)]
pub struct Scraped {
    pub markdown: String,
    pub title: Option<String>,
}

/// Trait for URL scraping backends.
#[async_trait]
pub trait Scraper: Send + Sync {
    async fn scrape(&self, url: &str) -> Result<Scraped>;
}

/// Firecrawl `POST /v1/scrape` client.
///
/// Requires the `FIRECRAWL_API_KEY` environment variable.
pub struct FirecrawlScraper {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl FirecrawlScraper {
    pub fn new(config: &ScrapeConfig) -> Result<Self> {
        let api_key = std::env::var("FIRECRAWL_API_KEY")
            .map_err(|_| anyhow::anyhow!("FIRECRAWL_API_KEY environment variable not set"))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("failed to build scrape http client")?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            client,
        })
    }
}

#[async_trait]
impl Scraper for FirecrawlScraper {
    async fn scrape(&self, url: &str) -> Result<Scraped> {
        let body = json!({
            "url": url,
            "formats": ["markdown"],
            "onlyMainContent": true,
            "excludeTags": ["script", "style", "noscript", "img"],
        });

        let response = self
            .client
            .post(format!("{}/v1/scrape", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .context("scrape request failed")?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            bail!("Scrape API error {}: {}", status, text);
        }

        let json: serde_json::Value = response.json().await?;
        if !json.get("success").and_then(|s| s.as_bool()).unwrap_or(false) {
            bail!("Unable to scrape URL: {}", url);
        }

        let data = json
            .get("data")
            .ok_or_else(|| anyhow::anyhow!("Invalid scrape response: missing data"))?;

        let markdown = data
            .get("markdown")
            .and_then(|m| m.as_str())
            .unwrap_or_default()
            .to_string();

        let title = data
            .get("metadata")
            .and_then(|m| m.get("title"))
            .and_then(|t| t.as_str())
            .filter(|t| !t.is_empty())
            .map(|t| t.to_string());

        Ok(Scraped { markdown, title })
    }
}
