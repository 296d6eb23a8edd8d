//! Vector index access.
//!
//! [`VectorStore`] is the seam between ingestion and the vector database;
//! the production backend is Qdrant over its REST API. Points are upserted
//! per document and removed by payload filter on deletion.

use std::sync::Mutex;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde_json::json;

use crate::models::{EmbeddingPoint, PointFilter};

#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Insert or overwrite points in the index.
    async fn upsert(&self, points: &[EmbeddingPoint]) -> Result<()>;

    /// Remove every point whose payload matches the filter.
    async fn delete_matching(&self, filter: &PointFilter) -> Result<()>;

    /// Create the backing collection if it does not exist yet.
    async fn ensure_collection(&self, dims: u32) -> Result<()>;
}

/// Qdrant REST backend.
pub struct QdrantStore {
    base_url: String,
    collection: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl QdrantStore {
    pub fn new(base_url: &str, collection: &str, timeout_secs: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .build()
            .context("failed to build qdrant http client")?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            collection: collection.to_string(),
            api_key: std::env::var("QDRANT_API_KEY").ok(),
            client,
        })
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let mut req = self
            .client
            .request(method, format!("{}{}", self.base_url, path));
        if let Some(key) = &self.api_key {
            req = req.header("api-key", key);
        }
        req
    }

    fn filter_body(filter: &PointFilter) -> serde_json::Value {
        let mut must = vec![
            json!({"key": "projectId", "match": {"value": filter.project_id}}),
            json!({"key": "sourceId", "match": {"value": filter.source_id}}),
        ];
        if let Some(doc_id) = &filter.doc_id {
            must.push(json!({"key": "docId", "match": {"value": doc_id}}));
        }
        json!({"filter": {"must": must}})
    }
}

#[async_trait]
impl VectorStore for QdrantStore {
    async fn upsert(&self, points: &[EmbeddingPoint]) -> Result<()> {
        if points.is_empty() {
            return Ok(());
        }

        let body = json!({
            "points": points
                .iter()
                .map(|p| {
                    json!({
                        "id": p.id,
                        "vector": p.vector,
                        "payload": p.payload,
                    })
                })
                .collect::<Vec<_>>(),
        });

        let response = self
            .request(
                reqwest::Method::PUT,
                &format!("/collections/{}/points?wait=true", self.collection),
            )
            .json(&body)
            .send()
            .await
            .context("qdrant upsert request failed")?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            bail!("qdrant upsert failed with status {}: {}", status, text);
        }
        Ok(())
    }

    async fn delete_matching(&self, filter: &PointFilter) -> Result<()> {
        let response = self
            .request(
                reqwest::Method::POST,
                &format!("/collections/{}/points/delete?wait=true", self.collection),
            )
            .json(&Self::filter_body(filter))
            .send()
            .await
            .context("qdrant delete request failed")?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            bail!("qdrant delete failed with status {}: {}", status, text);
        }
        Ok(())
    }

    async fn ensure_collection(&self, dims: u32) -> Result<()> {
        let response = self
            .request(
                reqwest::Method::GET,
                &format!("/collections/{}", self.collection),
            )
            .send()
            .await
            .context("qdrant collection lookup failed")?;

        if response.status().is_success() {
            return Ok(());
        }
        if response.status() != reqwest::StatusCode::NOT_FOUND {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            bail!(
                "qdrant collection lookup failed with status {}: {}",
                status,
                text
            );
        }

        tracing::info!(collection = %self.collection, dims, "creating vector collection");
        let body = json!({
            "vectors": {"size": dims, "distance": "Cosine"},
        });
        let response = self
            .request(
                reqwest::Method::PUT,
                &format!("/collections/{}", self.collection),
            )
            .json(&body)
            .send()
            .await
            .context("qdrant collection create failed")?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            bail!(
                "qdrant collection create failed with status {}: {}",
                status,
                text
            );
        }
        Ok(())
    }
}

/// In-memory [`VectorStore`] recording calls, for tests.
#[derive(Default)]
pub struct MemoryVectorStore {
    upserted: Mutex<Vec<EmbeddingPoint>>,
    deleted: Mutex<Vec<PointFilter>>,
}

impl MemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upserted(&self) -> Vec<EmbeddingPoint> {
        self.upserted.lock().unwrap().clone()
    }

    pub fn deleted(&self) -> Vec<PointFilter> {
        self.deleted.lock().unwrap().clone()
    }
}

#[async_trait]
impl VectorStore for MemoryVectorStore {
    async fn upsert(&self, points: &[EmbeddingPoint]) -> Result<()> {
        self.upserted.lock().unwrap().extend_from_slice(points);
        Ok(())
    }

    async fn delete_matching(&self, filter: &PointFilter) -> Result<()> {
        self.deleted.lock().unwrap().push(filter.clone());
        // Also drop matching points so tests can assert on the surviving set.
        self.upserted.lock().unwrap().retain(|p| {
            !(p.payload.project_id == filter.project_id
                && p.payload.source_id == filter.source_id
                && filter
                    .doc_id
                    .as_ref()
                    .map(|d| &p.payload.doc_id == d)
                    .unwrap_or(true))
        });
        Ok(())
    }

    async fn ensure_collection(&self, _dims: u32) -> Result<()> {
        Ok(())
    }
}
