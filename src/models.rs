//! Core data models used throughout ragmill.
//!
//! These types represent the sources, documents, and embedding points that
//! flow through the ingestion worker. Source/document payloads are closed
//! tagged unions so the pipeline dispatch is exhaustive at compile time.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A unit of ingestion configuration, scoped to a project.
///
/// Created by the management API in `pending`; mutated only by the worker
/// via version-checked claim/release; physically deleted after a successful
/// source-level cascade.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Source {
    pub id: String,
    pub project_id: String,
    /// Optimistic-concurrency counter. Bumped on every claim and release.
    pub version: i64,
    pub name: String,
    pub data: SourceData,
    pub status: SourceStatus,
    pub error: Option<String>,
    pub billing_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Origin of a source's content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceData {
    FileLocal { mime_type: String },
    FileS3 { mime_type: String },
    Url { url: String },
    Text { content: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceStatus {
    Pending,
    /// Claimed by a worker; set atomically by the claim step so two
    /// workers cannot process the same job.
    Processing,
    Ready,
    Error,
    Deleted,
}

impl SourceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceStatus::Pending => "pending",
            SourceStatus::Processing => "processing",
            SourceStatus::Ready => "ready",
            SourceStatus::Error => "error",
            SourceStatus::Deleted => "deleted",
        }
    }
}

/// One extractable unit belonging to a [`Source`]: one file, one URL, or
/// one text blob. Becomes one or more embedding points once processed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub source_id: String,
    /// Independent optimistic-concurrency counter.
    pub version: i64,
    pub name: String,
    pub data: DocData,
    pub status: DocStatus,
    /// Extracted/raw markdown once the document is `ready`.
    pub content: Option<String>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Payload of a document, mirroring the owning source's kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DocData {
    FileLocal { mime_type: String },
    FileS3 { mime_type: String },
    Url { url: String },
    Text { content: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocStatus {
    Pending,
    Ready,
    Error,
    Deleted,
}

impl DocStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocStatus::Pending => "pending",
            DocStatus::Ready => "ready",
            DocStatus::Error => "error",
            DocStatus::Deleted => "deleted",
        }
    }
}

/// One vector-store record per content chunk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingPoint {
    /// Fresh UUID per chunk; not tied to chunk position.
    pub id: String,
    pub vector: Vec<f32>,
    pub payload: PointPayload,
}

/// Payload stored alongside each vector, used for retrieval display and
/// filtered deletion.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PointPayload {
    pub project_id: String,
    pub source_id: String,
    pub doc_id: String,
    /// The chunk text itself.
    pub content: String,
    pub title: String,
    pub name: String,
}

/// Filter for bulk point deletion. A `None` doc_id cascades over the
/// whole source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PointFilter {
    pub project_id: String,
    pub source_id: String,
    pub doc_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_doc_data_tagged_serialization() {
        let data = DocData::Url {
            url: "https://example.com/page".to_string(),
        };
        let json = serde_json::to_value(&data).unwrap();
        assert_eq!(json["kind"], "url");
        assert_eq!(json["url"], "https://example.com/page");

        let back: DocData = serde_json::from_value(json).unwrap();
        assert_eq!(back, data);
    }

    #[test]
    fn test_doc_data_file_kinds_distinct() {
        let local = serde_json::json!({ "kind": "file_local", "mime_type": "application/pdf" });
        let s3 = serde_json::json!({ "kind": "file_s3", "mime_type": "application/pdf" });
        assert!(matches!(
            serde_json::from_value::<DocData>(local).unwrap(),
            DocData::FileLocal { .. }
        ));
        assert!(matches!(
            serde_json::from_value::<DocData>(s3).unwrap(),
            DocData::FileS3 { .. }
        ));
    }

    #[test]
    fn test_status_round_trip() {
        for status in [
            SourceStatus::Pending,
            SourceStatus::Processing,
            SourceStatus::Ready,
            SourceStatus::Error,
            SourceStatus::Deleted,
        ] {
            let s = serde_json::to_string(&status).unwrap();
            assert_eq!(s.trim_matches('"'), status.as_str());
        }
    }
}
