//! Job and document storage abstraction.
//!
//! The [`SourceStore`] and [`DocumentStore`] traits define every database
//! operation the worker needs, enabling pluggable backends (SQLite,
//! in-memory for tests). All writes that race with other workers are
//! version-checked: a stale update is silently dropped and reported as
//! `false`, never applied.

pub mod memory;
pub mod sqlite;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{DocStatus, Document, Source, SourceStatus};

/// Final state written when a worker releases a claimed job.
#[derive(Debug, Clone)]
pub struct JobRelease {
    pub status: SourceStatus,
    pub error: Option<String>,
    pub billing_error: Option<String>,
}

/// Version-checked document update. `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct DocUpdate {
    pub status: Option<DocStatus>,
    pub content: Option<String>,
    pub error: Option<String>,
}

/// One page of a document listing.
#[derive(Debug, Clone)]
pub struct DocPage {
    pub items: Vec<Document>,
    /// Opaque cursor; `None` when the listing is drained.
    pub next_cursor: Option<String>,
}

/// Storage contract for ingestion sources (the worker's job queue).
#[async_trait]
pub trait SourceStore: Send + Sync {
    async fn create(&self, source: &Source) -> Result<()>;

    async fn fetch(&self, id: &str) -> Result<Option<Source>>;

    /// Claim the next source awaiting cascade removal (`status = deleted`).
    ///
    /// Claiming bumps the version so a concurrent release against the old
    /// version is dropped. The status stays `deleted`: it is the only
    /// record that the row must be removed, and the cascade itself is
    /// idempotent.
    async fn claim_deletion_job(&self) -> Result<Option<Source>>;

    /// Atomically claim the next source with outstanding document work
    /// (`status ∈ {pending, error}`), marking it `processing` and bumping
    /// its version. Returns the claimed row with the new version, or
    /// `None` when there is no work or another worker won the claim.
    async fn claim_pending_job(&self) -> Result<Option<Source>>;

    /// Conditionally release a job: applies only if `version` still
    /// matches the stored row. Returns `false` on a silent no-op.
    async fn release(&self, id: &str, version: i64, release: JobRelease) -> Result<bool>;

    /// Hard-delete the source row.
    async fn delete(&self, id: &str) -> Result<()>;
}

/// Storage contract for documents.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn create(&self, doc: &Document) -> Result<()>;

    async fn fetch(&self, id: &str) -> Result<Option<Document>>;

    /// List documents of a source filtered by status, one page at a time.
    async fn list(
        &self,
        source_id: &str,
        statuses: &[DocStatus],
        cursor: Option<String>,
        limit: i64,
    ) -> Result<DocPage>;

    /// Conditionally update a document: applies only if `version` still
    /// matches. Returns `false` on a silent no-op.
    async fn update_by_version(&self, id: &str, version: i64, update: DocUpdate) -> Result<bool>;

    /// Hard-delete one document row.
    async fn delete(&self, id: &str) -> Result<()>;

    /// Hard-delete all document rows of a source.
    async fn delete_by_source(&self, source_id: &str) -> Result<()>;
}

/// Drain a paginated listing into one vector.
pub async fn list_all(
    docs: &dyn DocumentStore,
    source_id: &str,
    statuses: &[DocStatus],
    page_size: i64,
) -> Result<Vec<Document>> {
    let mut all = Vec::new();
    let mut cursor = None;
    loop {
        let page = docs.list(source_id, statuses, cursor, page_size).await?;
        all.extend(page.items);
        match page.next_cursor {
            Some(next) => cursor = Some(next),
            None => break,
        }
    }
    Ok(all)
}
