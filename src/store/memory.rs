//! In-memory store implementations for tests.
//!
//! Backed by `Vec`s behind `std::sync::RwLock`. Claim and release follow
//! the same version-checked semantics as the SQLite backend, so worker
//! tests exercise the real concurrency contract.

use std::sync::RwLock;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;

use crate::models::{DocStatus, Document, Source, SourceStatus};

use super::{DocPage, DocUpdate, DocumentStore, JobRelease, SourceStore};

/// In-memory [`SourceStore`].
#[derive(Default)]
pub struct MemorySourceStore {
    sources: RwLock<Vec<Source>>,
}

impl MemorySourceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every stored source, for assertions.
    pub fn all(&self) -> Vec<Source> {
        self.sources.read().unwrap().clone()
    }

    /// Bump a source's version out-of-band, simulating a concurrent
    /// writer between a worker's fetch and its release.
    pub fn bump_version(&self, id: &str) {
        let mut sources = self.sources.write().unwrap();
        if let Some(source) = sources.iter_mut().find(|s| s.id == id) {
            source.version += 1;
        }
    }
}

#[async_trait]
impl SourceStore for MemorySourceStore {
    async fn create(&self, source: &Source) -> Result<()> {
        self.sources.write().unwrap().push(source.clone());
        Ok(())
    }

    async fn fetch(&self, id: &str) -> Result<Option<Source>> {
        Ok(self
            .sources
            .read()
            .unwrap()
            .iter()
            .find(|s| s.id == id)
            .cloned())
    }

    async fn claim_deletion_job(&self) -> Result<Option<Source>> {
        let mut sources = self.sources.write().unwrap();
        if let Some(source) = sources
            .iter_mut()
            .find(|s| s.status == SourceStatus::Deleted)
        {
            source.version += 1;
            source.updated_at = Utc::now();
            return Ok(Some(source.clone()));
        }
        Ok(None)
    }

    async fn claim_pending_job(&self) -> Result<Option<Source>> {
        let mut sources = self.sources.write().unwrap();
        if let Some(source) = sources.iter_mut().find(|s| {
            s.status == SourceStatus::Pending || s.status == SourceStatus::Error
        }) {
            source.status = SourceStatus::Processing;
            source.version += 1;
            source.updated_at = Utc::now();
            return Ok(Some(source.clone()));
        }
        Ok(None)
    }

    async fn release(&self, id: &str, version: i64, release: JobRelease) -> Result<bool> {
        let mut sources = self.sources.write().unwrap();
        match sources
            .iter_mut()
            .find(|s| s.id == id && s.version == version)
        {
            Some(source) => {
                source.status = release.status;
                source.error = release.error;
                source.billing_error = release.billing_error;
                source.version += 1;
                source.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.sources.write().unwrap().retain(|s| s.id != id);
        Ok(())
    }
}

/// In-memory [`DocumentStore`].
#[derive(Default)]
pub struct MemoryDocumentStore {
    docs: RwLock<Vec<Document>>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every stored document, for assertions.
    pub fn all(&self) -> Vec<Document> {
        self.docs.read().unwrap().clone()
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn create(&self, doc: &Document) -> Result<()> {
        self.docs.write().unwrap().push(doc.clone());
        Ok(())
    }

    async fn fetch(&self, id: &str) -> Result<Option<Document>> {
        Ok(self
            .docs
            .read()
            .unwrap()
            .iter()
            .find(|d| d.id == id)
            .cloned())
    }

    async fn list(
        &self,
        source_id: &str,
        statuses: &[DocStatus],
        cursor: Option<String>,
        limit: i64,
    ) -> Result<DocPage> {
        let docs = self.docs.read().unwrap();
        let mut matching: Vec<Document> = docs
            .iter()
            .filter(|d| d.source_id == source_id && statuses.contains(&d.status))
            .cloned()
            .collect();
        matching.sort_by(|a, b| a.id.cmp(&b.id));

        if let Some(after) = cursor {
            matching.retain(|d| d.id > after);
        }

        let limit = limit.max(1) as usize;
        let next_cursor = if matching.len() > limit {
            matching.get(limit - 1).map(|d| d.id.clone())
        } else {
            None
        };
        matching.truncate(limit);

        Ok(DocPage {
            items: matching,
            next_cursor,
        })
    }

    async fn update_by_version(&self, id: &str, version: i64, update: DocUpdate) -> Result<bool> {
        let mut docs = self.docs.write().unwrap();
        match docs.iter_mut().find(|d| d.id == id && d.version == version) {
            Some(doc) => {
                if let Some(status) = update.status {
                    doc.status = status;
                }
                if let Some(content) = update.content {
                    doc.content = Some(content);
                }
                if let Some(error) = update.error {
                    doc.error = Some(error);
                }
                doc.version += 1;
                doc.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.docs.write().unwrap().retain(|d| d.id != id);
        Ok(())
    }

    async fn delete_by_source(&self, source_id: &str) -> Result<()> {
        self.docs
            .write()
            .unwrap()
            .retain(|d| d.source_id != source_id);
        Ok(())
    }
}
