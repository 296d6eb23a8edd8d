//! Per-document ingestion pipelines.
//!
//! [`Pipelines::process_document`] dispatches on the document's payload
//! kind: files are fetched and extracted to markdown, URLs are scraped,
//! text is taken as-is. All three converge on the shared
//! chunk-embed-store stage. Deletion is its own pipeline that removes
//! the document's vector points and its row.
//!
//! Pipelines never release jobs or mark documents `error` — that is the
//! scheduler's boundary. They do perform the version-checked `ready`
//! update, and they return accrued usage even when they fail so the
//! scheduler can flush it.

use std::sync::Arc;

use anyhow::{bail, Result};
use tracing::{debug, warn};

use crate::billing::{UsageItem, UsageReport};
use crate::chunk::split_text;
use crate::config::ChunkingConfig;
use crate::embedding::Embedder;
use crate::extract::Extractor;
use crate::files::FileStore;
use crate::models::{DocData, DocStatus, Document, EmbeddingPoint, PointFilter, PointPayload, Source};
use crate::retry::retryable;
use crate::scrape::Scraper;
use crate::store::{DocUpdate, DocumentStore};
use crate::vector::VectorStore;

/// Outcome of one pipeline attempt. Usage accrued before a failure is
/// still present and must be flushed by the caller.
pub struct PipelineRun {
    pub usage: UsageReport,
    pub outcome: Result<()>,
}

/// The ingestion pipelines and their collaborators.
pub struct Pipelines {
    pub local_files: Option<Arc<dyn FileStore>>,
    pub s3_files: Option<Arc<dyn FileStore>>,
    pub extractor: Arc<dyn Extractor>,
    pub scraper: Arc<dyn Scraper>,
    pub embedder: Arc<dyn Embedder>,
    pub vectors: Arc<dyn VectorStore>,
    pub docs: Arc<dyn DocumentStore>,
    pub chunking: ChunkingConfig,
    pub scrape_max_attempts: usize,
}

impl Pipelines {
    /// Run the pipeline matching the document's payload kind.
    pub async fn process_document(&self, source: &Source, doc: &Document) -> PipelineRun {
        let mut usage = UsageReport::new();
        let outcome = match &doc.data {
            DocData::FileLocal { mime_type } => {
                self.file_pipeline(source, doc, &self.local_files, mime_type, &mut usage)
                    .await
            }
            DocData::FileS3 { mime_type } => {
                self.file_pipeline(source, doc, &self.s3_files, mime_type, &mut usage)
                    .await
            }
            DocData::Url { url } => self.scrape_pipeline(source, doc, url, &mut usage).await,
            DocData::Text { content } => self.text_pipeline(source, doc, content, &mut usage).await,
        };
        PipelineRun { usage, outcome }
    }

    /// Remove a single document's vector points and its row.
    pub async fn delete_document(&self, source: &Source, doc: &Document) -> Result<()> {
        debug!(doc_id = %doc.id, "deleting document embeddings");
        self.vectors
            .delete_matching(&PointFilter {
                project_id: source.project_id.clone(),
                source_id: source.id.clone(),
                doc_id: Some(doc.id.clone()),
            })
            .await?;
        self.docs.delete(&doc.id).await
    }

    async fn file_pipeline(
        &self,
        source: &Source,
        doc: &Document,
        files: &Option<Arc<dyn FileStore>>,
        mime_type: &str,
        usage: &mut UsageReport,
    ) -> Result<()> {
        let files = files
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("No uploads backend configured for this document"))?;

        debug!(doc_id = %doc.id, "fetching uploaded file");
        let bytes = files.fetch(&doc.id).await?;

        debug!(doc_id = %doc.id, mime_type, "extracting file content");
        let extraction = self.extractor.extract(&bytes, mime_type).await?;
        usage.record(extraction.usage.clone());

        self.chunk_embed_store(
            source,
            doc,
            &extraction.markdown,
            None,
            "rag.files.embedding_usage",
            usage,
        )
        .await?;

        self.mark_ready(doc, &extraction.markdown).await
    }

    async fn scrape_pipeline(
        &self,
        source: &Source,
        doc: &Document,
        url: &str,
        usage: &mut UsageReport,
    ) -> Result<()> {
        debug!(doc_id = %doc.id, url, "scraping url");
        let scraped = retryable(|| self.scraper.scrape(url), self.scrape_max_attempts).await?;
        // One successful scrape is one billable unit, however many attempts.
        usage.record(UsageItem::ScrapeUsage {
            context: "rag.urls.firecrawl_scrape".to_string(),
        });

        self.chunk_embed_store(
            source,
            doc,
            &scraped.markdown,
            scraped.title.as_deref(),
            "rag.urls.embedding_usage",
            usage,
        )
        .await?;

        self.mark_ready(doc, &scraped.markdown).await
    }

    async fn text_pipeline(
        &self,
        source: &Source,
        doc: &Document,
        content: &str,
        usage: &mut UsageReport,
    ) -> Result<()> {
        self.chunk_embed_store(
            source,
            doc,
            content,
            None,
            "rag.text.embedding_usage",
            usage,
        )
        .await?;

        self.mark_ready(doc, content).await
    }

    /// Shared final stage: chunk the markdown, embed every chunk in one
    /// batch call, and upsert one point per chunk. Empty content yields
    /// zero chunks and succeeds without any provider calls.
    async fn chunk_embed_store(
        &self,
        source: &Source,
        doc: &Document,
        markdown: &str,
        title: Option<&str>,
        usage_context: &str,
        usage: &mut UsageReport,
    ) -> Result<()> {
        let chunks = split_text(markdown, self.chunking.chunk_size, self.chunking.chunk_overlap);
        if chunks.is_empty() {
            debug!(doc_id = %doc.id, "no chunks produced, skipping embedding");
            return Ok(());
        }

        debug!(doc_id = %doc.id, chunks = chunks.len(), "embedding chunks");
        let batch = self.embedder.embed(&chunks).await?;
        usage.record(UsageItem::EmbeddingUsage {
            model: self.embedder.model_name().to_string(),
            tokens: batch.tokens,
            context: usage_context.to_string(),
        });

        if batch.vectors.len() != chunks.len() {
            bail!(
                "Embedding count mismatch: {} chunks, {} vectors",
                chunks.len(),
                batch.vectors.len()
            );
        }

        let title = title.unwrap_or(&doc.name);
        let points: Vec<EmbeddingPoint> = chunks
            .into_iter()
            .zip(batch.vectors)
            .map(|(content, vector)| EmbeddingPoint {
                id: uuid::Uuid::new_v4().to_string(),
                vector,
                payload: PointPayload {
                    project_id: source.project_id.clone(),
                    source_id: source.id.clone(),
                    doc_id: doc.id.clone(),
                    content,
                    title: title.to_string(),
                    name: doc.name.clone(),
                },
            })
            .collect();

        debug!(doc_id = %doc.id, points = points.len(), "upserting points");
        self.vectors.upsert(&points).await
    }

    async fn mark_ready(&self, doc: &Document, content: &str) -> Result<()> {
        let applied = self
            .docs
            .update_by_version(
                &doc.id,
                doc.version,
                DocUpdate {
                    status: Some(DocStatus::Ready),
                    content: Some(content.to_string()),
                    error: None,
                },
            )
            .await?;
        if !applied {
            warn!(doc_id = %doc.id, "document was updated by another process, skipping ready update");
        }
        Ok(())
    }
}
