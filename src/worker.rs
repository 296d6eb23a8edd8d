//! The job poller / scheduler loop.
//!
//! A single sequential loop per worker process: claim the next job
//! (deletion strictly prioritized over processing), run it document by
//! document, release it with a final status. [`Worker::tick`] is one
//! scheduler iteration with a typed result so tests drive iterations
//! deterministically; [`Worker::run`] loops forever and contains every
//! failure — nothing escapes the loop.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::{debug, error, info, warn};

use crate::billing::{AuthorizeRequest, Billing, BillingError};
use crate::ingest::Pipelines;
use crate::models::{DocStatus, PointFilter, Source, SourceStatus};
use crate::store::{list_all, DocUpdate, JobRelease, SourceStore};
use crate::vector::VectorStore;

/// Outcome of one scheduler iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    /// No claimable job existed.
    Idle,
    /// A deletion job was claimed and its source fully cascade-removed.
    SourceDeleted,
    /// A processing job ran to completion and was released.
    JobFinished { errors: bool },
    /// The claimed job aborted and was released as `error`.
    JobFailed,
}

struct JobSummary {
    errors: bool,
    billing_error: Option<String>,
}

pub struct Worker {
    sources: Arc<dyn SourceStore>,
    vectors: Arc<dyn VectorStore>,
    billing: Option<Arc<dyn Billing>>,
    pipelines: Pipelines,
    poll_interval: Duration,
    page_size: i64,
}

impl Worker {
    pub fn new(
        sources: Arc<dyn SourceStore>,
        vectors: Arc<dyn VectorStore>,
        billing: Option<Arc<dyn Billing>>,
        pipelines: Pipelines,
        poll_interval: Duration,
        page_size: i64,
    ) -> Self {
        Self {
            sources,
            vectors,
            billing,
            pipelines,
            poll_interval,
            page_size,
        }
    }

    /// Poll forever. Sleeps between polls when idle and after a failed
    /// iteration; a single job's failure never crashes the process.
    pub async fn run(&self) {
        info!("worker started");
        loop {
            match self.tick().await {
                Ok(Tick::Idle) => tokio::time::sleep(self.poll_interval).await,
                Ok(tick) => debug!(?tick, "iteration complete"),
                Err(e) => {
                    error!(error = %e, "scheduler iteration failed");
                    tokio::time::sleep(self.poll_interval).await;
                }
            }
        }
    }

    /// One scheduler iteration: claim at most one job and run it.
    pub async fn tick(&self) -> Result<Tick> {
        // Deletion jobs first: reclaim resources before taking new work.
        if let Some(source) = self.sources.claim_deletion_job().await? {
            return self.delete_source(source).await;
        }

        if let Some(source) = self.sources.claim_pending_job().await? {
            return self.process_job(source).await;
        }

        Ok(Tick::Idle)
    }

    async fn delete_source(&self, source: Source) -> Result<Tick> {
        info!(source_id = %source.id, version = source.version, "starting deletion job");
        match self.cascade(&source).await {
            Ok(()) => {
                info!(source_id = %source.id, "source deleted");
                Ok(Tick::SourceDeleted)
            }
            Err(e) => {
                error!(source_id = %source.id, error = %e, "deletion cascade failed; will retry");
                self.sources
                    .release(
                        &source.id,
                        source.version,
                        JobRelease {
                            status: SourceStatus::Error,
                            error: None,
                            billing_error: None,
                        },
                    )
                    .await?;
                Ok(Tick::JobFailed)
            }
        }
    }

    /// Remove everything owned by the source: vector points filtered by
    /// project+source (no doc filter, one call), then all document rows,
    /// then the source row itself. No release — the row is gone.
    async fn cascade(&self, source: &Source) -> Result<()> {
        self.vectors
            .delete_matching(&PointFilter {
                project_id: source.project_id.clone(),
                source_id: source.id.clone(),
                doc_id: None,
            })
            .await?;
        self.pipelines.docs.delete_by_source(&source.id).await?;
        self.sources.delete(&source.id).await
    }

    async fn process_job(&self, source: Source) -> Result<Tick> {
        info!(source_id = %source.id, version = source.version, "starting processing job");
        let summary = match self.run_job(&source).await {
            Ok(summary) => summary,
            Err(e) => {
                let billing_error = e.downcast_ref::<BillingError>().map(|b| b.0.clone());
                error!(source_id = %source.id, error = %e, "error processing job; will retry");
                self.sources
                    .release(
                        &source.id,
                        source.version,
                        JobRelease {
                            status: SourceStatus::Error,
                            error: None,
                            billing_error,
                        },
                    )
                    .await?;
                return Ok(Tick::JobFailed);
            }
        };

        let release = JobRelease {
            status: if summary.errors {
                SourceStatus::Error
            } else {
                SourceStatus::Ready
            },
            error: summary
                .errors
                .then(|| "There were some errors processing this job".to_string()),
            billing_error: summary.billing_error,
        };
        let applied = self
            .sources
            .release(&source.id, source.version, release)
            .await?;
        if !applied {
            warn!(source_id = %source.id, "job was updated by another process, skipping release");
        }
        Ok(Tick::JobFinished {
            errors: summary.errors,
        })
    }

    async fn run_job(&self, source: &Source) -> Result<JobSummary> {
        let docs = &self.pipelines.docs;

        let pending = list_all(
            docs.as_ref(),
            &source.id,
            &[DocStatus::Pending, DocStatus::Error],
            self.page_size,
        )
        .await?;
        info!(source_id = %source.id, count = pending.len(), "found docs to process");

        // Customer resolution is a job precondition: failing it aborts the
        // job before any document runs.
        let customer_id = match &self.billing {
            Some(billing) => match billing.customer_id_for_project(&source.project_id).await {
                Ok(id) => Some(id),
                Err(e) => {
                    warn!(source_id = %source.id, error = %e, "unable to fetch billing customer id");
                    return Err(anyhow::Error::new(BillingError(
                        "Unable to fetch billing customer id".to_string(),
                    )));
                }
            },
            None => None,
        };

        let mut errors = false;
        let mut billing_error = None;

        for doc in &pending {
            if let (Some(billing), Some(customer_id)) = (&self.billing, &customer_id) {
                let auth = billing
                    .authorize(customer_id, AuthorizeRequest::UseCredits)
                    .await?;
                if !auth.success {
                    let message = auth
                        .error
                        .unwrap_or_else(|| "Unknown billing error".to_string());
                    warn!(doc_id = %doc.id, error = %message, "billing authorization denied");
                    errors = true;
                    billing_error = Some(message);
                    docs.update_by_version(
                        &doc.id,
                        doc.version,
                        DocUpdate {
                            status: Some(DocStatus::Error),
                            content: None,
                            error: Some("Error processing doc".to_string()),
                        },
                    )
                    .await?;
                    // The per-document flush below is skipped; report the
                    // (empty) usage here so every document gets exactly one.
                    billing.log_usage(customer_id, Vec::new()).await?;
                    continue;
                }
            }

            let run = self.pipelines.process_document(source, doc).await;
            if let Err(e) = &run.outcome {
                error!(doc_id = %doc.id, error = %e, "error processing doc");
                errors = true;
                docs.update_by_version(
                    &doc.id,
                    doc.version,
                    DocUpdate {
                        status: Some(DocStatus::Error),
                        content: None,
                        error: Some("Error processing doc".to_string()),
                    },
                )
                .await?;
            }

            // Flush accrued usage after every document, success or failure.
            if let (Some(billing), Some(customer_id)) = (&self.billing, &customer_id) {
                billing
                    .log_usage(customer_id, run.usage.into_items())
                    .await?;
            }
        }

        let deleted = list_all(
            docs.as_ref(),
            &source.id,
            &[DocStatus::Deleted],
            self.page_size,
        )
        .await?;
        info!(source_id = %source.id, count = deleted.len(), "found docs to delete");

        for doc in &deleted {
            if let Err(e) = self.pipelines.delete_document(source, doc).await {
                error!(doc_id = %doc.id, error = %e, "error deleting doc");
                errors = true;
                docs.update_by_version(
                    &doc.id,
                    doc.version,
                    DocUpdate {
                        status: Some(DocStatus::Error),
                        content: None,
                        error: Some("Error deleting doc".to_string()),
                    },
                )
                .await?;
            }
        }

        Ok(JobSummary {
            errors,
            billing_error,
        })
    }
}
