//! SQLite [`SourceStore`]/[`DocumentStore`] implementation.
//!
//! Claim operations run in a transaction: the candidate row is selected,
//! then marked with a version-guarded UPDATE. If the guard misses (another
//! worker claimed first), the claim returns `None` and the caller polls
//! again. Tagged payloads are stored as JSON TEXT columns.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::models::{DocData, DocStatus, Document, Source, SourceData, SourceStatus};

use super::{DocPage, DocUpdate, DocumentStore, JobRelease, SourceStore};

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

const SOURCE_COLUMNS: &str =
    "id, project_id, version, name, data, status, error, billing_error, created_at, updated_at";
const DOC_COLUMNS: &str =
    "id, source_id, version, name, data, status, content, error, created_at, updated_at";

fn timestamp(ts: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(ts, 0).unwrap_or_default()
}

fn source_status(s: &str) -> Result<SourceStatus> {
    Ok(match s {
        "pending" => SourceStatus::Pending,
        "processing" => SourceStatus::Processing,
        "ready" => SourceStatus::Ready,
        "error" => SourceStatus::Error,
        "deleted" => SourceStatus::Deleted,
        other => anyhow::bail!("Unknown source status in database: '{}'", other),
    })
}

fn doc_status(s: &str) -> Result<DocStatus> {
    Ok(match s {
        "pending" => DocStatus::Pending,
        "ready" => DocStatus::Ready,
        "error" => DocStatus::Error,
        "deleted" => DocStatus::Deleted,
        other => anyhow::bail!("Unknown document status in database: '{}'", other),
    })
}

fn row_to_source(row: &SqliteRow) -> Result<Source> {
    let data: String = row.try_get("data")?;
    let status: String = row.try_get("status")?;
    Ok(Source {
        id: row.try_get("id")?,
        project_id: row.try_get("project_id")?,
        version: row.try_get("version")?,
        name: row.try_get("name")?,
        data: serde_json::from_str::<SourceData>(&data).context("invalid source data payload")?,
        status: source_status(&status)?,
        error: row.try_get("error")?,
        billing_error: row.try_get("billing_error")?,
        created_at: timestamp(row.try_get("created_at")?),
        updated_at: timestamp(row.try_get("updated_at")?),
    })
}

fn row_to_document(row: &SqliteRow) -> Result<Document> {
    let data: String = row.try_get("data")?;
    let status: String = row.try_get("status")?;
    Ok(Document {
        id: row.try_get("id")?,
        source_id: row.try_get("source_id")?,
        version: row.try_get("version")?,
        name: row.try_get("name")?,
        data: serde_json::from_str::<DocData>(&data).context("invalid document data payload")?,
        status: doc_status(&status)?,
        content: row.try_get("content")?,
        error: row.try_get("error")?,
        created_at: timestamp(row.try_get("created_at")?),
        updated_at: timestamp(row.try_get("updated_at")?),
    })
}

#[async_trait]
impl SourceStore for SqliteStore {
    async fn create(&self, source: &Source) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sources (id, project_id, version, name, data, status, error, billing_error, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&source.id)
        .bind(&source.project_id)
        .bind(source.version)
        .bind(&source.name)
        .bind(serde_json::to_string(&source.data)?)
        .bind(source.status.as_str())
        .bind(&source.error)
        .bind(&source.billing_error)
        .bind(source.created_at.timestamp())
        .bind(source.updated_at.timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn fetch(&self, id: &str) -> Result<Option<Source>> {
        let row = sqlx::query(&format!("SELECT {} FROM sources WHERE id = ?", SOURCE_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_source).transpose()
    }

    async fn claim_deletion_job(&self) -> Result<Option<Source>> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(&format!(
            "SELECT {} FROM sources WHERE status = 'deleted' ORDER BY updated_at, id LIMIT 1",
            SOURCE_COLUMNS
        ))
        .fetch_optional(&mut *tx)
        .await?;

        let mut source = match row.as_ref().map(row_to_source).transpose()? {
            Some(s) => s,
            None => return Ok(None),
        };

        let result = sqlx::query(
            "UPDATE sources SET version = version + 1, updated_at = ? WHERE id = ? AND version = ?",
        )
        .bind(Utc::now().timestamp())
        .bind(&source.id)
        .bind(source.version)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }
        source.version += 1;
        Ok(Some(source))
    }

    async fn claim_pending_job(&self) -> Result<Option<Source>> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(&format!(
            "SELECT {} FROM sources WHERE status IN ('pending', 'error') ORDER BY updated_at, id LIMIT 1",
            SOURCE_COLUMNS
        ))
        .fetch_optional(&mut *tx)
        .await?;

        let mut source = match row.as_ref().map(row_to_source).transpose()? {
            Some(s) => s,
            None => return Ok(None),
        };

        let result = sqlx::query(
            "UPDATE sources SET status = 'processing', version = version + 1, updated_at = ? WHERE id = ? AND version = ?",
        )
        .bind(Utc::now().timestamp())
        .bind(&source.id)
        .bind(source.version)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }
        source.status = SourceStatus::Processing;
        source.version += 1;
        Ok(Some(source))
    }

    async fn release(&self, id: &str, version: i64, release: JobRelease) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE sources
            SET status = ?, error = ?, billing_error = ?, version = version + 1, updated_at = ?
            WHERE id = ? AND version = ?
            "#,
        )
        .bind(release.status.as_str())
        .bind(&release.error)
        .bind(&release.billing_error)
        .bind(Utc::now().timestamp())
        .bind(id)
        .bind(version)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM sources WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for SqliteStore {
    async fn create(&self, doc: &Document) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO documents (id, source_id, version, name, data, status, content, error, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&doc.id)
        .bind(&doc.source_id)
        .bind(doc.version)
        .bind(&doc.name)
        .bind(serde_json::to_string(&doc.data)?)
        .bind(doc.status.as_str())
        .bind(&doc.content)
        .bind(&doc.error)
        .bind(doc.created_at.timestamp())
        .bind(doc.updated_at.timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn fetch(&self, id: &str) -> Result<Option<Document>> {
        let row = sqlx::query(&format!("SELECT {} FROM documents WHERE id = ?", DOC_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_document).transpose()
    }

    async fn list(
        &self,
        source_id: &str,
        statuses: &[DocStatus],
        cursor: Option<String>,
        limit: i64,
    ) -> Result<DocPage> {
        if statuses.is_empty() {
            return Ok(DocPage {
                items: Vec::new(),
                next_cursor: None,
            });
        }

        let placeholders = vec!["?"; statuses.len()].join(", ");
        let sql = format!(
            "SELECT {} FROM documents WHERE source_id = ? AND status IN ({}) AND id > ? ORDER BY id LIMIT ?",
            DOC_COLUMNS, placeholders
        );

        let mut query = sqlx::query(&sql).bind(source_id);
        for status in statuses {
            query = query.bind(status.as_str());
        }
        let limit = limit.max(1);
        // Fetch one extra row to detect whether another page exists.
        query = query.bind(cursor.unwrap_or_default()).bind(limit + 1);

        let rows = query.fetch_all(&self.pool).await?;
        let mut items = rows
            .iter()
            .map(row_to_document)
            .collect::<Result<Vec<_>>>()?;

        let next_cursor = if items.len() as i64 > limit {
            items.truncate(limit as usize);
            items.last().map(|d| d.id.clone())
        } else {
            None
        };

        Ok(DocPage { items, next_cursor })
    }

    async fn update_by_version(&self, id: &str, version: i64, update: DocUpdate) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE documents
            SET status = COALESCE(?, status),
                content = COALESCE(?, content),
                error = COALESCE(?, error),
                version = version + 1,
                updated_at = ?
            WHERE id = ? AND version = ?
            "#,
        )
        .bind(update.status.map(|s| s.as_str()))
        .bind(&update.content)
        .bind(&update.error)
        .bind(Utc::now().timestamp())
        .bind(id)
        .bind(version)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM documents WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete_by_source(&self, source_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM documents WHERE source_id = ?")
            .bind(source_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
