//! SQLite store integration tests against a temporary database file.

use chrono::Utc;
use tempfile::TempDir;

use ragmill::db;
use ragmill::migrate;
use ragmill::models::{DocData, DocStatus, Document, Source, SourceData, SourceStatus};
use ragmill::store::sqlite::SqliteStore;
use ragmill::store::{list_all, DocUpdate, DocumentStore, JobRelease, SourceStore};

async fn setup() -> (TempDir, SqliteStore) {
    let dir = tempfile::tempdir().unwrap();
    let pool = db::connect(&dir.path().join("test.sqlite")).await.unwrap();
    migrate::run_migrations(&pool).await.unwrap();
    (dir, SqliteStore::new(pool))
}

fn make_source(id: &str, status: SourceStatus) -> Source {
    Source {
        id: id.to_string(),
        project_id: "proj-1".to_string(),
        version: 1,
        name: format!("source {}", id),
        data: SourceData::Url {
            url: "https://example.com".to_string(),
        },
        status,
        error: None,
        billing_error: None,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

fn make_doc(id: &str, source_id: &str, status: DocStatus) -> Document {
    Document {
        id: id.to_string(),
        source_id: source_id.to_string(),
        version: 1,
        name: format!("doc {}", id),
        data: DocData::Text {
            content: "some text".to_string(),
        },
        status,
        content: None,
        error: None,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

#[tokio::test]
async fn test_source_round_trip() {
    let (_dir, store) = setup().await;
    let source = make_source("src-1", SourceStatus::Pending);
    SourceStore::create(&store, &source).await.unwrap();

    let fetched = SourceStore::fetch(&store, "src-1").await.unwrap().unwrap();
    assert_eq!(fetched.id, "src-1");
    assert_eq!(fetched.project_id, "proj-1");
    assert_eq!(fetched.version, 1);
    assert_eq!(fetched.status, SourceStatus::Pending);
    assert_eq!(
        fetched.data,
        SourceData::Url {
            url: "https://example.com".to_string()
        }
    );
}

#[tokio::test]
async fn test_claim_pending_marks_processing_and_bumps_version() {
    let (_dir, store) = setup().await;
    SourceStore::create(&store, &make_source("src-1", SourceStatus::Pending))
        .await
        .unwrap();

    let claimed = store.claim_pending_job().await.unwrap().unwrap();
    assert_eq!(claimed.id, "src-1");
    assert_eq!(claimed.status, SourceStatus::Processing);
    assert_eq!(claimed.version, 2);

    let stored = SourceStore::fetch(&store, "src-1").await.unwrap().unwrap();
    assert_eq!(stored.status, SourceStatus::Processing);
    assert_eq!(stored.version, 2);

    // A processing source is no longer claimable.
    assert!(store.claim_pending_job().await.unwrap().is_none());
}

#[tokio::test]
async fn test_claim_pending_includes_error_sources() {
    let (_dir, store) = setup().await;
    SourceStore::create(&store, &make_source("src-1", SourceStatus::Error))
        .await
        .unwrap();

    let claimed = store.claim_pending_job().await.unwrap().unwrap();
    assert_eq!(claimed.id, "src-1");
    assert_eq!(claimed.status, SourceStatus::Processing);
}

#[tokio::test]
async fn test_claim_deletion_keeps_deleted_status() {
    let (_dir, store) = setup().await;
    SourceStore::create(&store, &make_source("src-1", SourceStatus::Deleted))
        .await
        .unwrap();

    let claimed = store.claim_deletion_job().await.unwrap().unwrap();
    assert_eq!(claimed.status, SourceStatus::Deleted);
    assert_eq!(claimed.version, 2);

    let stored = SourceStore::fetch(&store, "src-1").await.unwrap().unwrap();
    assert_eq!(stored.status, SourceStatus::Deleted);
    assert_eq!(stored.version, 2);
}

#[tokio::test]
async fn test_deletion_claim_ignores_pending_sources() {
    let (_dir, store) = setup().await;
    SourceStore::create(&store, &make_source("src-1", SourceStatus::Pending))
        .await
        .unwrap();
    assert!(store.claim_deletion_job().await.unwrap().is_none());
}

#[tokio::test]
async fn test_release_is_version_checked() {
    let (_dir, store) = setup().await;
    SourceStore::create(&store, &make_source("src-1", SourceStatus::Pending))
        .await
        .unwrap();
    let claimed = store.claim_pending_job().await.unwrap().unwrap();

    // Releasing with the pre-claim version is dropped.
    let stale = store
        .release(
            "src-1",
            1,
            JobRelease {
                status: SourceStatus::Ready,
                error: None,
                billing_error: None,
            },
        )
        .await
        .unwrap();
    assert!(!stale);

    let applied = store
        .release(
            "src-1",
            claimed.version,
            JobRelease {
                status: SourceStatus::Error,
                error: Some("There were some errors processing this job".to_string()),
                billing_error: Some("insufficient credits".to_string()),
            },
        )
        .await
        .unwrap();
    assert!(applied);

    let stored = SourceStore::fetch(&store, "src-1").await.unwrap().unwrap();
    assert_eq!(stored.status, SourceStatus::Error);
    assert_eq!(
        stored.error.as_deref(),
        Some("There were some errors processing this job")
    );
    assert_eq!(stored.billing_error.as_deref(), Some("insufficient credits"));
    assert_eq!(stored.version, claimed.version + 1);
}

#[tokio::test]
async fn test_doc_update_is_version_checked() {
    let (_dir, store) = setup().await;
    DocumentStore::create(&store, &make_doc("doc-1", "src-1", DocStatus::Pending))
        .await
        .unwrap();

    let applied = store
        .update_by_version(
            "doc-1",
            1,
            DocUpdate {
                status: Some(DocStatus::Ready),
                content: Some("extracted markdown".to_string()),
                error: None,
            },
        )
        .await
        .unwrap();
    assert!(applied);

    // Same version again: stale.
    let stale = store
        .update_by_version(
            "doc-1",
            1,
            DocUpdate {
                status: Some(DocStatus::Error),
                content: None,
                error: Some("should not apply".to_string()),
            },
        )
        .await
        .unwrap();
    assert!(!stale);

    let stored = DocumentStore::fetch(&store, "doc-1").await.unwrap().unwrap();
    assert_eq!(stored.status, DocStatus::Ready);
    assert_eq!(stored.content.as_deref(), Some("extracted markdown"));
    assert!(stored.error.is_none());
    assert_eq!(stored.version, 2);
}

#[tokio::test]
async fn test_doc_update_leaves_unset_fields() {
    let (_dir, store) = setup().await;
    let mut doc = make_doc("doc-1", "src-1", DocStatus::Ready);
    doc.content = Some("original content".to_string());
    DocumentStore::create(&store, &doc).await.unwrap();

    store
        .update_by_version(
            "doc-1",
            1,
            DocUpdate {
                status: Some(DocStatus::Error),
                content: None,
                error: Some("Error processing doc".to_string()),
            },
        )
        .await
        .unwrap();

    let stored = DocumentStore::fetch(&store, "doc-1").await.unwrap().unwrap();
    assert_eq!(stored.status, DocStatus::Error);
    assert_eq!(stored.content.as_deref(), Some("original content"));
}

#[tokio::test]
async fn test_doc_listing_paginates_by_id() {
    let (_dir, store) = setup().await;
    for i in 0..5 {
        DocumentStore::create(
            &store,
            &make_doc(&format!("doc-{}", i), "src-1", DocStatus::Pending),
        )
        .await
        .unwrap();
    }
    // A doc of another source and one with another status must not appear.
    DocumentStore::create(&store, &make_doc("doc-other", "src-2", DocStatus::Pending))
        .await
        .unwrap();
    DocumentStore::create(&store, &make_doc("doc-ready", "src-1", DocStatus::Ready))
        .await
        .unwrap();

    let first = store
        .list("src-1", &[DocStatus::Pending], None, 2)
        .await
        .unwrap();
    assert_eq!(first.items.len(), 2);
    assert_eq!(first.items[0].id, "doc-0");
    assert_eq!(first.items[1].id, "doc-1");
    let cursor = first.next_cursor.clone().unwrap();

    let second = store
        .list("src-1", &[DocStatus::Pending], Some(cursor), 2)
        .await
        .unwrap();
    assert_eq!(second.items[0].id, "doc-2");

    let all = list_all(&store, "src-1", &[DocStatus::Pending], 2)
        .await
        .unwrap();
    assert_eq!(all.len(), 5);
    assert!(all.windows(2).all(|w| w[0].id < w[1].id));
}

#[tokio::test]
async fn test_doc_listing_filters_multiple_statuses() {
    let (_dir, store) = setup().await;
    DocumentStore::create(&store, &make_doc("doc-a", "src-1", DocStatus::Pending))
        .await
        .unwrap();
    DocumentStore::create(&store, &make_doc("doc-b", "src-1", DocStatus::Error))
        .await
        .unwrap();
    DocumentStore::create(&store, &make_doc("doc-c", "src-1", DocStatus::Deleted))
        .await
        .unwrap();

    let page = store
        .list("src-1", &[DocStatus::Pending, DocStatus::Error], None, 50)
        .await
        .unwrap();
    assert_eq!(page.items.len(), 2);
    assert!(page.next_cursor.is_none());
}

#[tokio::test]
async fn test_delete_by_source_removes_only_that_source() {
    let (_dir, store) = setup().await;
    DocumentStore::create(&store, &make_doc("doc-a", "src-1", DocStatus::Ready))
        .await
        .unwrap();
    DocumentStore::create(&store, &make_doc("doc-b", "src-1", DocStatus::Ready))
        .await
        .unwrap();
    DocumentStore::create(&store, &make_doc("doc-c", "src-2", DocStatus::Ready))
        .await
        .unwrap();

    store.delete_by_source("src-1").await.unwrap();

    assert!(DocumentStore::fetch(&store, "doc-a").await.unwrap().is_none());
    assert!(DocumentStore::fetch(&store, "doc-b").await.unwrap().is_none());
    assert!(DocumentStore::fetch(&store, "doc-c").await.unwrap().is_some());
}

#[tokio::test]
async fn test_source_delete_removes_row() {
    let (_dir, store) = setup().await;
    SourceStore::create(&store, &make_source("src-1", SourceStatus::Deleted))
        .await
        .unwrap();
    SourceStore::delete(&store, "src-1").await.unwrap();
    assert!(SourceStore::fetch(&store, "src-1").await.unwrap().is_none());
}
