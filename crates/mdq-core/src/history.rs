//! History pagination and export/import.
//!
//! Export is the full job table in its camelCase wire form; import
//! merges records by id, never overwriting, and marks newcomers as
//! `imported` until the file sweep verifies them on disk.

use serde::Serialize;

use crate::error::QueueError;
use crate::normalize;
use crate::store::{Job, Store};

const MAX_PAGE_SIZE: i64 = 500;

/// One page of history, newest first by creation time.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryPage {
    pub items: Vec<Job>,
    pub total: i64,
    pub page: i64,
    pub limit: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportSummary {
    pub imported: usize,
    pub skipped: usize,
}

/// Fetch one history page. Page numbers are 1-based; out-of-range
/// values are clamped rather than rejected, so a stale pager link
/// returns an empty page instead of an error.
pub async fn list(store: &Store, page: i64, limit: i64) -> Result<HistoryPage, QueueError> {
    let page = page.max(1);
    let limit = limit.clamp(1, MAX_PAGE_SIZE);
    let (items, total) = store.history(limit, (page - 1) * limit).await?;
    Ok(HistoryPage {
        items,
        total,
        page,
        limit,
    })
}

/// Export every job, newest first.
pub async fn export(store: &Store) -> Result<Vec<Job>, QueueError> {
    Ok(store.export_all().await?)
}

/// Merge exported records into the store. Records whose id already
/// exists are skipped; everything else is inserted with status
/// `imported` and its retry count reset. Records from older exports may
/// lack a normalized URL, in which case one is computed here so the
/// dedup view covers imports too.
pub async fn import(store: &Store, records: &[Job]) -> Result<ImportSummary, QueueError> {
    let mut summary = ImportSummary {
        imported: 0,
        skipped: 0,
    };

    for record in records {
        if record.id.is_empty() || record.url.is_empty() {
            summary.skipped += 1;
            continue;
        }
        if store.job_exists(&record.id).await? {
            summary.skipped += 1;
            continue;
        }

        let mut record = record.clone();
        if record.normalized_url.is_empty() {
            record.normalized_url = normalize::normalize_url(&record.url);
        }
        store.import_job(&record).await?;
        summary.imported += 1;
    }

    tracing::info!(
        imported = summary.imported,
        skipped = summary.skipped,
        "history import finished"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::db::open_memory;
    use crate::store::JobStatus;

    #[tokio::test]
    async fn pages_are_newest_first_and_clamped() {
        let store = open_memory().await.unwrap();
        for t in [1_000i64, 2_000, 3_000, 4_000, 5_000] {
            store
                .add_job_backdated(&format!("https://a.com/{t}"), &format!("https://a.com/{t}"), t)
                .await
                .unwrap();
        }

        let page = list(&store, 1, 2).await.unwrap();
        assert_eq!(page.total, 5);
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.items[0].created_at, 5_000);
        assert_eq!(page.items[1].created_at, 4_000);

        let page = list(&store, 3, 2).await.unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].created_at, 1_000);

        // Out-of-range paging yields an empty page, not an error.
        let page = list(&store, 99, 2).await.unwrap();
        assert!(page.items.is_empty());
        assert_eq!(page.total, 5);

        // Nonsense paging parameters are clamped.
        let page = list(&store, 0, 0).await.unwrap();
        assert_eq!(page.page, 1);
        assert_eq!(page.limit, 1);
    }

    #[tokio::test]
    async fn import_merges_without_overwriting() {
        let store = open_memory().await.unwrap();
        let existing = store.add_job("https://a.com/v", "https://a.com/v").await.unwrap();

        let exported = export(&store).await.unwrap();
        let mut foreign = exported[0].clone();
        foreign.id = "foreign-id".to_string();
        foreign.url = "https://b.com/v?utm_source=x".to_string();
        foreign.normalized_url = String::new();
        foreign.status = JobStatus::Done;
        foreign.retries = 3;

        let summary = import(&store, &[exported[0].clone(), foreign]).await.unwrap();
        assert_eq!(summary.imported, 1);
        assert_eq!(summary.skipped, 1);

        // The existing record was not touched.
        let kept = store.get_job(&existing.id).await.unwrap().unwrap();
        assert_eq!(kept.status, JobStatus::Queued);

        // The newcomer arrived as `imported` with a computed dedup key.
        let added = store.get_job("foreign-id").await.unwrap().unwrap();
        assert_eq!(added.status, JobStatus::Imported);
        assert_eq!(added.retries, 0);
        assert_eq!(added.normalized_url, "https://b.com/v");
    }

    #[tokio::test]
    async fn reimport_of_same_export_is_a_noop() {
        let store = open_memory().await.unwrap();
        store.add_job("https://a.com/1", "https://a.com/1").await.unwrap();
        store.add_job("https://a.com/2", "https://a.com/2").await.unwrap();

        let exported = export(&store).await.unwrap();
        let summary = import(&store, &exported).await.unwrap();
        assert_eq!(summary.imported, 0);
        assert_eq!(summary.skipped, 2);
    }

    #[tokio::test]
    async fn malformed_records_are_skipped() {
        let store = open_memory().await.unwrap();
        let mut record = store.add_job("https://a.com/1", "https://a.com/1").await.unwrap();
        store.delete_job(&record.id).await.unwrap();
        record.url = String::new();

        let summary = import(&store, &[record]).await.unwrap();
        assert_eq!(summary.imported, 0);
        assert_eq!(summary.skipped, 1);
    }
}
