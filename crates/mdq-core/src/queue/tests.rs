//! Scheduler tests against fake downloaders and the in-memory store.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::downloader::{Downloader, ProgressSender};
use crate::error::{DownloadCancelled, QueueError};
use crate::store::db::open_memory;
use crate::store::{JobStatus, Settings, Store};

use super::DownloadQueue;

/// Fake downloader that holds every download open until a permit is
/// released on `gate`, tracking the running count and its high-water
/// mark.
struct GatedDownloader {
    gate: Semaphore,
    running: AtomicUsize,
    peak: AtomicUsize,
}

impl GatedDownloader {
    fn new(initial_permits: usize) -> Arc<Self> {
        Arc::new(Self {
            gate: Semaphore::new(initial_permits),
            running: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        })
    }

    fn release_one(&self) {
        self.gate.add_permits(1);
    }

    fn running(&self) -> usize {
        self.running.load(Ordering::SeqCst)
    }

    fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Downloader for GatedDownloader {
    async fn download(
        &self,
        _url: &str,
        _progress: ProgressSender,
        cancel: CancellationToken,
    ) -> Result<String> {
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        let result = tokio::select! {
            permit = self.gate.acquire() => {
                permit.unwrap().forget();
                Ok("clip.mp4".to_string())
            }
            _ = cancel.cancelled() => Err(DownloadCancelled.into()),
        };
        self.running.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

/// Fake downloader that fails every attempt.
struct FailingDownloader;

#[async_trait]
impl Downloader for FailingDownloader {
    async fn download(
        &self,
        _url: &str,
        _progress: ProgressSender,
        _cancel: CancellationToken,
    ) -> Result<String> {
        anyhow::bail!("simulated network failure")
    }
}

/// Poll a condition for up to two seconds.
async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

async fn queue_with(
    downloader: Arc<dyn Downloader>,
    max_concurrent: usize,
) -> (Arc<DownloadQueue>, Store) {
    let store = open_memory().await.unwrap();
    store
        .save_settings(&Settings {
            max_concurrent,
            sync_destination: String::new(),
        })
        .await
        .unwrap();
    let queue = DownloadQueue::start(store.clone(), downloader, 3600)
        .await
        .unwrap();
    (queue, store)
}

fn urls(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

#[tokio::test]
async fn empty_submission_is_rejected() {
    let (queue, _store) = queue_with(GatedDownloader::new(0), 2).await;
    let err = queue.submit(&urls(&["", "   "])).await.unwrap_err();
    assert!(matches!(err, QueueError::Validation(_)));
    let err = queue.submit(&[]).await.unwrap_err();
    assert!(matches!(err, QueueError::Validation(_)));
}

#[tokio::test]
async fn duplicate_urls_collapse_to_one_job() {
    let (queue, _store) = queue_with(GatedDownloader::new(0), 1).await;

    // Same content URL twice in one batch, differing only in tracking noise.
    let outcome = queue
        .submit(&urls(&[
            "https://example.com/v?id=1&utm_source=share",
            "https://example.com/v?id=1",
        ]))
        .await
        .unwrap();
    assert_eq!(outcome.added.len(), 1);
    assert_eq!(outcome.skipped.len(), 1);
    assert_eq!(outcome.skipped[0].reason, "already queued or downloading");

    // And again across batches while the job is still active.
    let outcome = queue
        .submit(&urls(&["https://example.com/v?id=1"]))
        .await
        .unwrap();
    assert!(outcome.added.is_empty());
    assert_eq!(outcome.skipped.len(), 1);
}

#[tokio::test]
async fn resubmit_of_finished_url_points_at_prior_job() {
    let downloader = GatedDownloader::new(10);
    let (queue, store) = queue_with(downloader, 2).await;

    let outcome = queue.submit(&urls(&["https://example.com/v"])).await.unwrap();
    let id = outcome.added[0].id.clone();
    assert!(
        eventually(|| async {
            matches!(
                store.get_job(&id).await.unwrap(),
                Some(j) if j.status == JobStatus::Done
            )
        })
        .await
    );

    let outcome = queue.submit(&urls(&["https://example.com/v"])).await.unwrap();
    assert!(outcome.added.is_empty());
    let skipped = &outcome.skipped[0];
    assert_eq!(skipped.reason, "already downloaded");
    assert_eq!(skipped.job_id.as_deref(), Some(id.as_str()));
    assert!(skipped.finished_at.is_some());
}

#[tokio::test]
async fn concurrency_never_exceeds_max() {
    let downloader = GatedDownloader::new(0);
    let (queue, store) = queue_with(Arc::clone(&downloader) as Arc<dyn Downloader>, 2).await;

    queue
        .submit(&urls(&[
            "https://example.com/1",
            "https://example.com/2",
            "https://example.com/3",
            "https://example.com/4",
            "https://example.com/5",
        ]))
        .await
        .unwrap();

    let d = Arc::clone(&downloader);
    assert!(eventually(|| async { d.running() == 2 }).await);

    for _ in 0..5 {
        downloader.release_one();
    }
    let s = store.clone();
    assert!(
        eventually(|| async {
            let (jobs, _) = s.history(10, 0).await.unwrap();
            jobs.iter().all(|j| j.status == JobStatus::Done)
        })
        .await
    );
    assert_eq!(downloader.peak(), 2);
}

#[tokio::test]
async fn shrinking_capacity_throttles_without_preempting() {
    let downloader = GatedDownloader::new(0);
    let (queue, store) = queue_with(Arc::clone(&downloader) as Arc<dyn Downloader>, 2).await;

    let outcome = queue
        .submit(&urls(&[
            "https://example.com/1",
            "https://example.com/2",
            "https://example.com/3",
        ]))
        .await
        .unwrap();
    let third = outcome.added[2].id.clone();

    let d = Arc::clone(&downloader);
    assert!(eventually(|| async { d.running() == 2 }).await);

    queue
        .update_settings(Settings {
            max_concurrent: 1,
            sync_destination: String::new(),
        })
        .await
        .unwrap();

    // Both in-flight downloads keep running.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(downloader.running(), 2);

    // After one finishes the pool is still over the new limit, so the
    // third job must not start.
    downloader.release_one();
    let d = Arc::clone(&downloader);
    assert!(eventually(|| async { d.running() == 1 }).await);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(downloader.running(), 1);
    assert_eq!(
        store.get_job(&third).await.unwrap().unwrap().status,
        JobStatus::Queued
    );
    assert_eq!(downloader.peak(), 2);
}

#[tokio::test]
async fn cancel_of_running_download_removes_the_job() {
    let downloader = GatedDownloader::new(0);
    let (queue, store) = queue_with(Arc::clone(&downloader) as Arc<dyn Downloader>, 1).await;

    let outcome = queue.submit(&urls(&["https://example.com/v"])).await.unwrap();
    let id = outcome.added[0].id.clone();
    let d = Arc::clone(&downloader);
    assert!(eventually(|| async { d.running() == 1 }).await);

    queue.cancel_or_delete(&id).await.unwrap();
    let s = store.clone();
    let gone = id.clone();
    assert!(eventually(|| async { s.get_job(&gone).await.unwrap().is_none() }).await);
    assert_eq!(downloader.running(), 0);

    // The key is free again for a fresh submission.
    let outcome = queue.submit(&urls(&["https://example.com/v"])).await.unwrap();
    assert_eq!(outcome.added.len(), 1);
}

#[tokio::test]
async fn cancel_of_queued_job_removes_it_before_it_starts() {
    let downloader = GatedDownloader::new(0);
    let (queue, store) = queue_with(Arc::clone(&downloader) as Arc<dyn Downloader>, 1).await;

    let outcome = queue
        .submit(&urls(&["https://example.com/1", "https://example.com/2"]))
        .await
        .unwrap();
    let queued = outcome.added[1].id.clone();
    let d = Arc::clone(&downloader);
    assert!(eventually(|| async { d.running() == 1 }).await);

    queue.cancel_or_delete(&queued).await.unwrap();
    assert!(store.get_job(&queued).await.unwrap().is_none());

    // Finishing the first job must not start the removed one.
    downloader.release_one();
    let d = Arc::clone(&downloader);
    assert!(eventually(|| async { d.running() == 0 }).await);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(downloader.running(), 0);
}

#[tokio::test]
async fn cancel_of_unknown_job_is_not_found() {
    let (queue, _store) = queue_with(GatedDownloader::new(0), 1).await;
    let err = queue.cancel_or_delete("no-such-id").await.unwrap_err();
    assert!(matches!(err, QueueError::NotFound(_)));
}

#[tokio::test]
async fn failed_download_records_the_error() {
    let (queue, store) = queue_with(Arc::new(FailingDownloader), 1).await;
    let outcome = queue.submit(&urls(&["https://example.com/v"])).await.unwrap();
    let id = outcome.added[0].id.clone();

    let s = store.clone();
    let target = id.clone();
    assert!(
        eventually(|| async {
            matches!(
                s.get_job(&target).await.unwrap(),
                Some(j) if j.status == JobStatus::Failed
            )
        })
        .await
    );
    let job = store.get_job(&id).await.unwrap().unwrap();
    assert!(job.error.as_deref().unwrap().contains("simulated network failure"));
}

#[tokio::test]
async fn retry_requeues_only_failed_jobs() {
    let (queue, store) = queue_with(Arc::new(FailingDownloader), 1).await;
    let outcome = queue.submit(&urls(&["https://example.com/v"])).await.unwrap();
    let id = outcome.added[0].id.clone();

    let s = store.clone();
    let target = id.clone();
    assert!(
        eventually(|| async {
            matches!(
                s.get_job(&target).await.unwrap(),
                Some(j) if j.status == JobStatus::Failed
            )
        })
        .await
    );

    let retried = queue.retry(&id).await.unwrap();
    assert_eq!(retried.retries, 1);
    assert_eq!(retried.error, None);

    // It fails again; a second retry bumps the count again.
    let s = store.clone();
    let target = id.clone();
    assert!(
        eventually(|| async {
            matches!(
                s.get_job(&target).await.unwrap(),
                Some(j) if j.status == JobStatus::Failed && j.retries == 1
            )
        })
        .await
    );

    let err = queue.retry("missing-id").await.unwrap_err();
    assert!(matches!(err, QueueError::NotFound(_)));
}

#[tokio::test]
async fn retry_of_non_failed_job_is_a_state_error() {
    let (queue, _store) = queue_with(GatedDownloader::new(0), 1).await;
    let outcome = queue
        .submit(&urls(&["https://example.com/1", "https://example.com/2"]))
        .await
        .unwrap();
    // The second job stays queued behind the single slot.
    let err = queue.retry(&outcome.added[1].id).await.unwrap_err();
    assert!(matches!(err, QueueError::InvalidState { .. }));
}

#[tokio::test]
async fn redownload_creates_a_superseding_job() {
    let downloader = GatedDownloader::new(10);
    let (queue, store) = queue_with(downloader, 2).await;

    let outcome = queue.submit(&urls(&["https://example.com/v"])).await.unwrap();
    let original = outcome.added[0].id.clone();
    let s = store.clone();
    let target = original.clone();
    assert!(
        eventually(|| async {
            matches!(
                s.get_job(&target).await.unwrap(),
                Some(j) if j.status == JobStatus::Done
            )
        })
        .await
    );

    let fresh = queue.redownload(&original).await.unwrap();
    assert_ne!(fresh.id, original);
    assert_eq!(fresh.url, "https://example.com/v");

    // The original record is untouched.
    let old = store.get_job(&original).await.unwrap().unwrap();
    assert_eq!(old.status, JobStatus::Done);

    let s = store.clone();
    let target = fresh.id.clone();
    assert!(
        eventually(|| async {
            matches!(
                s.get_job(&target).await.unwrap(),
                Some(j) if j.status == JobStatus::Done
            )
        })
        .await
    );
}

#[tokio::test]
async fn redownload_of_unfinished_job_is_rejected() {
    let (queue, _store) = queue_with(GatedDownloader::new(0), 1).await;
    let outcome = queue
        .submit(&urls(&["https://example.com/1", "https://example.com/2"]))
        .await
        .unwrap();
    // The second job is still queued.
    let err = queue.redownload(&outcome.added[1].id).await.unwrap_err();
    assert!(matches!(err, QueueError::InvalidState { .. }));
    let err = queue.redownload("no-such-id").await.unwrap_err();
    assert!(matches!(err, QueueError::NotFound(_)));
}

#[tokio::test]
async fn settings_update_rejects_zero_concurrency() {
    let (queue, store) = queue_with(GatedDownloader::new(0), 2).await;
    let err = queue
        .update_settings(Settings {
            max_concurrent: 0,
            sync_destination: String::new(),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, QueueError::Validation(_)));

    // Nothing was persisted.
    assert_eq!(store.load_settings().await.unwrap().max_concurrent, 2);
    assert_eq!(queue.settings().await.max_concurrent, 2);
}

#[tokio::test]
async fn interrupted_jobs_fail_and_queued_jobs_resume_on_start() {
    let store = open_memory().await.unwrap();
    let stuck = store.add_job("https://example.com/1", "https://example.com/1").await.unwrap();
    store.mark_downloading(&stuck.id).await.unwrap();
    let waiting = store.add_job("https://example.com/2", "https://example.com/2").await.unwrap();

    let downloader = GatedDownloader::new(10);
    let queue = DownloadQueue::start(store.clone(), downloader, 3600)
        .await
        .unwrap();

    let s = store.clone();
    let target = waiting.id.clone();
    assert!(
        eventually(|| async {
            matches!(
                s.get_job(&target).await.unwrap(),
                Some(j) if j.status == JobStatus::Done
            )
        })
        .await
    );
    let j = store.get_job(&stuck.id).await.unwrap().unwrap();
    assert_eq!(j.status, JobStatus::Failed);
    assert_eq!(j.error.as_deref(), Some("interrupted by shutdown"));
    drop(queue);
}
