//! Dispatch loop and worker lifecycle.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::downloader::Progress;
use crate::error::DownloadCancelled;
use crate::store::{JobId, JobStatus};

use super::DownloadQueue;

/// RAII slot release: whatever path the worker exits through, the slot
/// frees and the dispatcher wakes.
struct SlotGuard {
    queue: Arc<DownloadQueue>,
    id: JobId,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.queue.active().remove(&self.id);
        self.queue.wake();
    }
}

impl DownloadQueue {
    /// Fill free worker slots from the pending queue, strictly in FIFO
    /// order. Only the dispatch task calls this, so the capacity check
    /// and the slot claim below cannot interleave with another dispatch.
    pub(super) async fn dispatch(self: &Arc<Self>) {
        loop {
            let max = self.settings.read().await.max_concurrent;
            if self.active().len() >= max {
                return;
            }
            let Some(id) = self.pending().pop_front() else {
                return;
            };

            // The id may be stale: the job can have been cancelled (row
            // deleted) while it sat in the queue.
            let job = match self.store.get_job(&id).await {
                Ok(Some(job)) if job.status == JobStatus::Queued => job,
                Ok(_) => continue,
                Err(e) => {
                    tracing::error!(job = %id, "dispatch lookup failed: {e:#}");
                    continue;
                }
            };

            let token = CancellationToken::new();
            self.active().insert(id.clone(), token.clone());
            if let Err(e) = self.store.mark_downloading(&id).await {
                tracing::error!(job = %id, "failed to mark downloading: {e:#}");
                self.active().remove(&id);
                continue;
            }
            tracing::info!(job = %id, url = %job.url, "download started");

            let queue = Arc::clone(self);
            tokio::spawn(async move {
                queue.run_worker(id, job.url, token).await;
            });
        }
    }

    async fn run_worker(self: Arc<Self>, id: JobId, url: String, cancel: CancellationToken) {
        let _slot = SlotGuard {
            queue: Arc::clone(&self),
            id: id.clone(),
        };

        // Progress relay: the adapter coalesces samples; the relay just
        // persists them. Writes are status-guarded in the store, so a
        // straggler after cancel or failure cannot land.
        let (tx, mut rx) = tokio::sync::mpsc::channel::<Progress>(16);
        let relay_store = self.store.clone();
        let relay_id = id.clone();
        let relay = tokio::spawn(async move {
            while let Some(sample) = rx.recv().await {
                if let Err(e) = relay_store
                    .update_progress(&relay_id, sample.percent, sample.eta_secs)
                    .await
                {
                    tracing::warn!(job = %relay_id, "progress write failed: {e:#}");
                }
            }
        });

        let result = self.downloader.download(&url, tx, cancel).await;
        let _ = relay.await;

        match result {
            Ok(filename) => {
                if let Err(e) = self.store.mark_done(&id, &filename).await {
                    tracing::error!(job = %id, "failed to mark done: {e:#}");
                    return;
                }
                tracing::info!(job = %id, %filename, "download finished");
            }
            Err(e) if e.downcast_ref::<DownloadCancelled>().is_some() => {
                // Cancellation withdraws the job entirely.
                if let Err(e) = self.store.delete_job(&id).await {
                    tracing::error!(job = %id, "failed to delete cancelled job: {e:#}");
                    return;
                }
                tracing::info!(job = %id, "download cancelled, job removed");
            }
            Err(e) => {
                let message = format!("{e:#}");
                if let Err(e) = self.store.mark_failed(&id, &message).await {
                    tracing::error!(job = %id, "failed to mark failed: {e:#}");
                    return;
                }
                tracing::warn!(job = %id, "download failed: {message}");
            }
        }
    }
}
