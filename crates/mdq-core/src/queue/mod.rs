//! Job scheduler: FIFO dispatch into a concurrency-bounded worker pool.
//!
//! All mutation of queue state goes through [`DownloadQueue`]. Dispatch
//! runs in a single background task woken by [`tokio::sync::Notify`], so
//! the capacity check and slot claim never race; submit, retry, worker
//! completion and settings changes only enqueue and wake it.

mod control;
mod dispatch;
mod submit;

#[cfg(test)]
mod tests;

pub use submit::{SkippedUrl, SubmitOutcome};

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use tokio::sync::{Notify, RwLock};
use tokio_util::sync::CancellationToken;

use crate::downloader::Downloader;
use crate::store::{JobId, Settings, Store};

pub struct DownloadQueue {
    pub(crate) store: Store,
    downloader: Arc<dyn Downloader>,
    /// Queued job ids in FIFO order, awaiting a worker slot.
    pending: Mutex<VecDeque<JobId>>,
    /// One cancellation token per job currently holding a slot.
    active: Mutex<HashMap<JobId, CancellationToken>>,
    settings: RwLock<Settings>,
    notify: Notify,
    /// How long finished jobs remain visible in the active list (millis).
    terminal_window_millis: i64,
}

impl DownloadQueue {
    /// Load persisted state and start the dispatch loop.
    ///
    /// Jobs left in `downloading` by a previous process are marked
    /// failed before any dispatch, and the pending queue is rebuilt from
    /// the persisted `queued` rows in creation order.
    pub async fn start(
        store: Store,
        downloader: Arc<dyn Downloader>,
        terminal_window_secs: u64,
    ) -> Result<Arc<Self>> {
        let settings = store.load_settings().await?;
        let interrupted = store.reset_interrupted_jobs().await?;
        if interrupted > 0 {
            tracing::warn!(count = interrupted, "marked interrupted downloads as failed");
        }
        let pending: VecDeque<JobId> = store.queued_job_ids().await?.into();
        if !pending.is_empty() {
            tracing::info!(count = pending.len(), "restored queued jobs");
        }

        let queue = Arc::new(Self {
            store,
            downloader,
            pending: Mutex::new(pending),
            active: Mutex::new(HashMap::new()),
            settings: RwLock::new(settings),
            notify: Notify::new(),
            terminal_window_millis: (terminal_window_secs as i64) * 1000,
        });

        let looper = Arc::clone(&queue);
        tokio::spawn(async move {
            loop {
                looper.dispatch().await;
                looper.notify.notified().await;
            }
        });
        queue.notify.notify_one();

        Ok(queue)
    }

    pub(crate) fn wake(&self) {
        self.notify.notify_one();
    }

    // Lock poisoning would only come from a panic in another holder;
    // the queued ids and token map stay usable either way.
    pub(crate) fn pending(&self) -> std::sync::MutexGuard<'_, VecDeque<JobId>> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn active(&self) -> std::sync::MutexGuard<'_, HashMap<JobId, CancellationToken>> {
        self.active.lock().unwrap_or_else(|e| e.into_inner())
    }
}
