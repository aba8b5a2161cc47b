//! Job control operations (cancel, retry, redownload) and live settings.

use chrono::Utc;

use crate::error::QueueError;
use crate::store::{Job, JobStatus, Settings};

use super::DownloadQueue;

impl DownloadQueue {
    /// The polling view: every non-terminal job plus terminal ones that
    /// finished within the configured window, oldest first.
    pub async fn list(&self) -> Result<Vec<Job>, QueueError> {
        let since = Utc::now().timestamp_millis() - self.terminal_window_millis;
        Ok(self.store.list_active(since).await?)
    }

    /// Remove a job in any state. A downloading job gets its process
    /// killed via the cancellation token and the owning worker deletes
    /// the row; otherwise the row is deleted here (and the id withdrawn
    /// from the pending queue if still waiting).
    pub async fn cancel_or_delete(&self, id: &str) -> Result<(), QueueError> {
        let token = self.active().get(id).cloned();
        if let Some(token) = token {
            tracing::info!(job = %id, "cancelling active download");
            token.cancel();
            return Ok(());
        }

        self.pending().retain(|p| p != id);
        if self.store.delete_job(id).await? {
            tracing::info!(job = %id, "job removed");
            Ok(())
        } else {
            Err(QueueError::NotFound(id.to_string()))
        }
    }

    /// Requeue a failed job, keeping its id and incrementing its retry
    /// count. Only valid from `failed`.
    pub async fn retry(&self, id: &str) -> Result<Job, QueueError> {
        let job = self
            .store
            .get_job(id)
            .await?
            .ok_or_else(|| QueueError::NotFound(id.to_string()))?;
        if job.status != JobStatus::Failed {
            return Err(QueueError::InvalidState {
                id: id.to_string(),
                status: job.status.as_str().to_string(),
                expected: "failed",
            });
        }

        // The guarded update can still lose a race with a concurrent
        // retry; the second caller gets the state error.
        if !self.store.requeue_failed(id).await? {
            return Err(QueueError::InvalidState {
                id: id.to_string(),
                status: "not failed".to_string(),
                expected: "failed",
            });
        }
        self.pending().push_back(id.to_string());
        self.wake();

        self.store
            .get_job(id)
            .await?
            .ok_or_else(|| QueueError::NotFound(id.to_string()))
    }

    /// Fetch a finished job's URL again as a brand-new job. The original
    /// row is left untouched; the new job supersedes it in the dedup
    /// view once it completes.
    pub async fn redownload(&self, id: &str) -> Result<Job, QueueError> {
        let job = self
            .store
            .get_job(id)
            .await?
            .ok_or_else(|| QueueError::NotFound(id.to_string()))?;
        if !matches!(job.status, JobStatus::Done | JobStatus::Missing) {
            return Err(QueueError::InvalidState {
                id: id.to_string(),
                status: job.status.as_str().to_string(),
                expected: "done or missing",
            });
        }

        let fresh = self.store.add_job(&job.url, &job.normalized_url).await?;
        tracing::info!(job = %fresh.id, supersedes = %id, "redownload queued");
        self.pending().push_back(fresh.id.clone());
        self.wake();
        Ok(fresh)
    }

    pub async fn settings(&self) -> Settings {
        self.settings.read().await.clone()
    }

    /// Validate, persist and apply new settings. A larger
    /// `max_concurrent` takes effect on the next dispatch; a smaller one
    /// never preempts running downloads, it only throttles new starts.
    pub async fn update_settings(&self, new: Settings) -> Result<Settings, QueueError> {
        if new.max_concurrent < 1 {
            return Err(QueueError::Validation(
                "maxConcurrent must be at least 1".to_string(),
            ));
        }
        self.store.save_settings(&new).await?;
        *self.settings.write().await = new.clone();
        tracing::info!(
            max_concurrent = new.max_concurrent,
            "settings updated"
        );
        self.wake();
        Ok(new)
    }
}
