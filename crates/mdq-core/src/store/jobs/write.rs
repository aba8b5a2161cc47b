//! Job write operations: creation, state transitions, progress, removal.

use anyhow::Result;
use uuid::Uuid;

use super::super::db::{now_millis, Store};
use super::super::types::{Job, JobStatus};

impl Store {
    /// Insert a new queued job and return the created row.
    pub async fn add_job(&self, url: &str, normalized_url: &str) -> Result<Job> {
        let job = Job {
            id: Uuid::new_v4().to_string(),
            url: url.to_string(),
            normalized_url: normalized_url.to_string(),
            status: JobStatus::Queued,
            progress: 0.0,
            eta: None,
            filename: None,
            created_at: now_millis(),
            started_at: None,
            completed_at: None,
            retries: 0,
            error: None,
        };

        sqlx::query(
            "INSERT INTO jobs (id, url, normalized_url, status, created_at) VALUES (?1, ?2, ?3, 'queued', ?4)",
        )
        .bind(&job.id)
        .bind(&job.url)
        .bind(&job.normalized_url)
        .bind(job.created_at)
        .execute(&self.pool)
        .await?;

        Ok(job)
    }

    /// Insert a history-import record. The status is forced to
    /// `imported` and retries reset; the rest of the record (including
    /// id and timestamps) is preserved verbatim.
    pub async fn import_job(&self, job: &Job) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO jobs (
                id, url, normalized_url, status, progress, eta, filename,
                created_at, started_at, completed_at, retries, error
            ) VALUES (?1, ?2, ?3, 'imported', ?4, ?5, ?6, ?7, ?8, ?9, 0, ?10)
            "#,
        )
        .bind(&job.id)
        .bind(&job.url)
        .bind(&job.normalized_url)
        .bind(job.progress)
        .bind(job.eta)
        .bind(&job.filename)
        .bind(job.created_at)
        .bind(job.started_at)
        .bind(job.completed_at)
        .bind(&job.error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// queued → downloading: stamps `started_at`, clears any stale error.
    pub async fn mark_downloading(&self, id: &str) -> Result<()> {
        sqlx::query(
            "UPDATE jobs SET status = 'downloading', started_at = ?1, error = NULL WHERE id = ?2",
        )
        .bind(now_millis())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Coalesced progress relay from the owning worker. Guarded on the
    /// downloading status so a concurrent cancel/delete never resurrects
    /// progress on a removed or terminal row.
    pub async fn update_progress(&self, id: &str, progress: f64, eta: Option<i64>) -> Result<()> {
        sqlx::query(
            "UPDATE jobs SET progress = ?1, eta = ?2 WHERE id = ?3 AND status = 'downloading'",
        )
        .bind(progress.clamp(0.0, 100.0))
        .bind(eta)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn mark_done(&self, id: &str, filename: &str) -> Result<()> {
        sqlx::query(
            "UPDATE jobs SET status = 'done', progress = 100, eta = NULL, filename = ?1, completed_at = ?2 WHERE id = ?3",
        )
        .bind(filename)
        .bind(now_millis())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn mark_failed(&self, id: &str, error: &str) -> Result<()> {
        sqlx::query(
            "UPDATE jobs SET status = 'failed', eta = NULL, error = ?1, completed_at = ?2 WHERE id = ?3",
        )
        .bind(error)
        .bind(now_millis())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// done/imported → missing when the produced file is gone from disk.
    pub async fn mark_missing(&self, id: &str) -> Result<()> {
        sqlx::query("UPDATE jobs SET status = 'missing' WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// imported → done once the referenced file has been verified on disk.
    pub async fn promote_imported(&self, id: &str) -> Result<()> {
        sqlx::query("UPDATE jobs SET status = 'done' WHERE id = ?1 AND status = 'imported'")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// failed → queued for an explicit retry: increments `retries`,
    /// clears error/progress/timestamps. Returns false when the job was
    /// not in `failed` (nothing changes).
    pub async fn requeue_failed(&self, id: &str) -> Result<bool> {
        let r = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'queued', retries = retries + 1, error = NULL,
                progress = 0, eta = NULL, started_at = NULL, completed_at = NULL
            WHERE id = ?1 AND status = 'failed'
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(r.rows_affected() > 0)
    }

    /// Normalize any job left in `downloading` to `failed` (e.g. after a
    /// crash or hard shutdown). Call before dispatching at startup so no
    /// row claims a worker slot that no longer exists.
    pub async fn reset_interrupted_jobs(&self) -> Result<u64> {
        let r = sqlx::query(
            "UPDATE jobs SET status = 'failed', error = 'interrupted by shutdown', completed_at = ?1 WHERE status = 'downloading'",
        )
        .bind(now_millis())
        .execute(&self.pool)
        .await?;
        Ok(r.rows_affected())
    }

    /// Permanently remove a job row. Returns false for an unknown id.
    pub async fn delete_job(&self, id: &str) -> Result<bool> {
        let r = sqlx::query("DELETE FROM jobs WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(r.rows_affected() > 0)
    }

    /// Retention sweep: drop failed jobs created before `cutoff` (millis).
    pub async fn delete_old_failed_jobs(&self, cutoff: i64) -> Result<u64> {
        let r = sqlx::query("DELETE FROM jobs WHERE status = 'failed' AND created_at < ?1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(r.rows_affected())
    }

    #[cfg(test)]
    /// Insert a queued job with an explicit `created_at` so ordering
    /// tests don't depend on clock resolution.
    pub(crate) async fn add_job_backdated(
        &self,
        url: &str,
        normalized_url: &str,
        created_at: i64,
    ) -> Result<Job> {
        let mut job = self.add_job(url, normalized_url).await?;
        sqlx::query("UPDATE jobs SET created_at = ?1 WHERE id = ?2")
            .bind(created_at)
            .bind(&job.id)
            .execute(&self.pool)
            .await?;
        job.created_at = created_at;
        Ok(job)
    }
}
