//! Job read operations: lookups, dedup view, history, export.

use anyhow::Result;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use super::super::db::Store;
use super::super::types::{Job, JobStatus};

const JOB_COLUMNS: &str = "id, url, normalized_url, status, progress, eta, filename, \
                           created_at, started_at, completed_at, retries, error";

fn job_from_row(row: &SqliteRow) -> Job {
    let status_str: String = row.get("status");
    Job {
        id: row.get("id"),
        url: row.get("url"),
        normalized_url: row.get("normalized_url"),
        status: JobStatus::parse(&status_str),
        progress: row.get("progress"),
        eta: row.get("eta"),
        filename: row.get("filename"),
        created_at: row.get("created_at"),
        started_at: row.get("started_at"),
        completed_at: row.get("completed_at"),
        retries: row.get("retries"),
        error: row.get("error"),
    }
}

impl Store {
    /// Fetch a single job by id.
    pub async fn get_job(&self, id: &str) -> Result<Option<Job>> {
        let row = sqlx::query(&format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(job_from_row))
    }

    pub async fn job_exists(&self, id: &str) -> Result<bool> {
        let count: i64 = sqlx::query_scalar("SELECT count(*) FROM jobs WHERE id = ?1")
            .bind(id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count > 0)
    }

    /// Non-terminal jobs plus terminal ones completed at or after
    /// `terminal_since` (millis), oldest first. The window keeps fresh
    /// outcomes visible to polling clients.
    pub async fn list_active(&self, terminal_since: i64) -> Result<Vec<Job>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {JOB_COLUMNS} FROM jobs
            WHERE status IN ('queued', 'downloading')
               OR (completed_at IS NOT NULL AND completed_at >= ?1)
            ORDER BY created_at ASC
            "#
        ))
        .bind(terminal_since)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(job_from_row).collect())
    }

    /// Ids of queued jobs in FIFO order; used to rebuild the dispatch
    /// candidates at startup.
    pub async fn queued_job_ids(&self) -> Result<Vec<String>> {
        let rows = sqlx::query("SELECT id FROM jobs WHERE status = 'queued' ORDER BY created_at ASC")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(|r| r.get("id")).collect())
    }

    /// Dedup view: is there an active (queued/downloading) job for this key?
    pub async fn has_active_job(&self, normalized_url: &str) -> Result<bool> {
        let count: i64 = sqlx::query_scalar(
            "SELECT count(*) FROM jobs WHERE normalized_url = ?1 AND status IN ('queued', 'downloading')",
        )
        .bind(normalized_url)
        .fetch_one(&self.pool)
        .await?;
        Ok(count > 0)
    }

    /// Dedup view: most recent successfully completed job for this key.
    pub async fn find_done_job(&self, normalized_url: &str) -> Result<Option<Job>> {
        let row = sqlx::query(&format!(
            r#"
            SELECT {JOB_COLUMNS} FROM jobs
            WHERE normalized_url = ?1 AND status = 'done'
            ORDER BY completed_at DESC
            LIMIT 1
            "#
        ))
        .bind(normalized_url)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(job_from_row))
    }

    /// One history page ordered by the immutable `created_at` key,
    /// newest first, plus the total row count.
    pub async fn history(&self, limit: i64, offset: i64) -> Result<(Vec<Job>, i64)> {
        let rows = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs ORDER BY created_at DESC LIMIT ?1 OFFSET ?2"
        ))
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM jobs")
            .fetch_one(&self.pool)
            .await?;

        Ok((rows.iter().map(job_from_row).collect(), total))
    }

    /// All jobs, newest first (export wire format).
    pub async fn export_all(&self) -> Result<Vec<Job>> {
        let rows = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs ORDER BY created_at DESC"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(job_from_row).collect())
    }

    /// Jobs whose produced file should be verified on disk
    /// (`done` plus `imported`, which has never been verified).
    pub async fn jobs_for_file_check(&self) -> Result<Vec<Job>> {
        let rows = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE status IN ('done', 'imported')"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(job_from_row).collect())
    }
}
