//! Periodic maintenance: file-existence verification and retention.

use std::path::Path;

use anyhow::Result;
use chrono::Utc;

use crate::storage;
use crate::store::{JobStatus, Store};

#[derive(Debug, Default, PartialEq)]
pub struct SweepReport {
    /// done/imported jobs whose file is gone; demoted to `missing`.
    pub missing: usize,
    /// imported jobs whose file was found; promoted to `done`.
    pub verified: usize,
}

/// Check every done/imported job's file on disk. Jobs whose file has
/// disappeared are demoted to `missing`; imported jobs whose file is
/// present are promoted to `done`. Runs at startup and once a day.
pub async fn scan_for_missing_files(store: &Store, data_dir: &Path) -> Result<SweepReport> {
    let mut report = SweepReport::default();

    for job in store.jobs_for_file_check().await? {
        let present = storage::job_file_path(data_dir, &job)
            .map(|p| p.exists())
            .unwrap_or(false);

        if !present {
            store.mark_missing(&job.id).await?;
            report.missing += 1;
            tracing::warn!(job = %job.id, file = ?job.filename, "file missing on disk");
        } else if job.status == JobStatus::Imported {
            store.promote_imported(&job.id).await?;
            report.verified += 1;
        }
    }

    if report != SweepReport::default() {
        tracing::info!(
            missing = report.missing,
            verified = report.verified,
            "file sweep finished"
        );
    }
    Ok(report)
}

/// Delete failed jobs older than the retention window.
pub async fn run_retention(store: &Store, retention_days: i64) -> Result<u64> {
    let cutoff = Utc::now().timestamp_millis() - retention_days * 24 * 60 * 60 * 1000;
    let removed = store.delete_old_failed_jobs(cutoff).await?;
    if removed > 0 {
        tracing::info!(count = removed, "pruned old failed jobs");
    }
    Ok(removed)
}
