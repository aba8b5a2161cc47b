//! Data-directory layout: per-day folders under the media root.
//!
//! Downloads land in `<root>/YYYY-MM-DD/`; the sync marker and the job
//! database are excluded from every scan.

use anyhow::Result;
use chrono::{DateTime, TimeZone, Utc};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::store::Job;

/// Marker file touched after a successful sync run; its mtime is the
/// last-run watermark.
pub const SYNC_MARKER: &str = ".last_sync";

fn is_internal_file(name: &str) -> bool {
    name.contains("jobs.sqlite") || name == SYNC_MARKER
}

/// Folder name for a Unix-millis timestamp, e.g. `2026-08-28`.
pub fn date_folder_name(ts_millis: i64) -> String {
    let date = Utc
        .timestamp_millis_opt(ts_millis)
        .single()
        .unwrap_or_else(Utc::now);
    date.format("%Y-%m-%d").to_string()
}

/// Today's download folder, created on demand.
pub fn today_folder(root: &Path) -> Result<PathBuf> {
    let path = root.join(date_folder_name(Utc::now().timestamp_millis()));
    std::fs::create_dir_all(&path)?;
    Ok(path)
}

/// Expected on-disk location of a job's produced file, derived from the
/// completion date (creation date for imports that never completed).
/// None when the job has no filename.
pub fn job_file_path(root: &Path, job: &Job) -> Option<PathBuf> {
    let filename = job.filename.as_deref()?;
    let ts = job.completed_at.unwrap_or(job.created_at);
    Some(root.join(date_folder_name(ts)).join(filename))
}

/// Count media files created after `since` (sync backlog estimate).
/// Files with no creation time fall back to mtime.
pub fn count_files_after(root: &Path, since: DateTime<Utc>) -> usize {
    if !root.exists() {
        return 0;
    }
    WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| !is_internal_file(&e.file_name().to_string_lossy()))
        .filter(|e| {
            e.metadata()
                .ok()
                .and_then(|m| m.created().or_else(|_| m.modified()).ok())
                .map(|t| DateTime::<Utc>::from(t) > since)
                .unwrap_or(false)
        })
        .count()
}
