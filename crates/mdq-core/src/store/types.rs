//! Types stored in the job database.

use serde::{Deserialize, Serialize};

/// Job identifier (UUID v4 as text).
pub type JobId = String;

/// Job lifecycle state stored as a string in the database.
///
/// `queued → downloading → {done, failed}`; `failed` can be retried back
/// to `queued`; `done`/`imported` can be demoted to `missing` by the
/// file-existence sweep; `imported` is assigned only by history import.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Downloading,
    Done,
    Failed,
    Imported,
    Missing,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Downloading => "downloading",
            JobStatus::Done => "done",
            JobStatus::Failed => "failed",
            JobStatus::Imported => "imported",
            JobStatus::Missing => "missing",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "queued" => JobStatus::Queued,
            "downloading" => JobStatus::Downloading,
            "done" => JobStatus::Done,
            "imported" => JobStatus::Imported,
            "missing" => JobStatus::Missing,
            _ => JobStatus::Failed,
        }
    }

    /// Active jobs hold or will hold a worker slot.
    pub fn is_active(self) -> bool {
        matches!(self, JobStatus::Queued | JobStatus::Downloading)
    }

    pub fn is_terminal(self) -> bool {
        !self.is_active()
    }
}

/// One tracked download request and its outcome.
///
/// The camelCase serde form is the export/import wire format, so field
/// renames here are a compatibility break for existing exports.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: JobId,
    pub url: String,
    /// Canonical dedup key; immutable once computed.
    #[serde(default)]
    pub normalized_url: String,
    pub status: JobStatus,
    /// 0–100; meaningful only while downloading.
    #[serde(default)]
    pub progress: f64,
    /// Estimated seconds remaining; meaningful only while downloading.
    pub eta: Option<i64>,
    pub filename: Option<String>,
    /// Unix millis. Immutable; the stable history sort key.
    pub created_at: i64,
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
    /// Count of failed→queued transitions caused by explicit retry.
    #[serde(default)]
    pub retries: i64,
    /// Last failure message; cleared on successful retry.
    pub error: Option<String>,
}

/// Runtime-mutable settings consumed live by the scheduler and sync agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    /// Worker-pool capacity; must be at least 1.
    pub max_concurrent: usize,
    /// Remote sync destination; empty string disables sync.
    #[serde(default)]
    pub sync_destination: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            max_concurrent: 2,
            sync_destination: String::new(),
        }
    }
}
