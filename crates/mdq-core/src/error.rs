//! Caller-visible error taxonomy for queue operations.
//!
//! Duplicate submissions are not errors; they surface as skipped entries
//! in the submit outcome.

use std::fmt;
use thiserror::Error;

/// Errors returned by queue/history/sync operations to the API layer.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Rejected synchronously with no state change (empty URL list,
    /// out-of-range settings).
    #[error("validation: {0}")]
    Validation(String),

    /// Unknown job id on cancel/retry/redownload/delete.
    #[error("job not found: {0}")]
    NotFound(String),

    /// Operation requires the job to be in a different state
    /// (e.g. retry of a job that is not `failed`).
    #[error("job {id} is {status}, expected {expected}")]
    InvalidState {
        id: String,
        status: String,
        expected: &'static str,
    },

    /// Sync run could not be started.
    #[error("sync: {0}")]
    Sync(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// Marker error for a download stopped by user cancellation.
///
/// Workers downcast for this to distinguish withdrawal (row removed)
/// from failure (row marked `failed`).
#[derive(Debug)]
pub struct DownloadCancelled;

impl fmt::Display for DownloadCancelled {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "download cancelled by user")
    }
}

impl std::error::Error for DownloadCancelled {}
