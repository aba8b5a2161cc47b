//! Batch submission with URL-level deduplication.

use serde::Serialize;

use crate::error::QueueError;
use crate::normalize;
use crate::store::Job;

use super::DownloadQueue;

/// A submitted URL that did not become a new job, and why.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SkippedUrl {
    pub url: String,
    pub reason: String,
    /// The prior job this URL collapsed onto, when one exists.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<i64>,
}

/// Per-batch outcome: created jobs plus skipped duplicates. Duplicates
/// are not errors; the whole batch succeeds with them reported.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitOutcome {
    pub added: Vec<Job>,
    pub skipped: Vec<SkippedUrl>,
}

impl DownloadQueue {
    /// Submit a batch of URLs. Each URL is reduced to its dedup key;
    /// keys with an active job (in this batch or already stored) are
    /// skipped, keys with a prior successful job are skipped with a
    /// pointer to it, and the rest become queued jobs.
    pub async fn submit(&self, urls: &[String]) -> Result<SubmitOutcome, QueueError> {
        let cleaned: Vec<&str> = urls
            .iter()
            .map(|u| u.trim())
            .filter(|u| !u.is_empty())
            .collect();
        if cleaned.is_empty() {
            return Err(QueueError::Validation("no urls provided".to_string()));
        }

        let mut outcome = SubmitOutcome {
            added: Vec::new(),
            skipped: Vec::new(),
        };
        let mut batch_keys = std::collections::HashSet::new();

        for url in cleaned {
            let key = normalize::dedup_key(url).await;

            if !batch_keys.insert(key.clone()) || self.store.has_active_job(&key).await? {
                outcome.skipped.push(SkippedUrl {
                    url: url.to_string(),
                    reason: "already queued or downloading".to_string(),
                    job_id: None,
                    finished_at: None,
                });
                continue;
            }

            if let Some(done) = self.store.find_done_job(&key).await? {
                outcome.skipped.push(SkippedUrl {
                    url: url.to_string(),
                    reason: "already downloaded".to_string(),
                    job_id: Some(done.id),
                    finished_at: done.completed_at,
                });
                continue;
            }

            let job = self.store.add_job(url, &key).await?;
            tracing::info!(job = %job.id, url = %job.url, "job queued");
            self.pending().push_back(job.id.clone());
            outcome.added.push(job);
        }

        if !outcome.added.is_empty() {
            self.wake();
        }
        Ok(outcome)
    }
}
