//! Remote sync: one rclone copy run at a time, with bounded logs.
//!
//! The agent shells out to `rclone copy --ignore-existing`, so a rerun
//! after a partial failure only transfers what is still missing on the
//! remote. A successful run touches the `.last_sync` marker; its mtime
//! is the watermark behind the unsynced-file count.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::RwLock;

use crate::error::QueueError;
use crate::storage::{self, SYNC_MARKER};

/// Most recent log lines retained from a run.
const MAX_LOG_LINES: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Started,
    /// A run was already in flight; starting another is a no-op.
    AlreadyRunning,
}

/// Snapshot returned to status pollers.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    /// `idle`, `running` or `error`.
    pub status: &'static str,
    /// Unix millis of the last successful run, if any.
    pub last_run: Option<i64>,
    pub logs: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Files created since the last successful run.
    pub unsynced_count: usize,
}

#[derive(Default)]
struct SyncInner {
    running: bool,
    logs: Vec<String>,
    error: Option<String>,
}

impl SyncInner {
    fn push_log(&mut self, line: String) {
        if self.logs.len() >= MAX_LOG_LINES {
            self.logs.remove(0);
        }
        self.logs.push(line);
    }
}

pub struct SyncAgent {
    data_dir: PathBuf,
    program: String,
    transfers: u32,
    state: Arc<RwLock<SyncInner>>,
}

impl SyncAgent {
    pub fn new(data_dir: PathBuf, transfers: u32) -> Self {
        Self {
            data_dir,
            program: "rclone".to_string(),
            transfers,
            state: Arc::new(RwLock::new(SyncInner::default())),
        }
    }

    /// Swap the sync binary (tests use /bin/true and /bin/false).
    #[cfg(test)]
    fn with_program(mut self, program: &str) -> Self {
        self.program = program.to_string();
        self
    }

    fn marker_path(&self) -> PathBuf {
        self.data_dir.join(SYNC_MARKER)
    }

    fn last_run_millis(&self) -> Option<i64> {
        let mtime = std::fs::metadata(self.marker_path())
            .and_then(|m| m.modified())
            .ok()?;
        Some(DateTime::<Utc>::from(mtime).timestamp_millis())
    }

    /// Kick off a sync to `destination` unless one is already running.
    /// The copy runs in the background; progress is observed via
    /// [`SyncAgent::status`].
    pub async fn run(&self, destination: &str) -> Result<RunOutcome, QueueError> {
        let destination = destination.trim().to_string();
        if destination.is_empty() {
            return Err(QueueError::Validation(
                "sync destination is not configured".to_string(),
            ));
        }

        {
            let mut inner = self.state.write().await;
            if inner.running {
                return Ok(RunOutcome::AlreadyRunning);
            }
            inner.running = true;
            inner.logs.clear();
            inner.error = None;
        }

        let spawn = Command::new(&self.program)
            .arg("copy")
            .arg(&self.data_dir)
            .arg(&destination)
            .arg("--ignore-existing")
            .arg(format!("--transfers={}", self.transfers))
            .arg("--exclude")
            .arg("jobs.sqlite*")
            .arg("--exclude")
            .arg(SYNC_MARKER)
            .arg("-v")
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();

        let mut child = match spawn {
            Ok(child) => child,
            Err(e) => {
                let message = format!("failed to start {}: {}", self.program, e);
                let mut inner = self.state.write().await;
                inner.running = false;
                inner.error = Some(message.clone());
                return Err(QueueError::Sync(message));
            }
        };
        tracing::info!(dest = %destination, "sync started");

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let state = Arc::clone(&self.state);
        let marker = self.marker_path();
        let program = self.program.clone();

        tokio::spawn(async move {
            if let Some(out) = stdout {
                let state = Arc::clone(&state);
                tokio::spawn(async move {
                    let mut lines = BufReader::new(out).lines();
                    while let Ok(Some(line)) = lines.next_line().await {
                        state.write().await.push_log(line);
                    }
                });
            }
            if let Some(err) = stderr {
                let state = Arc::clone(&state);
                tokio::spawn(async move {
                    let mut lines = BufReader::new(err).lines();
                    while let Ok(Some(line)) = lines.next_line().await {
                        state.write().await.push_log(line);
                    }
                });
            }

            let outcome = child.wait().await;
            let mut inner = state.write().await;
            inner.running = false;
            match outcome {
                Ok(status) if status.success() => {
                    if let Err(e) = std::fs::write(&marker, b"") {
                        tracing::warn!("failed to touch sync marker: {}", e);
                    }
                    tracing::info!("sync finished");
                }
                Ok(status) => {
                    let code = status.code().unwrap_or(-1);
                    inner.error = Some(format!("{program} exited with code {code}"));
                    tracing::warn!(code, "sync failed");
                }
                Err(e) => {
                    inner.error = Some(format!("{program} did not finish: {e}"));
                    tracing::warn!("sync failed: {}", e);
                }
            }
        });

        Ok(RunOutcome::Started)
    }

    pub async fn status(&self) -> SyncStatus {
        let inner = self.state.read().await;
        let last_run = self.last_run_millis();
        let since = last_run
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let status = if inner.running {
            "running"
        } else if inner.error.is_some() {
            "error"
        } else {
            "idle"
        };

        SyncStatus {
            status,
            last_run,
            logs: inner.logs.clone(),
            error: inner.error.clone(),
            unsynced_count: storage::count_files_after(&self.data_dir, since),
        }
    }
}
