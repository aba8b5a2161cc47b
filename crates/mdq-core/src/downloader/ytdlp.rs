//! yt-dlp adapter: one child process per job, progress parsed from stdout.

use anyhow::{Context, Result};
use async_trait::async_trait;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::error::DownloadCancelled;
use crate::storage;

use super::{Downloader, Progress, ProgressSender};

/// Minimum spacing between relayed progress updates; yt-dlp prints a
/// line per chunk, which is far too chatty for the job store.
const PROGRESS_INTERVAL: Duration = Duration::from_secs(1);

/// Downloads media with the `yt-dlp` binary, remuxed to mp4 under a
/// per-day folder of `output_root`.
pub struct YtDlpDownloader {
    binary: PathBuf,
    output_root: PathBuf,
}

impl YtDlpDownloader {
    pub fn new(output_root: PathBuf) -> Self {
        Self {
            binary: PathBuf::from("yt-dlp"),
            output_root,
        }
    }

    /// Override the yt-dlp binary path (e.g. a bundled copy).
    pub fn with_binary(mut self, binary: PathBuf) -> Self {
        self.binary = binary;
        self
    }
}

/// Regexes over yt-dlp's `--newline` stdout.
struct OutputPatterns {
    progress: Regex,
    eta: Regex,
    destination: Regex,
    merger: Regex,
    already: Regex,
}

impl OutputPatterns {
    fn new() -> Self {
        Self {
            progress: Regex::new(r"\[download\]\s+(\d+\.?\d*)%").unwrap(),
            eta: Regex::new(r"ETA\s+(\d{1,2}:\d{2}(?::\d{2})?)").unwrap(),
            destination: Regex::new(r"[Dd]estination:\s+(.+)").unwrap(),
            merger: Regex::new(r#"\[Merger\].*?"([^"]+)""#).unwrap(),
            already: Regex::new(r"\[download\]\s+(.+?) has already been downloaded").unwrap(),
        }
    }
}

/// Parse a `HH:MM:SS` / `MM:SS` ETA into seconds.
fn parse_eta(eta: &str) -> Option<i64> {
    let parts: Vec<i64> = eta.split(':').map(|p| p.parse().unwrap_or(0)).collect();
    match parts.as_slice() {
        [h, m, s] => Some(h * 3600 + m * 60 + s),
        [m, s] => Some(m * 60 + s),
        [s] => Some(*s),
        _ => None,
    }
}

/// Extract a progress sample from one stdout line, if it carries one.
fn parse_progress_line(patterns: &OutputPatterns, line: &str) -> Option<Progress> {
    let caps = patterns.progress.captures(line)?;
    let percent: f64 = caps.get(1)?.as_str().parse().ok()?;
    let eta_secs = patterns
        .eta
        .captures(line)
        .and_then(|c| c.get(1))
        .and_then(|m| parse_eta(m.as_str()));
    Some(Progress { percent, eta_secs })
}

/// Extract the produced filename from destination/merge/already lines.
fn parse_output_file(patterns: &OutputPatterns, line: &str) -> Option<String> {
    if let Some(caps) = patterns.merger.captures(line) {
        return Some(caps.get(1)?.as_str().trim().to_string());
    }
    if let Some(caps) = patterns.already.captures(line) {
        return Some(caps.get(1)?.as_str().trim().to_string());
    }
    if let Some(caps) = patterns.destination.captures(line) {
        return Some(caps.get(1)?.as_str().trim().trim_matches('"').to_string());
    }
    None
}

fn basename(path: &str) -> String {
    Path::new(path)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string())
}

#[async_trait]
impl Downloader for YtDlpDownloader {
    async fn download(
        &self,
        url: &str,
        progress: ProgressSender,
        cancel: CancellationToken,
    ) -> Result<String> {
        let folder = storage::today_folder(&self.output_root)?;
        let template = folder.join("%(title)s.%(ext)s");

        let mut child = Command::new(&self.binary)
            .arg("--newline")
            .arg("--no-playlist")
            .arg("-f")
            .arg("bv*+ba/best")
            .arg("--merge-output-format")
            .arg("mp4")
            .arg("--remux-video")
            .arg("mp4")
            .arg("--postprocessor-args")
            .arg("ffmpeg:-movflags +faststart")
            .arg("-o")
            .arg(&template)
            .arg(url)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("spawn {}", self.binary.display()))?;

        let stdout = child.stdout.take().context("yt-dlp stdout unavailable")?;
        let stderr = child.stderr.take().context("yt-dlp stderr unavailable")?;

        let output_file = Arc::new(Mutex::new(String::new()));

        let file_slot = Arc::clone(&output_file);
        let stdout_task = tokio::spawn(async move {
            let patterns = OutputPatterns::new();
            let mut lines = BufReader::new(stdout).lines();
            let mut last_sent = Instant::now() - PROGRESS_INTERVAL;
            while let Ok(Some(line)) = lines.next_line().await {
                if let Some(sample) = parse_progress_line(&patterns, &line) {
                    if last_sent.elapsed() >= PROGRESS_INTERVAL {
                        let _ = progress.try_send(sample);
                        last_sent = Instant::now();
                    }
                }
                if let Some(file) = parse_output_file(&patterns, &line) {
                    *file_slot.lock().unwrap() = file;
                }
            }
        });

        // Keep the tail of stderr for the failure message.
        let stderr_task = tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            let mut last = String::new();
            while let Ok(Some(line)) = lines.next_line().await {
                if !line.trim().is_empty() {
                    last = line;
                }
            }
            last
        });

        tokio::select! {
            _ = cancel.cancelled() => {
                child.kill().await.context("kill yt-dlp")?;
                let _ = stdout_task.await;
                let _ = stderr_task.await;
                // Discard partial output so the data dir holds only
                // completed files.
                let name = output_file.lock().unwrap().clone();
                if !name.is_empty() {
                    let produced = folder.join(basename(&name));
                    let _ = tokio::fs::remove_file(&produced).await;
                    let _ = tokio::fs::remove_file(produced.with_extension("mp4.part")).await;
                    let mut part = produced.into_os_string();
                    part.push(".part");
                    let _ = tokio::fs::remove_file(PathBuf::from(part)).await;
                }
                Err(DownloadCancelled.into())
            }
            status = child.wait() => {
                let status = status?;
                let _ = stdout_task.await;
                let last_err = stderr_task.await.unwrap_or_default();
                if status.success() {
                    let name = output_file.lock().unwrap().clone();
                    if name.is_empty() {
                        anyhow::bail!("yt-dlp finished without reporting an output file");
                    }
                    Ok(basename(&name))
                } else {
                    let code = status.code().unwrap_or(-1);
                    if last_err.is_empty() {
                        anyhow::bail!("yt-dlp exited with code {}", code)
                    } else {
                        anyhow::bail!("yt-dlp exited with code {}: {}", code, last_err)
                    }
                }
            }
        }
    }
}
