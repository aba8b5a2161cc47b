//! Downloader adapter boundary.
//!
//! The scheduler only depends on this trait; the concrete yt-dlp
//! adapter (and the test fakes) live behind it.

mod ytdlp;

pub use ytdlp::YtDlpDownloader;

use async_trait::async_trait;
pub use tokio_util::sync::CancellationToken;

/// One coalesced progress sample from a running download.
#[derive(Debug, Clone, Copy)]
pub struct Progress {
    /// Percent complete, 0–100.
    pub percent: f64,
    /// Estimated seconds remaining, when the tool reports one.
    pub eta_secs: Option<i64>,
}

pub type ProgressSender = tokio::sync::mpsc::Sender<Progress>;

/// Boundary wrapper around the external fetch/transcode operation.
///
/// `download` drives exactly one external invocation for `url` and
/// returns the produced file's basename. Cancellation must terminate
/// the underlying process within a bounded grace period and surface as
/// the [`crate::error::DownloadCancelled`] marker error; partial output
/// is discarded by the adapter, not the caller.
#[async_trait]
pub trait Downloader: Send + Sync + 'static {
    async fn download(
        &self,
        url: &str,
        progress: ProgressSender,
        cancel: CancellationToken,
    ) -> anyhow::Result<String>;
}
