//! mdqd: the media download queue daemon.
//!
//! Wires the scheduler, sync agent and maintenance sweeps together and
//! serves the HTTP API.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use mdq_core::downloader::YtDlpDownloader;
use mdq_core::queue::DownloadQueue;
use mdq_core::store::Store;
use mdq_core::sync::SyncAgent;
use mdq_core::{config, logging, sweep};

mod routes;

const SWEEP_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

#[tokio::main]
async fn main() -> Result<()> {
    if let Err(e) = logging::init_logging() {
        logging::init_logging_stderr();
        tracing::warn!("file logging unavailable, logging to stderr: {e:#}");
    }

    let cfg = config::load_or_init().context("load configuration")?;
    let data_dir = cfg.data_dir()?;
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("create data dir {}", data_dir.display()))?;

    let store = Store::open_default().await.context("open job database")?;
    let downloader = Arc::new(YtDlpDownloader::new(data_dir.clone()));
    let queue = DownloadQueue::start(store.clone(), downloader, cfg.active_terminal_window_secs)
        .await
        .context("start download queue")?;
    let sync = Arc::new(SyncAgent::new(data_dir.clone(), cfg.sync_transfers));

    spawn_sweeps(store.clone(), data_dir.clone(), cfg.failed_job_retention_days);

    let app = routes::router(
        routes::AppState {
            queue,
            sync,
            store,
        },
        &cfg,
    );

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], cfg.listen_port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("bind {addr}"))?;
    tracing::info!(%addr, data_dir = %data_dir.display(), "mdqd listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    tracing::info!("mdqd stopped");
    Ok(())
}

/// File-existence and retention sweeps: once at startup, then daily.
fn spawn_sweeps(store: Store, data_dir: std::path::PathBuf, retention_days: i64) {
    tokio::spawn(async move {
        loop {
            if let Err(e) = sweep::scan_for_missing_files(&store, &data_dir).await {
                tracing::warn!("file sweep failed: {e:#}");
            }
            if let Err(e) = sweep::run_retention(&store, retention_days).await {
                tracing::warn!("retention sweep failed: {e:#}");
            }
            tokio::time::sleep(SWEEP_INTERVAL).await;
        }
    });
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::warn!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    tracing::info!("shutdown signal received");
}
