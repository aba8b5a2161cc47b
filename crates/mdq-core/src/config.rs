use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// Static daemon configuration loaded from `~/.config/mdq/config.toml`.
///
/// Runtime-mutable settings (`max_concurrent`, `sync_destination`) are
/// not here; they live in the job database so they survive restarts and
/// can be changed through the API without touching this file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// TCP port the HTTP API listens on.
    pub listen_port: u16,
    /// Root directory for downloaded media (per-day subfolders).
    /// Defaults to the XDG data dir when unset.
    pub data_dir: Option<PathBuf>,
    /// CORS origins allowed by the API; empty list allows any origin.
    pub allowed_origins: Vec<String>,
    /// Parallel transfers passed to the sync copy tool.
    pub sync_transfers: u32,
    /// Failed jobs older than this many days are purged by the sweep.
    pub failed_job_retention_days: i64,
    /// Terminal jobs completed within this window still show up in the
    /// active list so clients can observe fresh outcomes.
    pub active_terminal_window_secs: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            listen_port: 4697,
            data_dir: None,
            allowed_origins: Vec::new(),
            sync_transfers: 4,
            failed_job_retention_days: 7,
            active_terminal_window_secs: 3600,
        }
    }
}

impl DaemonConfig {
    /// Resolve the media root, falling back to `~/.local/share/mdq/media`.
    pub fn data_dir(&self) -> Result<PathBuf> {
        if let Some(dir) = &self.data_dir {
            return Ok(dir.clone());
        }
        let xdg_dirs = xdg::BaseDirectories::with_prefix("mdq")?;
        Ok(xdg_dirs.get_data_home().join("media"))
    }
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("mdq")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Load configuration from disk, creating a default file if none exists.
pub fn load_or_init() -> Result<DaemonConfig> {
    let path = config_path()?;
    if !path.exists() {
        let default_cfg = DaemonConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, toml)?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }

    let data = fs::read_to_string(&path)?;
    let cfg: DaemonConfig = toml::from_str(&data)?;
    Ok(cfg)
}
