use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

/// Global configuration loaded from `~/.config/vdm/config.toml`.
///
/// Every tunable of the download engine lives here; unknown keys in an older
/// config file simply fall back to their defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadConfig {
    /// Directory downloaded files are written into.
    pub download_root: PathBuf,
    /// Path of the SQLite job database.
    pub db_path: PathBuf,
    /// Route origin traffic through `proxy_url`.
    pub use_proxy: bool,
    pub proxy_url: Option<String>,
    /// Bytes requested per read from an HTTP body stream.
    pub chunk_read: usize,
    /// Bytes accumulated in memory before flushing to disk.
    pub write_buffer: usize,
    /// Upper bound on concurrent segments per job.
    pub max_segments: usize,
    /// A job is only segmented when `total_size > 2 * min_segment_size`.
    pub min_segment_size: u64,
    /// Attempt budget for a single worker (connect + stream retries).
    pub max_retries: u32,
    /// Per-request timeout in seconds (HEAD uses `min(5, request_timeout)`).
    pub request_timeout_secs: u64,
    /// Interval of the per-job progress emitter, milliseconds.
    pub progress_interval_ms: u64,
    /// Minimum spacing between non-terminal progress broadcasts, milliseconds.
    pub ws_throttle_ms: u64,
    /// Keep-alive expiry for pooled connections, seconds.
    pub keepalive_secs: u64,
    /// Connection pool size per origin.
    pub pool_per_host: usize,
    /// Bandwidth samples needed before the planner adapts segment counts.
    pub bandwidth_sample_threshold: usize,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            download_root: default_download_root(),
            db_path: default_db_path(),
            use_proxy: false,
            proxy_url: None,
            chunk_read: 4 * 1024 * 1024,
            write_buffer: 8 * 1024 * 1024,
            max_segments: 8,
            min_segment_size: 64 * 1024 * 1024,
            max_retries: 5,
            request_timeout_secs: 10,
            progress_interval_ms: 200,
            ws_throttle_ms: 100,
            keepalive_secs: 60,
            pool_per_host: 20,
            bandwidth_sample_threshold: 5,
        }
    }
}

impl DownloadConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }

    pub fn ws_throttle(&self) -> Duration {
        Duration::from_millis(self.ws_throttle_ms)
    }

    pub fn keepalive(&self) -> Duration {
        Duration::from_secs(self.keepalive_secs)
    }
}

fn default_download_root() -> PathBuf {
    xdg::BaseDirectories::with_prefix("vdm")
        .map(|d| d.get_data_home().join("downloads"))
        .unwrap_or_else(|_| PathBuf::from("downloads"))
}

fn default_db_path() -> PathBuf {
    xdg::BaseDirectories::with_prefix("vdm")
        .map(|d| d.get_state_home().join("downloads.db"))
        .unwrap_or_else(|_| PathBuf::from("downloads.db"))
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("vdm")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Load configuration from disk, creating a default file if none exists.
pub fn load_or_init() -> Result<DownloadConfig> {
    let path = config_path()?;
    if !path.exists() {
        let default_cfg = DownloadConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, toml)?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }

    let data = fs::read_to_string(&path)?;
    let cfg: DownloadConfig = toml::from_str(&data)?;
    Ok(cfg)
}
