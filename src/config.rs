use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::store::JsonStore;

pub const DEFAULT_MAX_CONCURRENT: usize = 5;
pub const DEFAULT_CHUNK_COUNT: usize = 5;
pub const DEFAULT_BLOCK_SIZE: usize = 32 * 1024;

pub const SETTING_DOWNLOAD_DIR: &str = "download_dir";
pub const SETTING_MAX_CONCURRENT: &str = "max_concurrent";
pub const SETTING_CHUNK_COUNT: &str = "chunk_count";

/// Coordinator configuration. None of these values affect correctness, only defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloaderConfig {
    /// Directory files are saved into.
    pub download_dir: PathBuf,
    /// Capacity of the slot pool.
    pub max_concurrent: usize,
    /// Number of progress chunks per download.
    pub chunk_count: usize,
    /// Bytes requested per read; pause and cancel are polled between reads.
    pub block_size: usize,
    /// Sleep between pause-flag checks while paused.
    pub pause_poll_interval_ms: u64,
    pub user_agent: String,
    pub connect_timeout_secs: u64,
}

impl Default for DownloaderConfig {
    fn default() -> Self {
        Self {
            download_dir: default_download_dir(),
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            chunk_count: DEFAULT_CHUNK_COUNT,
            block_size: DEFAULT_BLOCK_SIZE,
            pause_poll_interval_ms: 1000,
            user_agent: concat!("dlman/", env!("CARGO_PKG_VERSION")).to_string(),
            connect_timeout_secs: 10,
        }
    }
}

impl DownloaderConfig {
    pub fn with_download_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.download_dir = dir.into();
        self
    }

    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent.max(1);
        self
    }

    pub fn with_chunk_count(mut self, chunk_count: usize) -> Self {
        self.chunk_count = chunk_count.max(1);
        self
    }

    pub fn with_pause_poll_interval(mut self, interval: Duration) -> Self {
        self.pause_poll_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn pause_poll_interval(&self) -> Duration {
        Duration::from_millis(self.pause_poll_interval_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Overlays settings persisted in the record store. Unparsable values are skipped.
    pub async fn apply_settings(&mut self, store: &JsonStore) -> Result<()> {
        if let Some(dir) = store.get_setting(SETTING_DOWNLOAD_DIR).await? {
            if !dir.trim().is_empty() {
                self.download_dir = PathBuf::from(dir);
            }
        }
        if let Some(value) = store.get_setting(SETTING_MAX_CONCURRENT).await? {
            match value.trim().parse::<usize>() {
                Ok(n) if n > 0 => self.max_concurrent = n,
                _ => tracing::warn!(value = %value, "ignoring invalid max_concurrent setting"),
            }
        }
        if let Some(value) = store.get_setting(SETTING_CHUNK_COUNT).await? {
            match value.trim().parse::<usize>() {
                Ok(n) if n > 0 => self.chunk_count = n,
                _ => tracing::warn!(value = %value, "ignoring invalid chunk_count setting"),
            }
        }
        Ok(())
    }

    pub async fn save_settings(&self, store: &JsonStore) -> Result<()> {
        store
            .set_setting(SETTING_DOWNLOAD_DIR, &self.download_dir.to_string_lossy())
            .await
            .context("Failed to save download directory")?;
        store
            .set_setting(SETTING_MAX_CONCURRENT, &self.max_concurrent.to_string())
            .await
            .context("Failed to save concurrency limit")?;
        store
            .set_setting(SETTING_CHUNK_COUNT, &self.chunk_count.to_string())
            .await
            .context("Failed to save chunk count")?;
        Ok(())
    }
}

pub fn default_download_dir() -> PathBuf {
    dirs::download_dir()
        .or_else(|| dirs::home_dir().map(|home| home.join("Downloads")))
        .unwrap_or_else(|| PathBuf::from("Downloads"))
}

/// Default location of the record store.
pub fn default_store_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("dlman")
        .join("downloads.json")
}
