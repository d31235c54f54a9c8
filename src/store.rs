//! JSON-file record store for download metadata and settings.
//!
//! The whole store is one JSON document rewritten on every mutation. It is
//! the persistence side of [`DownloadEvents`]: the coordinator never calls it
//! directly, only through the lifecycle hooks.
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::DownloadError;
use crate::events::DownloadEvents;
use crate::model::DownloadStatus;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DownloadRecord {
    pub id: u64,
    pub url: String,
    pub status: DownloadStatus,
    pub size: u64,
    #[serde(default)]
    pub save_path: Option<PathBuf>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Debug, Default)]
struct StoreData {
    next_id: u64,
    downloads: Vec<DownloadRecord>,
    settings: BTreeMap<String, String>,
}

pub struct JsonStore {
    path: PathBuf,
    data: Mutex<StoreData>,
}

impl JsonStore {
    /// Opens the store at `path`, starting empty when the file does not exist.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let data = if fs::try_exists(&path).await.unwrap_or(false) {
            let content = fs::read_to_string(&path)
                .await
                .with_context(|| format!("Failed to read store {:?}", path))?;
            if content.trim().is_empty() {
                StoreData::default()
            } else {
                serde_json::from_str(&content)
                    .with_context(|| format!("Failed to parse store {:?}", path))?
            }
        } else {
            StoreData::default()
        };
        debug!(path = %path.display(), records = data.downloads.len(), "opened store");
        Ok(Self {
            path,
            data: Mutex::new(data),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, data: &StoreData) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .await
                    .context("Failed to create store directory")?;
            }
        }
        let content = serde_json::to_string_pretty(data)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, content)
            .await
            .with_context(|| format!("Failed to write store {:?}", tmp))?;
        fs::rename(&tmp, &self.path)
            .await
            .with_context(|| format!("Failed to replace store {:?}", self.path))?;
        Ok(())
    }

    /// Inserts a `pending` record, or resets an existing one for a new attempt.
    pub async fn add_download(&self, url: &str, total_size: u64) -> Result<()> {
        self.upsert(url, total_size, None, DownloadStatus::Pending).await
    }

    async fn upsert(
        &self,
        url: &str,
        total_size: u64,
        save_path: Option<&Path>,
        status: DownloadStatus,
    ) -> Result<()> {
        let mut data = self.data.lock().await;
        let now = Utc::now();
        if let Some(index) = data.downloads.iter().position(|r| r.url == url) {
            let record = &mut data.downloads[index];
            record.size = total_size;
            record.status = status;
            if let Some(path) = save_path {
                record.save_path = Some(path.to_path_buf());
            }
            record.updated_at = now;
        } else {
            data.next_id += 1;
            let id = data.next_id;
            data.downloads.push(DownloadRecord {
                id,
                url: url.to_string(),
                status,
                size: total_size,
                save_path: save_path.map(Path::to_path_buf),
                updated_at: now,
            });
        }
        self.persist(&data).await
    }

    pub async fn update_status(&self, url: &str, status: DownloadStatus) -> Result<()> {
        let mut data = self.data.lock().await;
        let record = data
            .downloads
            .iter_mut()
            .find(|r| r.url == url)
            .ok_or_else(|| anyhow!("no download recorded for {}", url))?;
        record.status = status;
        record.updated_at = Utc::now();
        self.persist(&data).await
    }

    /// Like [`JsonStore::update_status`] but a missing record is not an error.
    /// Returns whether a record was updated.
    async fn update_status_if_recorded(&self, url: &str, status: DownloadStatus) -> Result<bool> {
        let mut data = self.data.lock().await;
        let record = match data.downloads.iter_mut().find(|r| r.url == url) {
            Some(record) => record,
            None => {
                debug!(url, status = %status, "no record to update");
                return Ok(false);
            }
        };
        record.status = status;
        record.updated_at = Utc::now();
        self.persist(&data).await?;
        Ok(true)
    }

    pub async fn get_download_by_url(&self, url: &str) -> Result<DownloadRecord> {
        let data = self.data.lock().await;
        data.downloads
            .iter()
            .find(|r| r.url == url)
            .cloned()
            .ok_or_else(|| anyhow!("no download recorded for {}", url))
    }

    pub async fn get_all_downloads(&self) -> Result<Vec<DownloadRecord>> {
        Ok(self.data.lock().await.downloads.clone())
    }

    /// Records left `pending` or `downloading`, typically by an interrupted session.
    pub async fn get_pending_downloads(&self) -> Result<Vec<DownloadRecord>> {
        let data = self.data.lock().await;
        Ok(data
            .downloads
            .iter()
            .filter(|r| matches!(r.status, DownloadStatus::Pending | DownloadStatus::Downloading))
            .cloned()
            .collect())
    }

    pub async fn delete_download(&self, url: &str) -> Result<()> {
        let mut data = self.data.lock().await;
        let before = data.downloads.len();
        data.downloads.retain(|r| r.url != url);
        if data.downloads.len() == before {
            return Ok(());
        }
        self.persist(&data).await
    }

    pub async fn get_setting(&self, key: &str) -> Result<Option<String>> {
        Ok(self.data.lock().await.settings.get(key).cloned())
    }

    pub async fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        let mut data = self.data.lock().await;
        data.settings.insert(key.to_string(), value.to_string());
        self.persist(&data).await
    }
}

#[async_trait]
impl DownloadEvents for JsonStore {
    async fn added(&self, url: &str, total_size: u64, save_path: &Path) -> Result<()> {
        self.upsert(url, total_size, Some(save_path), DownloadStatus::Downloading)
            .await
            .context("Failed to record download")
    }

    async fn paused(&self, url: &str) -> Result<()> {
        self.update_status_if_recorded(url, DownloadStatus::Paused)
            .await
            .map(drop)
    }

    async fn resumed(&self, url: &str) -> Result<()> {
        self.update_status_if_recorded(url, DownloadStatus::Downloading)
            .await
            .map(drop)
    }

    async fn completed(&self, url: &str) -> Result<()> {
        self.update_status(url, DownloadStatus::Completed)
            .await
            .context("Failed to mark download completed")
    }

    async fn deleted(&self, url: &str, delete_file: bool) -> Result<()> {
        let record = match self.get_download_by_url(url).await {
            Ok(record) => record,
            Err(_) => return Ok(()),
        };
        self.update_status(url, DownloadStatus::Deleted).await?;
        if delete_file {
            if let Some(path) = &record.save_path {
                match fs::remove_file(path).await {
                    Ok(()) => debug!(path = %path.display(), "removed downloaded file"),
                    Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                    Err(err) => {
                        return Err(err).with_context(|| format!("Failed to remove {:?}", path))
                    }
                }
            }
        }
        self.delete_download(url).await
    }

    async fn cancelled(&self, url: &str) -> Result<()> {
        self.update_status_if_recorded(url, DownloadStatus::Cancelled)
            .await
            .map(drop)
    }

    async fn failed(&self, url: &str, error: &DownloadError) {
        if self.get_download_by_url(url).await.is_err() {
            return;
        }
        if let Err(err) = self.update_status(url, DownloadStatus::Failed).await {
            warn!(url, error = %err, cause = %error, "could not record failure");
        }
    }
}
