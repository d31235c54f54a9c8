use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::chunks::Chunk;

/// Lifecycle state of a download.
///
/// `Pending` until the transfer loop starts, then `Downloading`, optionally
/// `Paused`, and finally one of the terminal states for that attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadStatus {
    #[default]
    Pending,
    Downloading,
    Paused,
    Completed,
    Failed,
    Cancelled,
    Deleted,
}

impl DownloadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Downloading => "downloading",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Deleted => "deleted",
        }
    }

    /// Terminal for the current attempt; only `Paused` may continue.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Cancelled | Self::Deleted
        )
    }
}

impl fmt::Display for DownloadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DownloadStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "downloading" => Ok(Self::Downloading),
            "paused" => Ok(Self::Paused),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            "deleted" => Ok(Self::Deleted),
            other => Err(format!("unknown download status: {other}")),
        }
    }
}

/// In-memory view of one live transfer attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Download {
    pub url: String,
    /// Server-reported length; 0 when unknown.
    pub total_size: u64,
    pub downloaded_size: u64,
    pub save_path: Option<PathBuf>,
    pub status: DownloadStatus,
    pub chunks: Vec<Chunk>,
}

impl Download {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            total_size: 0,
            downloaded_size: 0,
            save_path: None,
            status: DownloadStatus::Pending,
            chunks: Vec::new(),
        }
    }

    /// Overall completion clamped to `[0, 1]` for display.
    pub fn fraction(&self) -> f64 {
        if self.total_size == 0 {
            return if self.status == DownloadStatus::Completed { 1.0 } else { 0.0 };
        }
        (self.downloaded_size as f64 / self.total_size as f64).clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_serializes_lowercase() {
        let json = serde_json::to_string(&DownloadStatus::Cancelled).unwrap();
        assert_eq!(json, "\"cancelled\"");
        let parsed: DownloadStatus = serde_json::from_str("\"downloading\"").unwrap();
        assert_eq!(parsed, DownloadStatus::Downloading);
    }

    #[test]
    fn status_parses_from_display_form() {
        for status in [
            DownloadStatus::Pending,
            DownloadStatus::Paused,
            DownloadStatus::Failed,
            DownloadStatus::Deleted,
        ] {
            assert_eq!(status.to_string().parse::<DownloadStatus>(), Ok(status));
        }
        assert!("bogus".parse::<DownloadStatus>().is_err());
    }

    #[test]
    fn only_paused_and_active_states_are_non_terminal() {
        assert!(!DownloadStatus::Pending.is_terminal());
        assert!(!DownloadStatus::Downloading.is_terminal());
        assert!(!DownloadStatus::Paused.is_terminal());
        assert!(DownloadStatus::Completed.is_terminal());
        assert!(DownloadStatus::Deleted.is_terminal());
    }

    #[test]
    fn fraction_is_clamped() {
        let mut download = Download::new("http://example.com/f");
        assert_eq!(download.fraction(), 0.0);
        download.total_size = 10;
        download.downloaded_size = 12;
        assert_eq!(download.fraction(), 1.0);
        download.downloaded_size = 5;
        assert_eq!(download.fraction(), 0.5);
    }
}
