//! Lifecycle notifications from the coordinator to persistence and UI.
use std::path::Path;

use anyhow::Result;
use async_trait::async_trait;

use crate::chunks::Chunk;
use crate::error::DownloadError;

/// Receiver of transfer lifecycle events.
///
/// This is the only channel through which the coordinator talks to the
/// record store. Every method has a no-op default so implementors override
/// just the events they persist. Failures of the fallible hooks are surfaced
/// to the caller as [`DownloadError::Callback`].
#[async_trait]
pub trait DownloadEvents: Send + Sync {
    /// Called after the metadata probe and before any bytes move.
    async fn added(&self, _url: &str, _total_size: u64, _save_path: &Path) -> Result<()> {
        Ok(())
    }

    async fn paused(&self, _url: &str) -> Result<()> {
        Ok(())
    }

    async fn resumed(&self, _url: &str) -> Result<()> {
        Ok(())
    }

    async fn completed(&self, _url: &str) -> Result<()> {
        Ok(())
    }

    /// Responsible for removing the record, and the file when `delete_file` is set.
    async fn deleted(&self, _url: &str, _delete_file: bool) -> Result<()> {
        Ok(())
    }

    async fn cancelled(&self, _url: &str) -> Result<()> {
        Ok(())
    }

    /// Attempt ended with an error other than cancellation.
    async fn failed(&self, _url: &str, _error: &DownloadError) {}

    /// Fraction of the announced size read so far, non-decreasing within an attempt.
    fn progress(&self, _url: &str, _fraction: f64) {}

    /// Chunk table after each block written.
    fn chunks(&self, _url: &str, _chunks: &[Chunk]) {}
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopEvents;

#[async_trait]
impl DownloadEvents for NoopEvents {}
