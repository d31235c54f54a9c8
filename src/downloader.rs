//! Download coordinator.
//!
//! Bounds how many transfers run at once, owns the per-URL pause and cancel
//! signals, and drives each transfer loop from metadata probe to terminal
//! state, reporting through [`DownloadEvents`].
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use tokio::fs::{self, File};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::batch::{self, BatchReport};
use crate::chunks::ChunkMap;
use crate::config::DownloaderConfig;
use crate::error::{DownloadError, TransportError};
use crate::events::DownloadEvents;
use crate::model::{Download, DownloadStatus};
use crate::progress::ProgressReader;
use crate::transport::{Body, HttpTransport, Transport};
use crate::utils::destination_path;

pub struct Downloader {
    transport: Arc<dyn Transport>,
    events: Arc<dyn DownloadEvents>,
    config: RwLock<DownloaderConfig>,
    slots: RwLock<Arc<Semaphore>>,
    registry: Arc<Mutex<Registry>>,
    // orders control hooks against the loop's own lifecycle hooks
    admin: tokio::sync::Mutex<()>,
    next_attempt: AtomicU64,
}

/// Control state shared between callers and transfer loops.
#[derive(Default)]
struct Registry {
    attempts: HashMap<String, Attempt>,
    paused: HashSet<String>,
}

struct Attempt {
    id: u64,
    cancel: CancellationToken,
    /// Cancelled once the loop has exited and released the URL.
    done: CancellationToken,
    download: Download,
}

fn lock(registry: &Mutex<Registry>) -> MutexGuard<'_, Registry> {
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Registration of one transfer attempt; dropping it releases the URL.
struct ActiveAttempt {
    registry: Arc<Mutex<Registry>>,
    url: String,
    id: u64,
    cancel: CancellationToken,
    done: CancellationToken,
}

impl ActiveAttempt {
    fn update(&self, f: impl FnOnce(&mut Download)) {
        let mut registry = lock(&self.registry);
        if let Some(attempt) = registry.attempts.get_mut(&self.url) {
            if attempt.id == self.id {
                f(&mut attempt.download);
            }
        }
    }

    fn cancelled(&self) -> DownloadError {
        DownloadError::Cancelled {
            url: self.url.clone(),
        }
    }
}

impl Drop for ActiveAttempt {
    fn drop(&mut self) {
        let mut registry = lock(&self.registry);
        let owned = registry
            .attempts
            .get(&self.url)
            .map_or(false, |attempt| attempt.id == self.id);
        if owned {
            registry.attempts.remove(&self.url);
            registry.paused.remove(&self.url);
        }
        drop(registry);
        self.done.cancel();
    }
}

impl Downloader {
    pub fn new(
        config: DownloaderConfig,
        transport: Arc<dyn Transport>,
        events: Arc<dyn DownloadEvents>,
    ) -> Self {
        let capacity = config.max_concurrent.max(1);
        Self {
            transport,
            events,
            config: RwLock::new(config),
            slots: RwLock::new(Arc::new(Semaphore::new(capacity))),
            registry: Arc::new(Mutex::new(Registry::default())),
            admin: tokio::sync::Mutex::new(()),
            next_attempt: AtomicU64::new(0),
        }
    }

    /// Coordinator backed by a `reqwest` client built from `config`.
    pub fn with_http(
        config: DownloaderConfig,
        events: Arc<dyn DownloadEvents>,
    ) -> Result<Self, TransportError> {
        let transport = HttpTransport::new(&config)?;
        Ok(Self::new(config, Arc::new(transport), events))
    }

    pub fn config(&self) -> DownloaderConfig {
        self.config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn max_concurrent(&self) -> usize {
        self.config().max_concurrent
    }

    /// Replaces the slot pool. Transfers holding a slot of the old pool keep
    /// it until they finish; new acquisitions use the new pool.
    pub fn set_max_concurrent(&self, max_concurrent: usize) {
        let max_concurrent = max_concurrent.max(1);
        *self.slots.write().unwrap_or_else(PoisonError::into_inner) =
            Arc::new(Semaphore::new(max_concurrent));
        self.config
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .max_concurrent = max_concurrent;
        info!(max_concurrent, "slot pool replaced");
    }

    /// Applies to attempts that start afterwards.
    pub fn set_download_dir(&self, dir: impl Into<PathBuf>) {
        self.config
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .download_dir = dir.into();
    }

    /// Applies to attempts that start afterwards.
    pub fn set_chunk_count(&self, chunk_count: usize) {
        self.config
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .chunk_count = chunk_count.max(1);
    }

    fn slots(&self) -> Arc<Semaphore> {
        Arc::clone(&self.slots.read().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn is_active(&self, url: &str) -> bool {
        lock(&self.registry).attempts.contains_key(url)
    }

    pub fn is_paused(&self, url: &str) -> bool {
        lock(&self.registry).paused.contains(url)
    }

    /// Current view of a live attempt, if any.
    pub fn snapshot(&self, url: &str) -> Option<Download> {
        lock(&self.registry)
            .attempts
            .get(url)
            .map(|attempt| attempt.download.clone())
    }

    pub fn active_downloads(&self) -> Vec<Download> {
        let mut downloads: Vec<Download> = lock(&self.registry)
            .attempts
            .values()
            .map(|attempt| attempt.download.clone())
            .collect();
        downloads.sort_by(|a, b| a.url.cmp(&b.url));
        downloads
    }

    fn register(&self, url: &str) -> Result<ActiveAttempt, DownloadError> {
        let mut registry = lock(&self.registry);
        if registry.attempts.contains_key(url) {
            return Err(DownloadError::AlreadyActive {
                url: url.to_owned(),
            });
        }
        Ok(self.insert_attempt(&mut registry, url))
    }

    fn insert_attempt(&self, registry: &mut Registry, url: &str) -> ActiveAttempt {
        let id = self.next_attempt.fetch_add(1, Ordering::Relaxed) + 1;
        let cancel = CancellationToken::new();
        let done = CancellationToken::new();
        registry.attempts.insert(
            url.to_owned(),
            Attempt {
                id,
                cancel: cancel.clone(),
                done: done.clone(),
                download: Download::new(url),
            },
        );
        debug!(url, attempt = id, "registered download");
        ActiveAttempt {
            registry: Arc::clone(&self.registry),
            url: url.to_owned(),
            id,
            cancel,
            done,
        }
    }

    /// Takes the admin lock unless the attempt is cancelled first. Lifecycle
    /// hooks fired by the loop run under it, so a cancel or delete either
    /// lands before the hook (and the loop stops) or after it (and wins).
    async fn admin_for(
        &self,
        attempt: &ActiveAttempt,
    ) -> Result<tokio::sync::MutexGuard<'_, ()>, DownloadError> {
        tokio::select! {
            biased;
            _ = attempt.cancel.cancelled() => Err(attempt.cancelled()),
            guard = self.admin.lock() => Ok(guard),
        }
    }

    /// Downloads `url` into the download directory, returning once the
    /// transfer completes, fails or is cancelled.
    #[instrument(skip(self))]
    pub async fn download(&self, url: &str) -> Result<(), DownloadError> {
        let attempt = self.register(url)?;
        self.run(attempt).await
    }

    async fn run(&self, attempt: ActiveAttempt) -> Result<(), DownloadError> {
        let result = self.transfer(&attempt).await;
        match &result {
            Ok(()) => info!(url = %attempt.url, "download completed"),
            Err(err) if err.is_cancelled() => info!(url = %attempt.url, "download cancelled"),
            Err(err) => {
                warn!(url = %attempt.url, error = %err, "download failed");
                self.events.failed(&attempt.url, err).await;
            }
        }
        result
    }

    async fn transfer(&self, attempt: &ActiveAttempt) -> Result<(), DownloadError> {
        let url = attempt.url.as_str();
        let slots = self.slots();
        let _permit = tokio::select! {
            biased;
            _ = attempt.cancel.cancelled() => return Err(attempt.cancelled()),
            permit = slots.acquire_owned() => permit.map_err(|_| DownloadError::PoolClosed)?,
        };
        let config = self.config();
        debug!(url, attempt = attempt.id, "acquired slot");

        let probed = tokio::select! {
            biased;
            _ = attempt.cancel.cancelled() => return Err(attempt.cancelled()),
            probed = self.transport.probe(url) => probed,
        };
        let total_size = probed.map_err(|source| DownloadError::Probe {
            url: url.to_owned(),
            source,
        })?;

        let save_path = destination_path(&config.download_dir, url);
        let mut chunks = ChunkMap::new(total_size, config.chunk_count);
        attempt.update(|download| {
            download.total_size = total_size;
            download.save_path = Some(save_path.clone());
            download.chunks = chunks.chunks().to_vec();
            if download.status == DownloadStatus::Pending {
                download.status = DownloadStatus::Downloading;
            }
        });

        {
            let _admin = self.admin_for(attempt).await?;
            self.events
                .added(url, total_size, &save_path)
                .await
                .map_err(|err| DownloadError::callback("added", url, err))?;
            // `added` records the transfer as downloading; restore a pause
            // that arrived while it was queued or probing
            if self.is_paused(url) {
                self.events
                    .paused(url)
                    .await
                    .map_err(|err| DownloadError::callback("paused", url, err))?;
            }
        }

        fs::create_dir_all(&config.download_dir)
            .await
            .map_err(|err| DownloadError::io(config.download_dir.clone(), err))?;

        let fetched = tokio::select! {
            biased;
            _ = attempt.cancel.cancelled() => return Err(attempt.cancelled()),
            fetched = self.transport.fetch(url) => fetched,
        };
        let body = fetched.map_err(|source| DownloadError::Fetch {
            url: url.to_owned(),
            source,
        })?;

        let mut file = {
            let _admin = self.admin_for(attempt).await?;
            File::create(&save_path)
                .await
                .map_err(|err| DownloadError::io(save_path.clone(), err))?
        };

        let mut reader: Body = if total_size > 0 {
            let events = Arc::clone(&self.events);
            let progress_url = url.to_owned();
            Box::new(ProgressReader::new(body, total_size, move |fraction| {
                events.progress(&progress_url, fraction)
            }))
        } else {
            body
        };

        info!(url, total_size, path = %save_path.display(), "transfer started");
        let mut buf = vec![0u8; config.block_size.max(1)];
        let mut downloaded = 0u64;
        loop {
            // cancel is checked first so it wins over a pause
            if attempt.cancel.is_cancelled() {
                return Err(attempt.cancelled());
            }
            if self.is_paused(url) {
                tokio::select! {
                    _ = attempt.cancel.cancelled() => {}
                    _ = tokio::time::sleep(config.pause_poll_interval()) => {}
                }
                continue;
            }

            let n = reader
                .read(&mut buf)
                .await
                .map_err(|err| DownloadError::Fetch {
                    url: url.to_owned(),
                    source: TransportError::Body(err),
                })?;
            if n == 0 {
                break;
            }
            file.write_all(&buf[..n])
                .await
                .map_err(|err| DownloadError::io(save_path.clone(), err))?;

            downloaded += n as u64;
            chunks.update(downloaded);
            attempt.update(|download| {
                download.downloaded_size = downloaded;
                download.chunks = chunks.chunks().to_vec();
            });
            self.events.chunks(url, chunks.chunks());

            if total_size > 0 && downloaded >= total_size {
                break;
            }
        }

        file.flush()
            .await
            .map_err(|err| DownloadError::io(save_path.clone(), err))?;
        drop(file);

        if downloaded < total_size {
            return Err(DownloadError::Fetch {
                url: url.to_owned(),
                source: TransportError::Truncated {
                    expected: total_size,
                    received: downloaded,
                },
            });
        }

        chunks.update(downloaded);
        {
            let _admin = self.admin_for(attempt).await?;
            attempt.update(|download| {
                download.status = DownloadStatus::Completed;
                download.chunks = chunks.chunks().to_vec();
            });
            self.events
                .completed(url)
                .await
                .map_err(|err| DownloadError::callback("completed", url, err))?;
        }
        self.events.progress(url, 1.0);
        Ok(())
    }

    /// Runs [`Downloader::download`] for every URL concurrently. Results are
    /// aligned with `urls` by index.
    pub async fn download_multiple(
        self: &Arc<Self>,
        urls: &[String],
    ) -> Vec<Result<(), DownloadError>> {
        batch::fan_out(self, urls).await
    }

    /// Restarts downloads left unfinished by a previous session.
    pub async fn resume_pending_downloads(self: &Arc<Self>, urls: &[String]) -> BatchReport {
        info!(count = urls.len(), "resuming pending downloads");
        batch::run_batch(self, urls).await
    }

    /// Stops the transfer loop from requesting further blocks. A read already
    /// in flight is not interrupted. Without a live attempt only the hook runs;
    /// the flag lives exactly as long as the attempt it belongs to.
    #[instrument(skip(self))]
    pub async fn pause_download(&self, url: &str) -> Result<(), DownloadError> {
        let _admin = self.admin.lock().await;
        {
            let mut registry = lock(&self.registry);
            let live = match registry.attempts.get_mut(url) {
                Some(attempt) => {
                    attempt.download.status = DownloadStatus::Paused;
                    true
                }
                None => false,
            };
            if live {
                registry.paused.insert(url.to_owned());
            }
        }
        self.events
            .paused(url)
            .await
            .map_err(|err| DownloadError::callback("paused", url, err))
    }

    /// Clears the pause flag. A live loop picks up where it stopped; when no
    /// loop is alive a fresh attempt is spawned, restarting from byte zero.
    /// A loop that is cancelled but still unwinding is waited out first.
    /// Errors of the spawned attempt go to [`DownloadEvents::failed`].
    #[instrument(skip(self))]
    pub async fn resume_download(self: &Arc<Self>, url: &str) -> Result<(), DownloadError> {
        let restart = {
            let _admin = self.admin.lock().await;
            let restart = {
                let mut registry = lock(&self.registry);
                registry.paused.remove(url);
                match registry.attempts.get_mut(url) {
                    Some(attempt) if attempt.cancel.is_cancelled() => {
                        Restart::AfterExit(attempt.done.clone())
                    }
                    Some(attempt) => {
                        if attempt.download.status == DownloadStatus::Paused {
                            attempt.download.status = if attempt.download.save_path.is_some() {
                                DownloadStatus::Downloading
                            } else {
                                DownloadStatus::Pending
                            };
                        }
                        Restart::Running
                    }
                    None => Restart::Fresh(self.insert_attempt(&mut registry, url)),
                }
            };

            self.events
                .resumed(url)
                .await
                .map_err(|err| DownloadError::callback("resumed", url, err))?;
            restart
        };

        match restart {
            Restart::Running => {}
            Restart::Fresh(attempt) => {
                debug!(url, attempt = attempt.id, "restarting download");
                let this = Arc::clone(self);
                tokio::spawn(async move {
                    let _ = this.run(attempt).await;
                });
            }
            Restart::AfterExit(done) => {
                debug!(url, "restarting download once the cancelled loop exits");
                let this = Arc::clone(self);
                let url = url.to_owned();
                tokio::spawn(async move {
                    done.cancelled().await;
                    match this.register(&url) {
                        Ok(attempt) => {
                            let _ = this.run(attempt).await;
                        }
                        Err(err) => debug!(url = %url, error = %err, "restart skipped"),
                    }
                });
            }
        }
        Ok(())
    }

    /// Signals the live loop, if any, to stop at its next poll. Cancelling a
    /// URL with no live loop only records the cancellation.
    #[instrument(skip(self))]
    pub async fn cancel_download(&self, url: &str) -> Result<(), DownloadError> {
        let _admin = self.admin.lock().await;
        {
            let mut registry = lock(&self.registry);
            if let Some(attempt) = registry.attempts.get(url) {
                attempt.cancel.cancel();
            }
            registry.paused.remove(url);
        }
        self.events
            .cancelled(url)
            .await
            .map_err(|err| DownloadError::callback("cancelled", url, err))
    }

    /// Cancels any live loop and waits for it to exit, then lets the `deleted`
    /// hook remove the record (and the file when `delete_file` is set). The
    /// URL can be downloaded again as soon as this returns.
    #[instrument(skip(self))]
    pub async fn delete_download(&self, url: &str, delete_file: bool) -> Result<(), DownloadError> {
        let _admin = self.admin.lock().await;
        let done = {
            let mut registry = lock(&self.registry);
            registry.paused.remove(url);
            registry.attempts.get(url).map(|attempt| {
                attempt.cancel.cancel();
                attempt.done.clone()
            })
        };
        if let Some(done) = done {
            // the loop never waits on the admin lock without also watching its
            // cancel token, so it can always reach this point
            done.cancelled().await;
            debug!(url, "cancelled loop exited");
        }
        self.events
            .deleted(url, delete_file)
            .await
            .map_err(|err| DownloadError::callback("deleted", url, err))
    }
}

enum Restart {
    Running,
    Fresh(ActiveAttempt),
    AfterExit(CancellationToken),
}
