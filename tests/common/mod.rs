//! Shared doubles for the coordinator tests: a scripted transport that never
//! touches the network and an event sink that records everything it sees.
#![allow(dead_code)]

pub mod file_server;

use std::collections::HashMap;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use tokio::io::{AsyncRead, ReadBuf};
use tokio_util::io::StreamReader;

use dlman::{Body, Chunk, DownloadError, DownloadEvents, Transport, TransportError};

/// What the scripted server does for one URL.
#[derive(Debug, Clone)]
pub struct Script {
    /// Size reported by the probe.
    pub announced: u64,
    pub body: Vec<u8>,
    /// Bytes delivered per piece of the body stream.
    pub piece: usize,
    /// Delay before each piece.
    pub delay: Duration,
    pub probe_status: Option<u16>,
    pub fetch_status: Option<u16>,
    /// Time the probe takes to answer.
    pub probe_delay: Duration,
    /// Time the fetch takes before the body is handed over.
    pub fetch_delay: Duration,
}

impl Script {
    pub fn bytes(len: usize) -> Self {
        let body: Vec<u8> = (0u8..=250).cycle().take(len).collect();
        Self {
            announced: len as u64,
            body,
            piece: 4 * 1024,
            delay: Duration::ZERO,
            probe_status: None,
            fetch_status: None,
            probe_delay: Duration::ZERO,
            fetch_delay: Duration::ZERO,
        }
    }

    pub fn slow_probe(mut self, delay: Duration) -> Self {
        self.probe_delay = delay;
        self
    }

    pub fn slow_fetch(mut self, delay: Duration) -> Self {
        self.fetch_delay = delay;
        self
    }

    pub fn slow(mut self, piece: usize, delay: Duration) -> Self {
        self.piece = piece.max(1);
        self.delay = delay;
        self
    }

    pub fn announced(mut self, size: u64) -> Self {
        self.announced = size;
        self
    }

    pub fn probe_fails(mut self, status: u16) -> Self {
        self.probe_status = Some(status);
        self
    }

    pub fn fetch_fails(mut self, status: u16) -> Self {
        self.fetch_status = Some(status);
        self
    }
}

#[derive(Default)]
pub struct ScriptedTransport {
    scripts: Mutex<HashMap<String, Script>>,
    in_flight: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
    fetches: AtomicUsize,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn serve(&self, url: &str, script: Script) {
        self.scripts.lock().unwrap().insert(url.to_string(), script);
    }

    /// Highest number of bodies open at the same time.
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn reset_peak(&self) {
        self.peak
            .store(self.in_flight.load(Ordering::SeqCst), Ordering::SeqCst);
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    fn script(&self, url: &str) -> Option<Script> {
        self.scripts.lock().unwrap().get(url).cloned()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn probe(&self, url: &str) -> Result<u64, TransportError> {
        let script = self.script(url).ok_or(TransportError::Status(404))?;
        if !script.probe_delay.is_zero() {
            tokio::time::sleep(script.probe_delay).await;
        }
        match script.probe_status {
            Some(status) => Err(TransportError::Status(status)),
            None => Ok(script.announced),
        }
    }

    async fn fetch(&self, url: &str) -> Result<Body, TransportError> {
        let script = self.script(url).ok_or(TransportError::Status(404))?;
        if !script.fetch_delay.is_zero() {
            tokio::time::sleep(script.fetch_delay).await;
        }
        if let Some(status) = script.fetch_status {
            return Err(TransportError::Status(status));
        }
        self.fetches.fetch_add(1, Ordering::SeqCst);

        let delay = script.delay;
        let pieces: Vec<Bytes> = script
            .body
            .chunks(script.piece)
            .map(Bytes::copy_from_slice)
            .collect();
        let stream = futures::stream::iter(pieces).then(move |piece| async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            Ok::<Bytes, io::Error>(piece)
        });
        let reader = StreamReader::new(Box::pin(stream));

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        Ok(Box::new(Tracked {
            inner: Box::new(reader),
            in_flight: Arc::clone(&self.in_flight),
        }))
    }
}

/// Body wrapper that counts itself as in flight until dropped.
struct Tracked {
    inner: Body,
    in_flight: Arc<AtomicUsize>,
}

impl AsyncRead for Tracked {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl Drop for Tracked {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Added(String, u64),
    Paused(String),
    Resumed(String),
    Completed(String),
    Deleted(String, bool),
    Cancelled(String),
    Failed(String),
}

#[derive(Default)]
pub struct RecordingEvents {
    events: Mutex<Vec<Event>>,
    progress: Mutex<HashMap<String, Vec<f64>>>,
    chunks: Mutex<HashMap<String, Vec<Vec<Chunk>>>>,
}

impl RecordingEvents {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn count(&self, event: &Event) -> usize {
        self.events().iter().filter(|e| *e == event).count()
    }

    pub fn progress(&self, url: &str) -> Vec<f64> {
        self.progress
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .unwrap_or_default()
    }

    pub fn chunk_history(&self, url: &str) -> Vec<Vec<Chunk>> {
        self.chunks
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .unwrap_or_default()
    }

    fn push(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }
}

#[async_trait]
impl DownloadEvents for RecordingEvents {
    async fn added(
        &self,
        url: &str,
        total_size: u64,
        _save_path: &std::path::Path,
    ) -> anyhow::Result<()> {
        self.push(Event::Added(url.to_string(), total_size));
        Ok(())
    }

    async fn paused(&self, url: &str) -> anyhow::Result<()> {
        self.push(Event::Paused(url.to_string()));
        Ok(())
    }

    async fn resumed(&self, url: &str) -> anyhow::Result<()> {
        self.push(Event::Resumed(url.to_string()));
        Ok(())
    }

    async fn completed(&self, url: &str) -> anyhow::Result<()> {
        self.push(Event::Completed(url.to_string()));
        Ok(())
    }

    async fn deleted(&self, url: &str, delete_file: bool) -> anyhow::Result<()> {
        self.push(Event::Deleted(url.to_string(), delete_file));
        Ok(())
    }

    async fn cancelled(&self, url: &str) -> anyhow::Result<()> {
        self.push(Event::Cancelled(url.to_string()));
        Ok(())
    }

    async fn failed(&self, url: &str, _error: &DownloadError) {
        self.push(Event::Failed(url.to_string()));
    }

    fn progress(&self, url: &str, fraction: f64) {
        self.progress
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_default()
            .push(fraction);
    }

    fn chunks(&self, url: &str, chunks: &[Chunk]) {
        self.chunks
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_default()
            .push(chunks.to_vec());
    }
}

/// Polls `condition` every few milliseconds, failing the test after `timeout`.
pub async fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + timeout;
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached within {:?}",
            timeout
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
