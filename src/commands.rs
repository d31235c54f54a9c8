use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{Context, Result};
use async_trait::async_trait;
use indicatif::{HumanBytes, MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use tokio::fs;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::JoinHandle;

use dlman::{BatchReport, Chunk, DownloadError, DownloadEvents, Downloader, JsonStore};

const BAR_SCALE: u64 = 1000;

/// Persists lifecycle events to the store and renders one progress bar per URL.
pub struct Console {
    store: Arc<JsonStore>,
    multi_progress: MultiProgress,
    bars: Mutex<HashMap<String, ProgressBar>>,
}

impl Console {
    pub fn new(store: Arc<JsonStore>) -> Self {
        let multi_progress = MultiProgress::new();
        multi_progress.set_draw_target(ProgressDrawTarget::stderr_with_hz(5));
        Self {
            store,
            multi_progress,
            bars: Mutex::new(HashMap::new()),
        }
    }

    fn bar(&self, url: &str) -> ProgressBar {
        let mut bars = self.bars.lock().unwrap_or_else(PoisonError::into_inner);
        bars.entry(url.to_string())
            .or_insert_with(|| {
                let pb = self.multi_progress.add(ProgressBar::new(BAR_SCALE));
                if let Ok(style) = ProgressStyle::default_bar()
                    .template("{prefix:>11} [{bar:30.cyan/blue}] {percent:>3}% {msg}")
                {
                    pb.set_style(style.progress_chars("=>-"));
                }
                pb.set_prefix("queued");
                pb.set_message(display_name(url));
                pb
            })
            .clone()
    }

    fn existing_bar(&self, url: &str) -> Option<ProgressBar> {
        self.bars
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(url)
            .cloned()
    }
}

#[async_trait]
impl DownloadEvents for Console {
    async fn added(&self, url: &str, total_size: u64, save_path: &Path) -> Result<()> {
        self.store.added(url, total_size, save_path).await?;
        let pb = self.bar(url);
        pb.set_position(0);
        pb.set_prefix("downloading");
        pb.set_message(format!("{} ({})", display_name(url), HumanBytes(total_size)));
        Ok(())
    }

    async fn paused(&self, url: &str) -> Result<()> {
        self.store.paused(url).await?;
        if let Some(pb) = self.existing_bar(url) {
            pb.set_prefix("paused");
        }
        Ok(())
    }

    async fn resumed(&self, url: &str) -> Result<()> {
        self.store.resumed(url).await?;
        self.bar(url).set_prefix("downloading");
        Ok(())
    }

    async fn completed(&self, url: &str) -> Result<()> {
        self.store.completed(url).await?;
        if let Some(pb) = self.existing_bar(url) {
            pb.set_prefix("completed");
            pb.finish_with_message(display_name(url));
        }
        Ok(())
    }

    async fn deleted(&self, url: &str, delete_file: bool) -> Result<()> {
        self.store.deleted(url, delete_file).await?;
        if let Some(pb) = self.existing_bar(url) {
            pb.set_prefix("deleted");
            pb.abandon();
        }
        Ok(())
    }

    async fn cancelled(&self, url: &str) -> Result<()> {
        self.store.cancelled(url).await?;
        if let Some(pb) = self.existing_bar(url) {
            pb.set_prefix("cancelled");
            pb.abandon();
        }
        Ok(())
    }

    async fn failed(&self, url: &str, error: &DownloadError) {
        self.store.failed(url, error).await;
        let pb = self.bar(url);
        pb.set_prefix("failed");
        pb.abandon_with_message(format!("{}: {}", display_name(url), error));
    }

    fn progress(&self, url: &str, fraction: f64) {
        if let Some(pb) = self.existing_bar(url) {
            pb.set_position((fraction.clamp(0.0, 1.0) * BAR_SCALE as f64) as u64);
        }
    }

    fn chunks(&self, url: &str, chunks: &[Chunk]) {
        if let Some(pb) = self.existing_bar(url) {
            pb.set_message(format!("{} {}", chunk_strip(chunks), display_name(url)));
        }
    }
}

fn display_name(url: &str) -> String {
    dlman::utils::sanitize_filename(&dlman::utils::get_filename_from_url(url))
}

/// One glyph per chunk, from empty to full.
pub fn chunk_strip(chunks: &[Chunk]) -> String {
    const LEVELS: [char; 9] = [' ', '▁', '▂', '▃', '▄', '▅', '▆', '▇', '█'];
    let glyphs: String = chunks
        .iter()
        .map(|c| LEVELS[(c.progress.clamp(0.0, 1.0) * 8.0).floor() as usize])
        .collect();
    format!("|{}|", glyphs)
}

/// Reads one URL per line, skipping blanks and `#` comments.
pub async fn read_tasks_file(path: &Path) -> Result<Vec<String>> {
    let file = fs::File::open(path)
        .await
        .with_context(|| format!("Failed to open tasks file: {:?}", path))?;
    let mut lines = BufReader::new(file).lines();
    let mut urls = Vec::new();
    while let Some(line) = lines.next_line().await? {
        let url = line.trim();
        if url.is_empty() || url.starts_with('#') {
            continue;
        }
        urls.push(url.to_string());
    }
    Ok(urls)
}

/// Operator command typed on stdin while a batch runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    Pause(usize),
    Resume(usize),
    Cancel(usize),
    Delete { index: usize, delete_file: bool },
}

pub fn parse_control(line: &str, count: usize) -> Result<Control, String> {
    let mut words = line.split_whitespace();
    let verb = words.next().ok_or_else(|| "empty command".to_string())?;
    let index: usize = words
        .next()
        .ok_or_else(|| format!("usage: {} <index>", verb))?
        .parse()
        .map_err(|_| "index must be a number".to_string())?;
    if index >= count {
        return Err(format!("no download at index {}", index));
    }
    match verb {
        "pause" | "p" => Ok(Control::Pause(index)),
        "resume" | "r" => Ok(Control::Resume(index)),
        "cancel" | "c" => Ok(Control::Cancel(index)),
        "delete" | "d" => Ok(Control::Delete {
            index,
            delete_file: words.next() == Some("file"),
        }),
        other => Err(format!("unknown command: {}", other)),
    }
}

async fn apply_control(
    downloader: &Arc<Downloader>,
    urls: &[String],
    control: Control,
) -> Result<(), DownloadError> {
    match control {
        Control::Pause(i) => downloader.pause_download(&urls[i]).await,
        Control::Resume(i) => downloader.resume_download(&urls[i]).await,
        Control::Cancel(i) => downloader.cancel_download(&urls[i]).await,
        Control::Delete { index, delete_file } => {
            downloader.delete_download(&urls[index], delete_file).await
        }
    }
}

/// Routes stdin commands to the coordinator until stdin closes.
pub fn spawn_control(downloader: Arc<Downloader>, urls: Vec<String>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if line.trim().is_empty() {
                continue;
            }
            match parse_control(&line, urls.len()) {
                Ok(control) => {
                    if let Err(e) = apply_control(&downloader, &urls, control).await {
                        eprintln!("{}", e);
                    }
                }
                Err(msg) => eprintln!("{}", msg),
            }
        }
    })
}

fn print_plan(urls: &[String], interactive: bool) {
    for (i, url) in urls.iter().enumerate() {
        println!("[{}] {}", i, url);
    }
    if interactive {
        println!("Commands: pause N | resume N | cancel N | delete N [file]");
    }
}

fn print_report(report: &BatchReport) {
    println!("{}", report.summary());
    for (url, err) in report.failures() {
        println!("  failed {}: {}", url, err);
    }
}

pub async fn run_downloads(
    downloader: Arc<Downloader>,
    store: Arc<JsonStore>,
    urls: Vec<String>,
    interactive: bool,
) -> Result<()> {
    for url in &urls {
        store
            .add_download(url, 0)
            .await
            .with_context(|| format!("Failed to queue {}", url))?;
    }
    print_plan(&urls, interactive);

    let control = interactive.then(|| spawn_control(Arc::clone(&downloader), urls.clone()));
    let report = dlman::batch::run_batch(&downloader, &urls).await;
    if let Some(handle) = control {
        handle.abort();
    }

    print_report(&report);
    Ok(())
}

pub async fn resume_pending(
    downloader: Arc<Downloader>,
    store: Arc<JsonStore>,
    interactive: bool,
) -> Result<()> {
    let urls: Vec<String> = store
        .get_pending_downloads()
        .await?
        .into_iter()
        .map(|record| record.url)
        .collect();
    if urls.is_empty() {
        println!("No pending downloads.");
        return Ok(());
    }
    print_plan(&urls, interactive);

    let control = interactive.then(|| spawn_control(Arc::clone(&downloader), urls.clone()));
    let report = downloader.resume_pending_downloads(&urls).await;
    if let Some(handle) = control {
        handle.abort();
    }

    print_report(&report);
    Ok(())
}

pub async fn delete_download(downloader: &Downloader, url: &str, delete_file: bool) -> Result<()> {
    downloader
        .delete_download(url, delete_file)
        .await
        .with_context(|| format!("Failed to delete {}", url))?;
    if delete_file {
        println!("Deleted {} and its file", url);
    } else {
        println!("Deleted {}", url);
    }
    Ok(())
}

pub async fn list_downloads(store: &JsonStore) -> Result<()> {
    let records = store.get_all_downloads().await?;
    if records.is_empty() {
        println!("No downloads recorded in {:?}.", store.path());
        return Ok(());
    }

    println!("{:<6} {:<12} {:<12} {:<50} {}", "ID", "Status", "Size", "URL", "Path");
    println!("{:-<6} {:-<12} {:-<12} {:-<50} {:-<20}", "", "", "", "", "");
    for record in records {
        let path = record
            .save_path
            .as_deref()
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        println!(
            "{:<6} {:<12} {:<12} {:<50} {}",
            record.id,
            record.status.to_string(),
            format!("{}", HumanBytes(record.size)),
            record.url,
            path
        );
    }
    Ok(())
}

pub fn absolute(path: PathBuf) -> PathBuf {
    if path.is_relative() {
        if let Ok(cwd) = std::env::current_dir() {
            return cwd.join(path);
        }
    }
    path
}
