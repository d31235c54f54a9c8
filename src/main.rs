mod commands;

use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use dlman::config::default_store_path;
use dlman::{Downloader, DownloaderConfig, JsonStore};

use crate::commands::Console;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// URLs to download
    #[arg(index = 1)]
    urls: Vec<String>,

    /// File with additional URLs, one per line
    #[arg(short = 't', long = "tasks-file")]
    tasks_file: Option<PathBuf>,

    /// Directory to save downloaded files
    #[arg(short = 'd', long = "download-dir")]
    download_dir: Option<PathBuf>,

    /// Maximum number of concurrent downloads
    #[arg(short = 'c', long)]
    concurrency: Option<usize>,

    /// Number of progress chunks per file
    #[arg(short = 's', long)]
    chunks: Option<usize>,

    /// Path of the download record store
    #[arg(long)]
    store: Option<PathBuf>,

    /// Persist the effective download dir, concurrency and chunk count
    #[arg(long)]
    save_settings: bool,

    /// List all recorded downloads and their status
    #[arg(short = 'l', long)]
    list: bool,

    /// Restart downloads left pending or downloading by a previous run
    #[arg(long)]
    resume_pending: bool,

    /// Delete the record of a download, cancelling it if active
    #[arg(long, value_name = "URL")]
    delete: Option<String>,

    /// With --delete, also remove the downloaded file
    #[arg(long, requires = "delete")]
    delete_file: bool,

    /// Enable debug logging
    #[arg(short = 'v', long)]
    verbose: bool,
}

fn init_logging(verbose: bool) {
    let default = if verbose { "dlman=debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let rt = tokio::runtime::Runtime::new()?;
    let result = rt.block_on(run(args));
    // the stdin reader task blocks a worker thread; do not wait for it
    rt.shutdown_background();
    result
}

async fn run(args: Args) -> Result<()> {
    let store_path = args.store.clone().unwrap_or_else(default_store_path);
    let store = Arc::new(
        JsonStore::open(&store_path)
            .await
            .with_context(|| format!("Failed to open record store {:?}", store_path))?,
    );

    if args.list {
        return commands::list_downloads(&store).await;
    }

    let mut config = DownloaderConfig::default();
    config.apply_settings(&store).await?;
    if let Some(dir) = args.download_dir {
        config = config.with_download_dir(commands::absolute(dir));
    }
    if let Some(n) = args.concurrency {
        config = config.with_max_concurrent(n);
    }
    if let Some(n) = args.chunks {
        config = config.with_chunk_count(n);
    }
    if args.save_settings {
        config.save_settings(&store).await?;
    }

    let console = Arc::new(Console::new(Arc::clone(&store)));
    let downloader = Arc::new(
        Downloader::with_http(config, console).context("Failed to build HTTP client")?,
    );

    if let Some(url) = &args.delete {
        return commands::delete_download(&downloader, url, args.delete_file).await;
    }

    let interactive = std::io::stdin().is_terminal();
    if args.resume_pending {
        return commands::resume_pending(downloader, store, interactive).await;
    }

    let mut urls = args.urls;
    if let Some(tasks_file) = &args.tasks_file {
        urls.extend(commands::read_tasks_file(tasks_file).await?);
    }
    if urls.is_empty() {
        if args.save_settings {
            return Ok(());
        }
        bail!("No URLs given. Pass URLs as arguments or use --tasks-file.");
    }

    commands::run_downloads(downloader, store, urls, interactive).await
}
