//! # dlman
//!
//! Concurrent multi-download coordinator: fetches files over HTTP with a
//! bounded number of parallel transfers, tracks chunked progress, and
//! supports pausing, resuming, cancelling and deleting individual downloads.
//!
//! The [`Downloader`] owns the transfer loops and control signals and talks to
//! persistence only through the [`DownloadEvents`] trait, which
//! [`JsonStore`] implements.

pub mod batch;
pub mod chunks;
pub mod config;
pub mod downloader;
pub mod error;
pub mod events;
pub mod model;
pub mod progress;
pub mod store;
pub mod transport;
pub mod utils;

pub use batch::BatchReport;
pub use chunks::{Chunk, ChunkMap};
pub use config::DownloaderConfig;
pub use downloader::Downloader;
pub use error::{DownloadError, TransportError};
pub use events::{DownloadEvents, NoopEvents};
pub use model::{Download, DownloadStatus};
pub use progress::ProgressReader;
pub use store::{DownloadRecord, JsonStore};
pub use transport::{Body, HttpTransport, Transport};
