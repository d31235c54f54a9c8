//! HTTP access used by the coordinator: a metadata probe and a streamed GET.
use std::io;

use async_trait::async_trait;
use futures::TryStreamExt;
use reqwest::header::CONTENT_LENGTH;
use reqwest::Client;
use tokio::io::AsyncRead;
use tokio_util::io::StreamReader;
use tracing::debug;

use crate::config::DownloaderConfig;
use crate::error::TransportError;

/// Readable response body.
pub type Body = Box<dyn AsyncRead + Send + Unpin>;

#[async_trait]
pub trait Transport: Send + Sync {
    /// Returns the announced content length, 0 when the server does not send one.
    async fn probe(&self, url: &str) -> Result<u64, TransportError>;

    async fn fetch(&self, url: &str) -> Result<Body, TransportError>;
}

pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(config: &DownloaderConfig) -> Result<Self, TransportError> {
        let client = Client::builder()
            .user_agent(config.user_agent.as_str())
            .connect_timeout(config.connect_timeout())
            .build()?;
        Ok(Self { client })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn probe(&self, url: &str) -> Result<u64, TransportError> {
        let response = self.client.head(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status(status.as_u16()));
        }
        // HEAD bodies are empty, so read the header instead of the body size hint.
        let total_size = response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse::<u64>().ok())
            .unwrap_or(0);
        debug!(url, total_size, "probe succeeded");
        Ok(total_size)
    }

    async fn fetch(&self, url: &str) -> Result<Body, TransportError> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status(status.as_u16()));
        }
        let stream = response
            .bytes_stream()
            .map_err(|err| io::Error::new(io::ErrorKind::Other, err));
        Ok(Box::new(StreamReader::new(Box::pin(stream))))
    }
}
