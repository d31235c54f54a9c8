use std::path::PathBuf;

use thiserror::Error;

/// Failure talking to the remote server, either before or during the body transfer.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("server responded with status {0}")]
    Status(u16),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error("response body interrupted: {0}")]
    Body(#[source] std::io::Error),
    #[error("response body ended after {received} of {expected} bytes")]
    Truncated { expected: u64, received: u64 },
}

impl TransportError {
    /// HTTP status code when the server answered with a non-success status.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status(code) => Some(*code),
            Self::Http(err) => err.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("metadata probe failed for {url}: {source}")]
    Probe {
        url: String,
        #[source]
        source: TransportError,
    },
    #[error("fetch failed for {url}: {source}")]
    Fetch {
        url: String,
        #[source]
        source: TransportError,
    },
    #[error("i/o error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("download cancelled: {url}")]
    Cancelled { url: String },
    #[error("`{event}` callback failed for {url}: {source}")]
    Callback {
        event: &'static str,
        url: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("a transfer for {url} is already active")]
    AlreadyActive { url: String },
    #[error("concurrency slot pool was closed")]
    PoolClosed,
    #[error("download task for {url} did not finish: {reason}")]
    Join { url: String, reason: String },
}

impl DownloadError {
    pub(crate) fn callback(event: &'static str, url: &str, source: anyhow::Error) -> Self {
        Self::Callback {
            event,
            url: url.to_owned(),
            source,
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Cancellation is a user decision, not a failure needing the error callback.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_carry_url_and_cause() {
        let err = DownloadError::Probe {
            url: "http://example.com/a.bin".into(),
            source: TransportError::Status(404),
        };
        assert_eq!(
            err.to_string(),
            "metadata probe failed for http://example.com/a.bin: server responded with status 404"
        );
        assert!(!err.is_cancelled());

        let cancelled = DownloadError::Cancelled {
            url: "http://example.com/a.bin".into(),
        };
        assert!(cancelled.is_cancelled());
    }

    #[test]
    fn status_is_exposed_for_non_success_responses() {
        assert_eq!(TransportError::Status(500).status(), Some(500));
        let truncated = TransportError::Truncated {
            expected: 10,
            received: 4,
        };
        assert_eq!(truncated.status(), None);
    }
}
