//! Fan-out of many URLs over one coordinator.
use std::sync::Arc;

use crate::downloader::Downloader;
use crate::error::DownloadError;

/// Starts one task per URL and waits for all of them. Concurrency is capped
/// only by the coordinator's slot pool. Results keep the order of `urls`.
pub(crate) async fn fan_out(
    downloader: &Arc<Downloader>,
    urls: &[String],
) -> Vec<Result<(), DownloadError>> {
    let mut handles = Vec::with_capacity(urls.len());
    for url in urls {
        let downloader = Arc::clone(downloader);
        let url = url.clone();
        handles.push(tokio::spawn(async move { downloader.download(&url).await }));
    }

    let mut results = Vec::with_capacity(handles.len());
    for (handle, url) in handles.into_iter().zip(urls) {
        let result = match handle.await {
            Ok(result) => result,
            Err(err) => Err(DownloadError::Join {
                url: url.clone(),
                reason: err.to_string(),
            }),
        };
        results.push(result);
    }
    results
}

pub async fn run_batch(downloader: &Arc<Downloader>, urls: &[String]) -> BatchReport {
    let results = fan_out(downloader, urls).await;
    BatchReport {
        outcomes: urls.iter().cloned().zip(results).collect(),
    }
}

/// Per-URL outcomes of a batch, in submission order.
#[derive(Debug, Default)]
pub struct BatchReport {
    outcomes: Vec<(String, Result<(), DownloadError>)>,
}

impl BatchReport {
    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|(_, r)| r.is_ok()).count()
    }

    pub fn cancelled(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, r)| matches!(r, Err(e) if e.is_cancelled()))
            .count()
    }

    /// URLs that failed for a reason other than cancellation.
    pub fn failures(&self) -> impl Iterator<Item = (&str, &DownloadError)> {
        self.outcomes.iter().filter_map(|(url, result)| match result {
            Err(err) if !err.is_cancelled() => Some((url.as_str(), err)),
            _ => None,
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Result<(), DownloadError>)> {
        self.outcomes.iter().map(|(url, result)| (url.as_str(), result))
    }

    pub fn into_results(self) -> Vec<Result<(), DownloadError>> {
        self.outcomes.into_iter().map(|(_, result)| result).collect()
    }

    pub fn summary(&self) -> String {
        let mut line = format!("{}/{} downloads completed", self.succeeded(), self.len());
        let cancelled = self.cancelled();
        if cancelled > 0 {
            line.push_str(&format!(", {} cancelled", cancelled));
        }
        line
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;

    fn report() -> BatchReport {
        BatchReport {
            outcomes: vec![
                ("http://h/a".into(), Ok(())),
                (
                    "http://h/b".into(),
                    Err(DownloadError::Fetch {
                        url: "http://h/b".into(),
                        source: TransportError::Status(500),
                    }),
                ),
                (
                    "http://h/c".into(),
                    Err(DownloadError::Cancelled {
                        url: "http://h/c".into(),
                    }),
                ),
            ],
        }
    }

    #[test]
    fn counts_outcomes() {
        let report = report();
        assert_eq!(report.len(), 3);
        assert_eq!(report.succeeded(), 1);
        assert_eq!(report.cancelled(), 1);
        let failures: Vec<&str> = report.failures().map(|(url, _)| url).collect();
        assert_eq!(failures, vec!["http://h/b"]);
        assert_eq!(report.summary(), "1/3 downloads completed, 1 cancelled");
    }

    #[test]
    fn results_stay_in_submission_order() {
        let results = report().into_results();
        assert!(results[0].is_ok());
        assert!(matches!(results[1], Err(DownloadError::Fetch { .. })));
        assert!(matches!(results[2], Err(DownloadError::Cancelled { .. })));
    }
}
