//! HTTP download with bounded retries and live progress.
//!
//! Each attempt streams the body into its own temporary file. A failed
//! attempt's file is deleted before the next attempt starts; a successful
//! attempt hands its file to the caller as a [`TempPath`], which deletes it
//! when dropped.

use std::future::Future;
use std::time::Duration;

use tempfile::TempPath;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use url::Url;

use crate::assets::progress::{AttemptLabel, AttemptReporter, ProgressEvent, ProgressSink, TransferOutcome};
use crate::assets::verify::verify_sha1_blocking;
use crate::error::{BltError, BltResult};

/// First attempt plus `retries` more, with a constant pause in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub retries: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn attempts(&self) -> u32 {
        self.retries.saturating_add(1)
    }

    /// Run `op` until it succeeds, fails with a non-transient error, or the
    /// attempts are used up. `op` receives the 1-based attempt number.
    pub async fn run<T, F, Fut>(
        &self,
        url: &Url,
        progress: &ProgressSink,
        mut op: F,
    ) -> BltResult<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = BltResult<T>>,
    {
        let attempts = self.attempts();
        let mut attempt = 1;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) if !e.is_transient() => return Err(e),
                Err(e) if attempt >= attempts => {
                    warn!(url = %url, attempts, error = %e, "giving up");
                    return Err(BltError::RetriesExhausted {
                        url: url.to_string(),
                        attempts,
                        last: Box::new(e),
                    });
                }
                Err(e) => {
                    warn!(url = %url, attempt, attempts, error = %e, "fetch attempt failed");
                    attempt += 1;
                    progress.emit(ProgressEvent::Retrying {
                        next_attempt: attempt,
                        attempts,
                        delay: self.delay,
                    });
                    tokio::time::sleep(self.delay).await;
                }
            }
        }
    }
}

/// Downloads single files into scoped temporary files.
#[derive(Debug, Clone)]
pub struct Fetcher {
    client: reqwest::Client,
    retry: RetryPolicy,
    tick: Duration,
}

impl Fetcher {
    pub fn new(client: reqwest::Client, retry: RetryPolicy, tick: Duration) -> Self {
        Self {
            client,
            retry,
            tick,
        }
    }

    /// Download `url`, retrying transient failures.
    ///
    /// When `expected_sha1` is given the finished download is verified once;
    /// a mismatch is returned immediately and never retried.
    pub async fn fetch(
        &self,
        url: &Url,
        expected_sha1: Option<&str>,
        progress: &ProgressSink,
    ) -> BltResult<TempPath> {
        let name = file_name(url);
        let attempts = self.retry.attempts();

        let path = self
            .retry
            .run(url, progress, |attempt| {
                let label = AttemptLabel {
                    attempt,
                    attempts,
                    name: name.clone(),
                };
                self.attempt(url, label, progress)
            })
            .await?;

        if let Some(expected) = expected_sha1 {
            progress.emit(ProgressEvent::Verifying { name: name.clone() });
            verify_sha1_blocking(path.to_path_buf(), expected.to_string()).await?;
            debug!(url = %url, "integrity validation passed");
        }

        Ok(path)
    }

    async fn attempt(
        &self,
        url: &Url,
        label: AttemptLabel,
        progress: &ProgressSink,
    ) -> BltResult<TempPath> {
        let tmp = tempfile::Builder::new()
            .prefix("blt-")
            .tempfile()
            .map_err(|e| BltError::io("create temporary download file", e))?;
        let file = tmp
            .reopen()
            .map_err(|e| BltError::io(format!("open {}", tmp.path().display()), e))?;
        let mut out = tokio::fs::File::from_std(file);

        debug!(url = %url, attempt = label.attempt, tmp = %tmp.path().display(), "fetching");

        let mut response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|source| BltError::Transport {
                url: url.to_string(),
                source,
            })?;

        if !response.status().is_success() {
            return Err(BltError::HttpStatus {
                url: url.to_string(),
                status: response.status(),
            });
        }

        let reporter = AttemptReporter::spawn(
            progress.clone(),
            label,
            response.content_length(),
            self.tick,
        );

        let mut transferred = 0u64;
        let copied: BltResult<()> = async {
            while let Some(chunk) = response.chunk().await.map_err(|source| BltError::Transport {
                url: url.to_string(),
                source,
            })? {
                out.write_all(&chunk)
                    .await
                    .map_err(|e| BltError::io(format!("write {}", tmp.path().display()), e))?;
                transferred += chunk.len() as u64;
                reporter.advance(transferred);
            }
            out.flush()
                .await
                .map_err(|e| BltError::io(format!("flush {}", tmp.path().display()), e))
        }
        .await;

        match copied {
            Ok(()) => {
                reporter.finish(TransferOutcome::Completed).await;
                info!(url = %url, bytes = transferred, "download complete");
                Ok(tmp.into_temp_path())
            }
            Err(e) => {
                reporter.finish(TransferOutcome::Failed(e.to_string())).await;
                Err(e)
            }
        }
    }
}

/// Last path segment of `url`, for progress output.
fn file_name(url: &Url) -> String {
    url.path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|segment| !segment.is_empty())
        .unwrap_or(url.as_str())
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn url() -> Url {
        Url::parse("https://example.com/v1/assets.tgz").unwrap()
    }

    #[test]
    fn attempts_include_the_first_try() {
        let policy = RetryPolicy {
            retries: 4,
            delay: Duration::from_secs(5),
        };
        assert_eq!(policy.attempts(), 5);
    }

    #[test]
    fn file_name_is_last_segment() {
        assert_eq!(file_name(&url()), "assets.tgz");
        let bare = Url::parse("https://example.com/").unwrap();
        assert_eq!(file_name(&bare), "https://example.com/");
    }

    #[tokio::test]
    async fn transient_errors_are_retried_until_success() {
        let policy = RetryPolicy {
            retries: 3,
            delay: Duration::from_millis(1),
        };
        let calls = AtomicU32::new(0);
        let value = policy
            .run(&url(), &ProgressSink::discard(), |attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt < 3 {
                        Err(BltError::HttpStatus {
                            url: "u".into(),
                            status: reqwest::StatusCode::BAD_GATEWAY,
                        })
                    } else {
                        Ok(attempt)
                    }
                }
            })
            .await
            .expect("third attempt succeeds");
        assert_eq!(value, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn fatal_errors_are_not_retried() {
        let policy = RetryPolicy {
            retries: 3,
            delay: Duration::from_millis(1),
        };
        let calls = AtomicU32::new(0);
        let err = policy
            .run(&url(), &ProgressSink::discard(), |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    Err::<(), _>(BltError::io(
                        "create temporary download file",
                        std::io::Error::other("disk full"),
                    ))
                }
            })
            .await
            .unwrap_err();
        assert!(matches!(err, BltError::Io { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhaustion_keeps_last_error_and_announces_retries() {
        let policy = RetryPolicy {
            retries: 2,
            delay: Duration::from_millis(1),
        };
        let (sink, mut rx) = ProgressSink::channel(16);
        let err = policy
            .run(&url(), &sink, |_| async {
                Err::<(), _>(BltError::HttpStatus {
                    url: "u".into(),
                    status: reqwest::StatusCode::SERVICE_UNAVAILABLE,
                })
            })
            .await
            .unwrap_err();

        match err {
            BltError::RetriesExhausted { attempts, last, .. } => {
                assert_eq!(attempts, 3);
                assert!(matches!(*last, BltError::HttpStatus { .. }));
            }
            other => panic!("expected RetriesExhausted, got {other}"),
        }

        let mut retries = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let ProgressEvent::Retrying { next_attempt, .. } = event {
                retries.push(next_attempt);
            }
        }
        assert_eq!(retries, [2, 3]);
    }
}
