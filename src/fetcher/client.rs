//! Snapshot download client
//!
//! Owns the HTTP session against the source site and turns a download into a
//! validated [`RawSnapshotFile`]. The data endpoint only responds to sessions
//! that have visited the market-data page, so a warm-up request runs before
//! the first download and again whenever the server rejects the session.

use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, info};

use super::retry::{with_retry, RetryClass, RetryPolicy};
use super::transport::{HttpTransport, SnapshotTransport, TransportError};
use crate::config::SourceSettings;

/// A downloaded snapshot file, held only between download and parse.
#[derive(Debug, Clone)]
pub struct RawSnapshotFile {
    /// Raw spreadsheet bytes as served by the source
    pub content: Vec<u8>,
    /// Capture timestamp, assigned when the download completed
    pub captured_at: DateTime<Utc>,
}

impl RawSnapshotFile {
    /// Size of the downloaded content in bytes.
    pub fn size(&self) -> usize {
        self.content.len()
    }
}

/// Fetch failures surfaced to the cycle scheduler.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("Network failure after {attempts} attempt(s): {message}")]
    Network { attempts: u32, message: String },

    #[error("Invalid snapshot response: {0}")]
    InvalidResponse(String),
}

/// Downloads and validates snapshot files over a [`SnapshotTransport`].
pub struct SnapshotFetcher<T> {
    transport: T,
    policy: RetryPolicy,
    min_bytes: usize,
    session_ready: AtomicBool,
}

impl SnapshotFetcher<HttpTransport> {
    /// Build a fetcher over the real HTTP transport.
    pub fn from_settings(settings: &SourceSettings) -> Result<Self, TransportError> {
        Ok(Self::new(
            HttpTransport::new(settings)?,
            settings.retry.to_policy(),
            settings.min_bytes,
        ))
    }
}

impl<T: SnapshotTransport> SnapshotFetcher<T> {
    /// Create a fetcher with an explicit transport and retry policy.
    pub fn new(transport: T, policy: RetryPolicy, min_bytes: usize) -> Self {
        Self {
            transport,
            policy,
            min_bytes,
            session_ready: AtomicBool::new(false),
        }
    }

    /// Access the underlying transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Download the current snapshot, retrying transient failures.
    ///
    /// Fails with [`FetchError::Network`] once retries are exhausted on
    /// transport errors, or immediately on non-transient HTTP failures.
    /// Fails with [`FetchError::InvalidResponse`] when the final download was
    /// received but is not a recognizable snapshot table.
    pub async fn fetch(&self) -> Result<RawSnapshotFile, FetchError> {
        let raw = with_retry(&self.policy, "snapshot fetch", |attempt| {
            self.attempt(attempt)
        })
        .await?;

        info!(
            "Fetched snapshot: {} bytes at {}",
            raw.size(),
            raw.captured_at
        );
        Ok(raw)
    }

    async fn attempt(&self, attempt: u32) -> Result<RawSnapshotFile, RetryClass<FetchError>> {
        if !self.session_ready.load(Ordering::Acquire) {
            self.transport
                .warm_up()
                .await
                .map_err(|e| self.classify(e, attempt))?;
            self.session_ready.store(true, Ordering::Release);
        }

        let content = match self.transport.download().await {
            Ok(content) => content,
            Err(err) if err.is_auth_expiry() => {
                debug!("Session rejected ({}), re-establishing before next attempt", err);
                self.session_ready.store(false, Ordering::Release);
                return Err(RetryClass::Transient(FetchError::Network {
                    attempts: attempt,
                    message: err.to_string(),
                }));
            }
            Err(err) => return Err(self.classify(err, attempt)),
        };

        match validate_snapshot(&content, self.min_bytes) {
            Ok(()) => Ok(RawSnapshotFile {
                content,
                captured_at: Utc::now(),
            }),
            // A bad body is frequently a transient upstream hiccup; retry it
            Err(reason) => Err(RetryClass::Transient(FetchError::InvalidResponse(reason))),
        }
    }

    fn classify(&self, err: TransportError, attempt: u32) -> RetryClass<FetchError> {
        let transient = err.is_transient();
        let fetch_err = FetchError::Network {
            attempts: attempt,
            message: err.to_string(),
        };
        if transient {
            RetryClass::Transient(fetch_err)
        } else {
            RetryClass::Fatal(fetch_err)
        }
    }
}

/// Check that the download looks like a snapshot table: non-empty, not an
/// HTML error page, and carrying a header row plus at least one data row.
fn validate_snapshot(content: &[u8], min_bytes: usize) -> Result<(), String> {
    if content.is_empty() {
        return Err("empty response body".to_string());
    }
    if content.len() < min_bytes {
        return Err(format!(
            "response too small ({} bytes, expected at least {})",
            content.len(),
            min_bytes
        ));
    }

    let text = String::from_utf8_lossy(content);
    let preview = &text[..text.len().min(1024)];
    if preview.trim_start().starts_with('<') || preview.to_lowercase().contains("<html") {
        return Err("received HTML instead of a spreadsheet".to_string());
    }

    let mut lines = text.lines().filter(|line| !line.trim().is_empty());
    if lines.next().is_none() {
        return Err("no header row".to_string());
    }
    if lines.next().is_none() {
        return Err("header row but no data rows".to_string());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetcher::mock::{MockTransport, SAMPLE_CSV};
    use std::time::Duration;

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            jitter: 0.0,
        }
    }

    fn status(code: u16) -> TransportError {
        TransportError::Status {
            status: code,
            url: "http://test".to_string(),
        }
    }

    #[tokio::test]
    async fn test_fetch_happy_path() {
        let transport = MockTransport::new();
        let observer = transport.clone();
        let fetcher = SnapshotFetcher::new(transport, fast_policy(3), 10);

        let raw = fetcher.fetch().await.unwrap();
        assert_eq!(raw.content, SAMPLE_CSV.as_bytes());
        assert_eq!(observer.warm_ups(), 1);
        assert_eq!(observer.downloads(), 1);
    }

    #[tokio::test]
    async fn test_fetch_succeeds_on_third_attempt() {
        let transport = MockTransport::with_responses(vec![
            Err(status(500)),
            Err(TransportError::Timeout("slow".into())),
        ]);
        let observer = transport.clone();
        let fetcher = SnapshotFetcher::new(transport, fast_policy(3), 10);

        let raw = fetcher.fetch().await.unwrap();
        assert!(!raw.content.is_empty());
        assert_eq!(observer.downloads(), 3);
        // Session was never rejected, so a single warm-up suffices
        assert_eq!(observer.warm_ups(), 1);
    }

    #[tokio::test]
    async fn test_fetch_exhausts_attempts() {
        let transport = MockTransport::with_responses(vec![
            Err(status(500)),
            Err(status(502)),
            Err(status(503)),
        ]);
        let observer = transport.clone();
        let fetcher = SnapshotFetcher::new(transport, fast_policy(3), 10);

        let err = fetcher.fetch().await.unwrap_err();
        assert!(matches!(err, FetchError::Network { attempts: 3, .. }));
        assert_eq!(observer.downloads(), 3);
    }

    #[tokio::test]
    async fn test_fetch_fails_fast_on_client_error() {
        let transport = MockTransport::with_responses(vec![Err(status(404))]);
        let observer = transport.clone();
        let fetcher = SnapshotFetcher::new(transport, fast_policy(3), 10);

        let err = fetcher.fetch().await.unwrap_err();
        assert!(matches!(err, FetchError::Network { attempts: 1, .. }));
        assert_eq!(observer.downloads(), 1);
    }

    #[tokio::test]
    async fn test_fetch_reestablishes_session_on_auth_expiry() {
        let transport = MockTransport::with_responses(vec![Err(status(403))]);
        let observer = transport.clone();
        let fetcher = SnapshotFetcher::new(transport, fast_policy(3), 10);

        fetcher.fetch().await.unwrap();
        // One warm-up for the initial session, one after the 403
        assert_eq!(observer.warm_ups(), 2);
        assert_eq!(observer.downloads(), 2);
    }

    #[tokio::test]
    async fn test_fetch_rejects_html_body() {
        let transport =
            MockTransport::new().with_default_body(b"<html><body>Access Denied</body></html>".to_vec());
        let fetcher = SnapshotFetcher::new(transport, fast_policy(2), 10);

        let err = fetcher.fetch().await.unwrap_err();
        assert!(matches!(err, FetchError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn test_fetch_rejects_empty_body() {
        let transport = MockTransport::new().with_default_body(Vec::new());
        let fetcher = SnapshotFetcher::new(transport, fast_policy(2), 10);

        let err = fetcher.fetch().await.unwrap_err();
        assert!(matches!(err, FetchError::InvalidResponse(_)));
    }

    #[test]
    fn test_validate_snapshot() {
        assert!(validate_snapshot(SAMPLE_CSV.as_bytes(), 10).is_ok());

        assert!(validate_snapshot(b"", 0).is_err());
        assert!(validate_snapshot(b"tiny", 100).is_err());
        assert!(validate_snapshot(b"<html>error</html>\nx\n", 5).is_err());
        // Header but no data rows
        assert!(validate_snapshot(b"SYMBOL,OI\n", 5).is_err());
    }
}
