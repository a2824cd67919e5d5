//! HTTP transport for the snapshot source
//!
//! The source site only serves the data endpoint to sessions that have
//! visited the market-data page first, so the transport exposes a `warm_up`
//! step alongside the actual download. The trait seam exists so the fetcher
//! and scheduler can be driven by a scripted transport in tests.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Client};
use thiserror::Error;
use tracing::debug;

use crate::config::SourceSettings;

/// Transport-level failures, classified for retry decisions.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Failed to build HTTP client: {0}")]
    Client(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Connection failed: {0}")]
    Connect(String),

    #[error("HTTP status {status} from {url}")]
    Status { status: u16, url: String },

    #[error("Failed to read response body: {0}")]
    Body(String),
}

impl TransportError {
    /// Whether a retry has a chance of succeeding.
    pub fn is_transient(&self) -> bool {
        match self {
            TransportError::Timeout(_)
            | TransportError::Connect(_)
            | TransportError::Body(_) => true,
            TransportError::Status { status, .. } => *status == 429 || *status >= 500,
            TransportError::Client(_) => false,
        }
    }

    /// Whether the server rejected the session cookies (warm-up required).
    pub fn is_auth_expiry(&self) -> bool {
        matches!(self, TransportError::Status { status: 401 | 403, .. })
    }
}

/// Source-site transport: session bootstrap plus snapshot download.
#[async_trait]
pub trait SnapshotTransport: Send + Sync {
    /// Establish the session the data endpoint requires (cookies).
    async fn warm_up(&self) -> Result<(), TransportError>;

    /// Download the current snapshot file.
    async fn download(&self) -> Result<Vec<u8>, TransportError>;
}

/// Real HTTP transport backed by a long-lived reqwest client.
///
/// The client keeps a cookie store so the warm-up request's cookies are
/// replayed on the data request, and applies a fixed per-request timeout.
pub struct HttpTransport {
    client: Client,
    page_url: String,
    data_url: String,
}

impl HttpTransport {
    /// Build a transport from source settings.
    pub fn new(settings: &SourceSettings) -> Result<Self, TransportError> {
        let client = Client::builder()
            .user_agent(&settings.user_agent)
            .timeout(Duration::from_secs(settings.timeout_secs))
            .cookie_store(true)
            .build()
            .map_err(|e| TransportError::Client(e.to_string()))?;

        Ok(Self {
            client,
            page_url: settings.page_url.clone(),
            data_url: settings.data_url.clone(),
        })
    }
}

#[async_trait]
impl SnapshotTransport for HttpTransport {
    async fn warm_up(&self) -> Result<(), TransportError> {
        debug!("Warming up session via {}", self.page_url);

        let response = self
            .client
            .get(&self.page_url)
            .header(
                header::ACCEPT,
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
            )
            .send()
            .await
            .map_err(map_send_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status {
                status: status.as_u16(),
                url: self.page_url.clone(),
            });
        }

        // Drain the body so the connection can be reused
        response
            .bytes()
            .await
            .map_err(|e| TransportError::Body(e.to_string()))?;

        debug!("Session established");
        Ok(())
    }

    async fn download(&self) -> Result<Vec<u8>, TransportError> {
        debug!("Downloading snapshot from {}", self.data_url);

        let response = self
            .client
            .get(&self.data_url)
            .header(
                header::ACCEPT,
                "text/csv,application/vnd.ms-excel,application/octet-stream,*/*",
            )
            .send()
            .await
            .map_err(map_send_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status {
                status: status.as_u16(),
                url: self.data_url.clone(),
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| TransportError::Body(e.to_string()))?;

        debug!("Downloaded {} bytes", bytes.len());
        Ok(bytes.to_vec())
    }
}

fn map_send_error(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout(err.to_string())
    } else if err.is_connect() {
        TransportError::Connect(err.to_string())
    } else {
        TransportError::Body(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(TransportError::Timeout("t".into()).is_transient());
        assert!(TransportError::Connect("c".into()).is_transient());
        assert!(TransportError::Status { status: 500, url: "u".into() }.is_transient());
        assert!(TransportError::Status { status: 503, url: "u".into() }.is_transient());
        assert!(TransportError::Status { status: 429, url: "u".into() }.is_transient());

        assert!(!TransportError::Status { status: 404, url: "u".into() }.is_transient());
        assert!(!TransportError::Status { status: 400, url: "u".into() }.is_transient());
        assert!(!TransportError::Client("bad".into()).is_transient());
    }

    #[test]
    fn test_auth_expiry_classification() {
        assert!(TransportError::Status { status: 401, url: "u".into() }.is_auth_expiry());
        assert!(TransportError::Status { status: 403, url: "u".into() }.is_auth_expiry());
        assert!(!TransportError::Status { status: 500, url: "u".into() }.is_auth_expiry());
        assert!(!TransportError::Timeout("t".into()).is_auth_expiry());
    }

    #[test]
    fn test_build_from_settings() {
        let settings = SourceSettings::default();
        let transport = HttpTransport::new(&settings).unwrap();
        assert_eq!(transport.page_url, settings.page_url);
        assert_eq!(transport.data_url, settings.data_url);
    }
}
