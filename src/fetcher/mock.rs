//! Scripted transport for tests and development
//!
//! Queues canned responses and counts calls so retry and scheduling
//! behaviour can be asserted without touching the network.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::transport::{SnapshotTransport, TransportError};

/// A small but well-formed snapshot table used as the default mock payload.
pub const SAMPLE_CSV: &str = "\
SYMBOL,LATEST OI,PREV OI,CHANGE IN OI,% CHANGE IN OI,VOLUME
RELIANCE,1000,900,100,11.11,50000
TCS,2000,1900,100,5.26,40000
HDFCBANK,1500,1500,0,0.00,30000
";

/// Scripted snapshot transport.
///
/// Downloads pop queued responses first and fall back to a default body once
/// the queue is empty. Clones share the same queue and counters.
#[derive(Clone)]
pub struct MockTransport {
    responses: Arc<Mutex<VecDeque<Result<Vec<u8>, TransportError>>>>,
    default_body: Arc<Vec<u8>>,
    warm_ups: Arc<AtomicU32>,
    downloads: Arc<AtomicU32>,
}

impl MockTransport {
    /// Transport that always serves [`SAMPLE_CSV`].
    pub fn new() -> Self {
        Self::with_responses(Vec::new())
    }

    /// Transport serving the given responses in order, then [`SAMPLE_CSV`].
    pub fn with_responses(responses: Vec<Result<Vec<u8>, TransportError>>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(responses.into())),
            default_body: Arc::new(SAMPLE_CSV.as_bytes().to_vec()),
            warm_ups: Arc::new(AtomicU32::new(0)),
            downloads: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Replace the fallback body served once the queue is drained.
    pub fn with_default_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.default_body = Arc::new(body.into());
        self
    }

    /// Queue another response.
    pub fn push(&self, response: Result<Vec<u8>, TransportError>) {
        self.responses.lock().push_back(response);
    }

    /// Number of warm-up calls observed.
    pub fn warm_ups(&self) -> u32 {
        self.warm_ups.load(Ordering::SeqCst)
    }

    /// Number of download calls observed.
    pub fn downloads(&self) -> u32 {
        self.downloads.load(Ordering::SeqCst)
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SnapshotTransport for MockTransport {
    async fn warm_up(&self) -> Result<(), TransportError> {
        self.warm_ups.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn download(&self) -> Result<Vec<u8>, TransportError> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        match self.responses.lock().pop_front() {
            Some(response) => response,
            None => Ok(self.default_body.as_ref().clone()),
        }
    }
}
