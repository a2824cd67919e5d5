//! Snapshot download layer
//!
//! No knowledge of business data lives here: the fetcher produces validated
//! raw files, and the snapshot processor turns them into records.

pub mod client;
pub mod mock;
pub mod retry;
pub mod transport;

pub use client::{FetchError, RawSnapshotFile, SnapshotFetcher};
pub use retry::{with_retry, RetryClass, RetryPolicy};
pub use transport::{HttpTransport, SnapshotTransport, TransportError};
