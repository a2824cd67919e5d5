//! # OI Tracker
//!
//! Intraday tracking of a published open-interest spurts table.
//!
//! ## Features
//!
//! - **Scheduled collection**: fixed-interval fetch cycles inside a
//!   configurable trading window, with per-cycle failure isolation
//! - **Resilient fetching**: long-lived session with cookie warm-up,
//!   exponential-backoff retries, and response validation
//! - **Normalization**: symbol cleanup, alias canonicalization, and
//!   deterministic deduplication across snapshots
//! - **Intraday deltas**: per-instrument changes against the day's baseline
//!   or the previous snapshot, derived on demand
//!
//! ## Architecture
//!
//! A single background task runs the cycle scheduler and is the sole writer
//! of the day's time series; consumers read through [`SeriesHandle`], which
//! hands out snapshot-consistent copies. Every cycle persists the raw
//! download for audit and the updated series as JSON, one file per trading
//! day.

pub mod cli;
pub mod config;
pub mod fetcher;
pub mod query;
pub mod scheduler;
pub mod snapshot;
pub mod storage;

// Re-export commonly used types
pub use config::Settings;
pub use fetcher::{
    FetchError, HttpTransport, RawSnapshotFile, RetryPolicy, SnapshotFetcher, SnapshotTransport,
};
pub use query::SeriesHandle;
pub use scheduler::{
    CycleError, CycleScheduler, CycleStats, SchedulerHandle, SchedulerState, TradingWindow,
};
pub use snapshot::{
    CycleOutcome, DailyTimeSeries, DeltaMode, InstrumentDelta, InstrumentRecord, ProcessError,
    Snapshot, SnapshotProcessor,
};
pub use storage::{DailyStore, StorageError};
