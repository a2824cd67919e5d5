//! Snapshot data model and intraday time series
//!
//! An [`InstrumentRecord`] is one instrument's metric readings at a capture
//! time; a [`Snapshot`] is the full table captured in one cycle; a
//! [`DailyTimeSeries`] is the append-only sequence of snapshots for a single
//! trading day. Deltas are derived on demand, never stored.

pub mod normalize;
pub mod parser;
pub mod processor;

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use processor::{CycleOutcome, ProcessError, SnapshotProcessor};

/// Metric name under which a row's position in the source table is stored.
///
/// The ranking position is the primary signal of an OI-spurts table, so it
/// travels with the other metrics and participates in delta computation.
pub const RANK_METRIC: &str = "rank";

/// One instrument's readings at a single capture time. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentRecord {
    /// Normalized instrument identifier
    pub symbol: String,
    /// Metric name -> value, including [`RANK_METRIC`]
    pub metrics: BTreeMap<String, Decimal>,
    /// Capture timestamp of the snapshot this record belongs to
    pub captured_at: DateTime<Utc>,
}

impl InstrumentRecord {
    /// Look up a metric value by name.
    pub fn metric(&self, name: &str) -> Option<Decimal> {
        self.metrics.get(name).copied()
    }

    /// The row's position in the source table, if recorded.
    pub fn rank(&self) -> Option<Decimal> {
        self.metric(RANK_METRIC)
    }
}

/// The set of instrument records captured in one cycle, ordered by rank.
/// Symbols are unique within a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Capture timestamp shared by all records
    pub captured_at: DateTime<Utc>,
    /// Records in source-rank order
    pub records: Vec<InstrumentRecord>,
}

impl Snapshot {
    /// Look up a record by normalized symbol.
    pub fn get(&self, symbol: &str) -> Option<&InstrumentRecord> {
        self.records.iter().find(|r| r.symbol == symbol)
    }

    /// Number of records in the snapshot.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the snapshot holds no records.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Which prior observation a delta is computed against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeltaMode {
    /// Against the first snapshot of the day
    Baseline,
    /// Against the immediately preceding snapshot
    Previous,
}

impl std::str::FromStr for DeltaMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "baseline" | "base" => Ok(DeltaMode::Baseline),
            "previous" | "prev" => Ok(DeltaMode::Previous),
            other => Err(format!(
                "unknown delta mode '{}', expected 'baseline' or 'previous'",
                other
            )),
        }
    }
}

/// Signed per-metric differences for one instrument, derived on demand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentDelta {
    pub symbol: String,
    pub mode: DeltaMode,
    /// True when the instrument has no record in the reference snapshot
    pub new_today: bool,
    /// Latest known metric values
    pub current: BTreeMap<String, Decimal>,
    /// current - reference, for metrics present in both observations
    pub changes: BTreeMap<String, Decimal>,
    /// Capture time of the reference observation, when one exists
    pub reference_at: Option<DateTime<Utc>>,
    /// Capture time of the latest observation
    pub captured_at: DateTime<Utc>,
}

/// Violations of the series invariants.
#[derive(Error, Debug)]
pub enum SeriesError {
    #[error("Snapshot at {ts} is not newer than the last snapshot at {last}")]
    OutOfOrder {
        ts: DateTime<Utc>,
        last: DateTime<Utc>,
    },

    #[error("Refusing to append an empty snapshot")]
    Empty,
}

/// Append-only sequence of snapshots for one trading day.
///
/// Invariants: capture timestamps strictly increase, and appends never remove
/// or reorder prior snapshots. The first snapshot is the day's baseline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyTimeSeries {
    date: NaiveDate,
    snapshots: Vec<Snapshot>,
}

impl DailyTimeSeries {
    /// Create an empty series for the given trading day.
    pub fn new(date: NaiveDate) -> Self {
        Self {
            date,
            snapshots: Vec::new(),
        }
    }

    /// The trading day this series covers.
    pub fn date(&self) -> NaiveDate {
        self.date
    }

    /// All snapshots in capture order.
    pub fn snapshots(&self) -> &[Snapshot] {
        &self.snapshots
    }

    /// Number of snapshots collected so far.
    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    /// Whether no snapshot has been collected yet.
    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    /// The day's first snapshot, the reference for baseline deltas.
    pub fn baseline(&self) -> Option<&Snapshot> {
        self.snapshots.first()
    }

    /// The most recently appended snapshot.
    pub fn latest(&self) -> Option<&Snapshot> {
        self.snapshots.last()
    }

    /// Append a snapshot, enforcing the ordering invariants.
    pub fn append(&mut self, snapshot: Snapshot) -> Result<(), SeriesError> {
        if snapshot.is_empty() {
            return Err(SeriesError::Empty);
        }
        if let Some(last) = self.snapshots.last() {
            if snapshot.captured_at <= last.captured_at {
                return Err(SeriesError::OutOfOrder {
                    ts: snapshot.captured_at,
                    last: last.captured_at,
                });
            }
        }
        self.snapshots.push(snapshot);
        Ok(())
    }

    /// Last known record for an instrument, scanning from the newest
    /// snapshot backwards. Instruments that drop out of later snapshots keep
    /// reporting their last observed values.
    pub fn latest_record(&self, symbol: &str) -> Option<&InstrumentRecord> {
        self.snapshots.iter().rev().find_map(|s| s.get(symbol))
    }

    /// Every symbol observed today, sorted.
    pub fn instruments(&self) -> Vec<String> {
        let mut set = BTreeSet::new();
        for snapshot in &self.snapshots {
            for record in &snapshot.records {
                set.insert(record.symbol.clone());
            }
        }
        set.into_iter().collect()
    }

    /// Compute the delta for an instrument against the chosen reference.
    ///
    /// Returns `None` when the instrument was never observed today. An
    /// instrument with no record in the reference snapshot is flagged
    /// `new_today` with empty changes.
    pub fn delta(&self, symbol: &str, mode: DeltaMode) -> Option<InstrumentDelta> {
        let (idx, record) = self
            .snapshots
            .iter()
            .enumerate()
            .rev()
            .find_map(|(i, s)| s.get(symbol).map(|r| (i, r)))?;

        let reference = match mode {
            DeltaMode::Baseline => self.snapshots.first(),
            DeltaMode::Previous => {
                if idx == 0 {
                    None
                } else {
                    self.snapshots.get(idx - 1)
                }
            }
        };

        let reference_record = reference.and_then(|s| s.get(symbol));
        let reference_at = reference
            .filter(|s| s.get(symbol).is_some())
            .map(|s| s.captured_at);

        let mut changes = BTreeMap::new();
        if let Some(before) = reference_record {
            for (name, value) in &record.metrics {
                if let Some(prior) = before.metrics.get(name) {
                    changes.insert(name.clone(), *value - *prior);
                }
            }
        }

        Some(InstrumentDelta {
            symbol: record.symbol.clone(),
            mode,
            new_today: reference_record.is_none(),
            current: record.metrics.clone(),
            changes,
            reference_at,
            captured_at: record.captured_at,
        })
    }
}
