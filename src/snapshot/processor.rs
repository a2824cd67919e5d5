//! Snapshot processing pipeline
//!
//! Turns a raw download into a deduplicated [`Snapshot`] and merges it into
//! the day's series. Parsing and deduplication happen without any lock held;
//! the write lock covers only the rollover check and the append.

use std::collections::HashMap;

use chrono::{DateTime, Local, NaiveDate, Utc};
use thiserror::Error;
use tracing::{debug, info};

use super::parser::{parse_table, ParsedRow, TableParseError};
use super::{DailyTimeSeries, InstrumentRecord, SeriesError, Snapshot};
use crate::fetcher::RawSnapshotFile;
use crate::query::SeriesHandle;

/// Processing failures surfaced to the cycle scheduler.
#[derive(Error, Debug)]
pub enum ProcessError {
    /// Structural schema mismatch; retrying the same file will not help
    #[error("Parse failure: {0}")]
    Parse(#[from] TableParseError),

    /// The table parsed but no usable rows survived filtering
    #[error("No usable rows in snapshot ({dropped} dropped)")]
    NoData { dropped: usize },

    #[error(transparent)]
    Series(#[from] SeriesError),
}

/// What one successful cycle produced, for logging and statistics.
#[derive(Debug, Clone)]
pub struct CycleOutcome {
    pub captured_at: DateTime<Utc>,
    pub trading_day: NaiveDate,
    /// Records in the appended snapshot
    pub records: usize,
    /// Source rows dropped for unusable symbols
    pub dropped: usize,
    /// Rows collapsed by deduplication
    pub duplicates: usize,
    /// Instruments absent from the day's baseline snapshot
    pub new_today: usize,
}

/// Builds snapshots from raw files and appends them to the day's series.
#[derive(Debug, Default)]
pub struct SnapshotProcessor;

impl SnapshotProcessor {
    pub fn new() -> Self {
        Self
    }

    /// Parse, normalize and deduplicate a raw file into a snapshot.
    ///
    /// Duplicate rule: when several rows share a normalized symbol, the
    /// last-seen row wins entirely; surviving records are ordered by their
    /// source rank. Returns the snapshot plus dropped and duplicate counts.
    pub fn build_snapshot(
        &self,
        raw: &RawSnapshotFile,
    ) -> Result<(Snapshot, usize, usize), ProcessError> {
        let table = parse_table(&raw.content)?;

        let mut by_symbol: HashMap<String, ParsedRow> = HashMap::new();
        let mut duplicates = 0usize;
        for row in table.rows {
            if by_symbol.insert(row.symbol.clone(), row).is_some() {
                duplicates += 1;
            }
        }

        if by_symbol.is_empty() {
            return Err(ProcessError::NoData {
                dropped: table.dropped,
            });
        }

        let mut rows: Vec<ParsedRow> = by_symbol.into_values().collect();
        rows.sort_by_key(|row| row.rank);

        let records = rows
            .into_iter()
            .map(|row| InstrumentRecord {
                symbol: row.symbol,
                metrics: row.metrics,
                captured_at: raw.captured_at,
            })
            .collect();

        Ok((
            Snapshot {
                captured_at: raw.captured_at,
                records,
            },
            table.dropped,
            duplicates,
        ))
    }

    /// Process a raw file into the shared series.
    ///
    /// On date rollover the live series is replaced with a fresh one for the
    /// capture's trading day before the append; the old day's series stays on
    /// disk untouched. Any failure leaves the series exactly as it was.
    pub fn process(
        &self,
        raw: &RawSnapshotFile,
        handle: &SeriesHandle,
    ) -> Result<CycleOutcome, ProcessError> {
        let (snapshot, dropped, duplicates) = self.build_snapshot(raw)?;
        let captured_at = snapshot.captured_at;
        let record_count = snapshot.len();
        let trading_day = captured_at.with_timezone(&Local).date_naive();

        let mut series = handle.write();
        if series.date() != trading_day {
            info!(
                "Trading day rolled over from {} to {}, starting a fresh series",
                series.date(),
                trading_day
            );
            *series = DailyTimeSeries::new(trading_day);
        }

        let new_today = match series.baseline() {
            Some(baseline) => snapshot
                .records
                .iter()
                .filter(|r| baseline.get(&r.symbol).is_none())
                .count(),
            None => 0,
        };

        series.append(snapshot)?;
        debug!(
            "Appended snapshot {} ({} records, series now {} deep)",
            captured_at,
            record_count,
            series.len()
        );

        Ok(CycleOutcome {
            captured_at,
            trading_day,
            records: record_count,
            dropped,
            duplicates,
            new_today,
        })
    }
}
