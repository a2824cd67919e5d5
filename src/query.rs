//! Read-only query interface over the live series
//!
//! The scheduler's background task is the sole writer; everything else sees
//! the series through this handle. Readers take short read locks and clone
//! out what they need, so they never observe a partially appended series and
//! never block the writer across network or parse work.

use std::sync::Arc;

use chrono::NaiveDate;
use parking_lot::{RwLock, RwLockWriteGuard};

use crate::snapshot::normalize::normalize_symbol;
use crate::snapshot::{DailyTimeSeries, DeltaMode, InstrumentDelta, InstrumentRecord, Snapshot};

/// Shared handle to the day's time series.
///
/// Cheap to clone; all clones view the same underlying series.
#[derive(Clone)]
pub struct SeriesHandle {
    inner: Arc<RwLock<DailyTimeSeries>>,
}

impl SeriesHandle {
    /// Wrap an existing series.
    pub fn new(series: DailyTimeSeries) -> Self {
        Self {
            inner: Arc::new(RwLock::new(series)),
        }
    }

    /// Exclusive access for the single writer (append and rollover only).
    pub(crate) fn write(&self) -> RwLockWriteGuard<'_, DailyTimeSeries> {
        self.inner.write()
    }

    /// Consistent copy of the whole series.
    pub fn snapshot_view(&self) -> DailyTimeSeries {
        self.inner.read().clone()
    }

    /// Trading day the live series covers.
    pub fn date(&self) -> NaiveDate {
        self.inner.read().date()
    }

    /// Number of snapshots collected so far today.
    pub fn snapshot_count(&self) -> usize {
        self.inner.read().len()
    }

    /// The most recent snapshot, if any.
    pub fn latest_snapshot(&self) -> Option<Snapshot> {
        self.inner.read().latest().cloned()
    }

    /// Last known record for an instrument.
    pub fn latest_record(&self, symbol: &str) -> Option<InstrumentRecord> {
        self.inner.read().latest_record(symbol).cloned()
    }

    /// Delta for an instrument against the chosen reference.
    pub fn delta(&self, symbol: &str, mode: DeltaMode) -> Option<InstrumentDelta> {
        self.inner.read().delta(symbol, mode)
    }

    /// Every symbol observed today, sorted.
    pub fn instruments(&self) -> Vec<String> {
        self.inner.read().instruments()
    }

    /// Find an instrument by user-supplied name: exact match first, then
    /// prefix, then substring.
    pub fn search(&self, query: &str) -> Option<InstrumentRecord> {
        let wanted = normalize_symbol(query).unwrap_or_else(|| query.trim().to_uppercase());
        let series = self.inner.read();

        if let Some(record) = series.latest_record(&wanted) {
            return Some(record.clone());
        }

        let symbols = series.instruments();
        let found = symbols
            .iter()
            .find(|s| s.starts_with(&wanted))
            .or_else(|| symbols.iter().find(|s| s.contains(&wanted)))?;
        series.latest_record(found).cloned()
    }

    /// Symbol completions for a partial query, sorted, capped at `limit`.
    pub fn suggestions(&self, query: &str, limit: usize) -> Vec<String> {
        let wanted = normalize_symbol(query).unwrap_or_else(|| query.trim().to_uppercase());
        self.inner
            .read()
            .instruments()
            .into_iter()
            .filter(|s| s.contains(&wanted))
            .take(limit)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;
    use std::collections::BTreeMap;

    fn handle_with_symbols(symbols: &[&str]) -> SeriesHandle {
        let captured_at = Utc.with_ymd_and_hms(2026, 8, 7, 10, 0, 0).unwrap();
        let records = symbols
            .iter()
            .map(|s| InstrumentRecord {
                symbol: s.to_string(),
                metrics: BTreeMap::from([("latest_oi".to_string(), dec!(100))]),
                captured_at,
            })
            .collect();
        let mut series = DailyTimeSeries::new(captured_at.date_naive());
        series
            .append(Snapshot {
                captured_at,
                records,
            })
            .unwrap();
        SeriesHandle::new(series)
    }

    #[test]
    fn test_search_exact_and_fuzzy() {
        let handle = handle_with_symbols(&["RELIANCE", "RELINFRA", "TCS"]);

        assert_eq!(handle.search("reliance").unwrap().symbol, "RELIANCE");
        // Prefix match
        assert_eq!(handle.search("RELIN").unwrap().symbol, "RELINFRA");
        // Substring match
        assert_eq!(handle.search("INFRA").unwrap().symbol, "RELINFRA");
        assert!(handle.search("WIPRO").is_none());
    }

    #[test]
    fn test_suggestions_capped_and_sorted() {
        let handle = handle_with_symbols(&["RELIANCE", "RELINFRA", "RELCAPITAL", "TCS"]);

        let suggestions = handle.suggestions("REL", 2);
        assert_eq!(suggestions, vec!["RELCAPITAL", "RELIANCE"]);

        let all = handle.suggestions("REL", 10);
        assert_eq!(all.len(), 3);
    }

    #[test]
    fn test_clones_share_series() {
        let handle = handle_with_symbols(&["TCS"]);
        let clone = handle.clone();
        assert_eq!(clone.snapshot_count(), 1);
        assert_eq!(clone.instruments(), handle.instruments());
        assert_eq!(clone.latest_snapshot().unwrap().len(), 1);
        assert_eq!(
            clone.latest_record("TCS").unwrap().metric("latest_oi"),
            Some(dec!(100))
        );
    }
}
