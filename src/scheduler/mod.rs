//! Cycle scheduling
//!
//! A single background task owns the trading window and the fixed-interval
//! clock, runs fetch+process cycles, and is the sole writer of the shared
//! series. A failure in one cycle is logged and absorbed; the next cycle
//! fires at its scheduled time. Only persistence failures stop the service.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Local, LocalResult, NaiveDate, NaiveTime, TimeZone, Utc};
use parking_lot::RwLock;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::fetcher::{FetchError, SnapshotFetcher, SnapshotTransport};
use crate::query::SeriesHandle;
use crate::snapshot::{CycleOutcome, ProcessError, SnapshotProcessor};
use crate::storage::{DailyStore, StorageError};

/// Time-of-day range during which cycles are permitted to run.
///
/// The start is inclusive, the end exclusive: a 10:00-14:30 window fires at
/// 10:00:00 and no longer fires at 14:30:00.
#[derive(Debug, Clone, Copy)]
pub struct TradingWindow {
    start: NaiveTime,
    end: NaiveTime,
}

impl TradingWindow {
    pub fn new(start: NaiveTime, end: NaiveTime) -> Self {
        Self { start, end }
    }

    /// Parse "HH:MM" or "HH:MM:SS" bounds.
    pub fn parse(start: &str, end: &str) -> Result<Self, chrono::ParseError> {
        Ok(Self::new(parse_time(start)?, parse_time(end)?))
    }

    pub fn start(&self) -> NaiveTime {
        self.start
    }

    pub fn end(&self) -> NaiveTime {
        self.end
    }

    /// Whether the given time of day falls inside the window.
    pub fn contains(&self, time: NaiveTime) -> bool {
        time >= self.start && time < self.end
    }

    /// The next moment the window opens, strictly after `now` when `now` is
    /// already past today's opening.
    pub fn next_open(&self, now: DateTime<Local>) -> DateTime<Local> {
        if now.time() < self.start {
            local_datetime(now.date_naive(), self.start)
        } else {
            local_datetime(now.date_naive() + chrono::Duration::days(1), self.start)
        }
    }
}

fn parse_time(value: &str) -> Result<NaiveTime, chrono::ParseError> {
    NaiveTime::parse_from_str(value, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(value, "%H:%M:%S"))
}

fn local_datetime(date: NaiveDate, time: NaiveTime) -> DateTime<Local> {
    match date.and_time(time).and_local_timezone(Local) {
        LocalResult::Single(dt) => dt,
        LocalResult::Ambiguous(earliest, _) => earliest,
        // Skipped by a DST transition; fall back to the same wall-clock in UTC
        LocalResult::None => Local.from_utc_datetime(&date.and_time(time)),
    }
}

/// Observable scheduler lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Waiting,
    Active,
    Stopped,
}

impl SchedulerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SchedulerState::Idle => "idle",
            SchedulerState::Waiting => "waiting",
            SchedulerState::Active => "active",
            SchedulerState::Stopped => "stopped",
        }
    }
}

/// Running totals across cycles.
#[derive(Debug, Clone, Default)]
pub struct CycleStats {
    pub cycles_run: u64,
    pub successful: u64,
    pub failed: u64,
    pub records_processed: u64,
    pub last_cycle_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

/// Anything that can fail inside one cycle.
#[derive(Error, Debug)]
pub enum CycleError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Process(#[from] ProcessError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Drives fetch+process cycles inside the trading window.
pub struct CycleScheduler<T> {
    fetcher: SnapshotFetcher<T>,
    processor: SnapshotProcessor,
    handle: SeriesHandle,
    store: DailyStore,
    window: TradingWindow,
    interval: Duration,
    state: Arc<RwLock<SchedulerState>>,
    stats: Arc<RwLock<CycleStats>>,
}

/// Control handle for a started scheduler.
pub struct SchedulerHandle {
    shutdown_tx: broadcast::Sender<()>,
    join: Option<JoinHandle<Result<(), StorageError>>>,
    state: Arc<RwLock<SchedulerState>>,
    stats: Arc<RwLock<CycleStats>>,
}

impl SchedulerHandle {
    /// Request a cooperative shutdown.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SchedulerState {
        *self.state.read()
    }

    /// Snapshot of the running totals.
    pub fn stats(&self) -> CycleStats {
        self.stats.read().clone()
    }

    /// Wait for the background task to finish.
    pub async fn join(&mut self) -> anyhow::Result<()> {
        if let Some(join) = self.join.take() {
            join.await??;
        }
        Ok(())
    }
}

impl<T: SnapshotTransport + 'static> CycleScheduler<T> {
    pub fn new(
        fetcher: SnapshotFetcher<T>,
        processor: SnapshotProcessor,
        handle: SeriesHandle,
        store: DailyStore,
        window: TradingWindow,
        interval: Duration,
    ) -> Self {
        Self {
            fetcher,
            processor,
            handle,
            store,
            window,
            interval,
            state: Arc::new(RwLock::new(SchedulerState::Idle)),
            stats: Arc::new(RwLock::new(CycleStats::default())),
        }
    }

    /// Shared handle to the series this scheduler writes.
    pub fn series(&self) -> SeriesHandle {
        self.handle.clone()
    }

    /// Spawn the scheduling loop on a background task.
    pub fn start(self) -> SchedulerHandle {
        let (shutdown_tx, shutdown_rx) = broadcast::channel(4);
        let state = self.state.clone();
        let stats = self.stats.clone();
        let join = tokio::spawn(self.run_loop(shutdown_rx));
        SchedulerHandle {
            shutdown_tx,
            join: Some(join),
            state,
            stats,
        }
    }

    /// Run a single cycle immediately, ignoring the trading window.
    pub async fn run_once(&self) -> Result<CycleOutcome, CycleError> {
        // Keep the sender alive so the receiver stays open for the cycle
        let (_shutdown_tx, mut shutdown_rx) = broadcast::channel(1);
        match self.run_cycle(&mut shutdown_rx).await? {
            Some(outcome) => Ok(outcome),
            None => unreachable!("no shutdown can be signalled in run_once"),
        }
    }

    async fn run_loop(
        self,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> Result<(), StorageError> {
        info!(
            "Scheduler started: window {}-{}, interval {:?}",
            self.window.start(),
            self.window.end(),
            self.interval
        );

        loop {
            let now = Local::now();
            if !self.window.contains(now.time()) {
                self.set_state(SchedulerState::Waiting);
                let open = self.window.next_open(now);
                let wait = (open - now).to_std().unwrap_or(Duration::from_secs(1));
                info!(
                    "Outside trading window, waiting {}s until {}",
                    wait.as_secs(),
                    open
                );
                tokio::select! {
                    _ = sleep(wait) => continue,
                    _ = shutdown_rx.recv() => {
                        info!("Shutdown requested while waiting for window open");
                        self.set_state(SchedulerState::Stopped);
                        return Ok(());
                    }
                }
            }

            self.set_state(SchedulerState::Active);
            let cycle_started = Instant::now();

            match self.run_cycle(&mut shutdown_rx).await {
                Ok(Some(outcome)) => {
                    let mut stats = self.stats.write();
                    stats.cycles_run += 1;
                    stats.successful += 1;
                    stats.records_processed += outcome.records as u64;
                    stats.last_cycle_at = Some(outcome.captured_at);
                    stats.last_error = None;
                    drop(stats);
                    info!(
                        "Cycle complete: {} record(s), {} dropped, {} duplicate(s), {} new today",
                        outcome.records, outcome.dropped, outcome.duplicates, outcome.new_today
                    );
                }
                Ok(None) => {
                    info!("Shutdown requested during cycle");
                    self.set_state(SchedulerState::Stopped);
                    return Ok(());
                }
                Err(CycleError::Storage(err)) => {
                    error!("Persistence failure, stopping service: {}", err);
                    self.set_state(SchedulerState::Stopped);
                    return Err(err);
                }
                Err(err) => {
                    let mut stats = self.stats.write();
                    stats.cycles_run += 1;
                    stats.failed += 1;
                    stats.last_error = Some(err.to_string());
                    drop(stats);
                    warn!(
                        "Cycle failed at {}: {}; next cycle at its scheduled time",
                        Utc::now(),
                        err
                    );
                }
            }

            let elapsed = cycle_started.elapsed();
            if elapsed < self.interval {
                let wait = self.interval - elapsed;
                tokio::select! {
                    _ = sleep(wait) => {}
                    _ = shutdown_rx.recv() => {
                        info!("Shutdown requested between cycles");
                        self.set_state(SchedulerState::Stopped);
                        return Ok(());
                    }
                }
            } else {
                // Overran the slot: run the next cycle immediately rather
                // than double-firing to catch up
                debug!("Cycle overran the interval by {:?}", elapsed - self.interval);
            }
        }
    }

    /// One fetch+process+persist pass. Returns `None` when shutdown was
    /// requested mid-cycle; nothing has been appended in that case.
    async fn run_cycle(
        &self,
        shutdown_rx: &mut broadcast::Receiver<()>,
    ) -> Result<Option<CycleOutcome>, CycleError> {
        let raw = tokio::select! {
            result = self.fetcher.fetch() => result?,
            _ = shutdown_rx.recv() => return Ok(None),
        };

        // Keep the raw download for audit/replay before attempting to parse it
        let raw_path = self.store.save_raw(&raw)?;
        debug!("Saved raw snapshot to {}", raw_path.display());

        // Shutdown checkpoint between fetch and process
        if shutdown_rx.try_recv().is_ok() {
            return Ok(None);
        }

        let outcome = self.processor.process(&raw, &self.handle)?;

        let series = self.handle.snapshot_view();
        self.store.save_series(&series)?;

        if let Err(err) = self.store.prune_series(outcome.trading_day) {
            warn!("Failed to prune old series files: {}", err);
        }

        Ok(Some(outcome))
    }

    fn set_state(&self, state: SchedulerState) {
        *self.state.write() = state;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetcher::mock::MockTransport;
    use crate::fetcher::RetryPolicy;
    use crate::snapshot::DailyTimeSeries;
    use tempfile::TempDir;

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 2,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            jitter: 0.0,
        }
    }

    fn open_window() -> TradingWindow {
        TradingWindow::new(
            NaiveTime::MIN,
            NaiveTime::from_hms_opt(23, 59, 59).unwrap(),
        )
    }

    fn closed_window() -> TradingWindow {
        // A one-minute window far from the current time of day
        let start = if Local::now().time() < NaiveTime::from_hms_opt(12, 0, 0).unwrap() {
            NaiveTime::from_hms_opt(22, 0, 0).unwrap()
        } else {
            NaiveTime::from_hms_opt(2, 0, 0).unwrap()
        };
        TradingWindow::new(start, start + chrono::Duration::minutes(1))
    }

    fn build(
        transport: MockTransport,
        window: TradingWindow,
        interval: Duration,
    ) -> (CycleScheduler<MockTransport>, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = DailyStore::open(dir.path(), 10, 7).unwrap();
        let fetcher = SnapshotFetcher::new(transport, fast_policy(), 10);
        let handle = SeriesHandle::new(DailyTimeSeries::new(Local::now().date_naive()));
        let scheduler = CycleScheduler::new(
            fetcher,
            SnapshotProcessor::new(),
            handle,
            store,
            window,
            interval,
        );
        (scheduler, dir)
    }

    #[test]
    fn test_window_boundaries() {
        let window = TradingWindow::parse("10:00", "14:30").unwrap();

        assert!(!window.contains(NaiveTime::from_hms_opt(9, 59, 59).unwrap()));
        // Start inclusive
        assert!(window.contains(NaiveTime::from_hms_opt(10, 0, 0).unwrap()));
        assert!(window.contains(NaiveTime::from_hms_opt(12, 15, 0).unwrap()));
        assert!(window.contains(NaiveTime::from_hms_opt(14, 29, 59).unwrap()));
        // End exclusive
        assert!(!window.contains(NaiveTime::from_hms_opt(14, 30, 0).unwrap()));
        assert!(!window.contains(NaiveTime::from_hms_opt(15, 0, 0).unwrap()));
    }

    #[test]
    fn test_window_parse_formats() {
        assert!(TradingWindow::parse("10:00", "14:30").is_ok());
        assert!(TradingWindow::parse("10:00:30", "14:30:00").is_ok());
        assert!(TradingWindow::parse("ten", "14:30").is_err());
    }

    #[test]
    fn test_next_open_same_day_and_next_day() {
        let window = TradingWindow::parse("10:00", "14:30").unwrap();
        let date = NaiveDate::from_ymd_opt(2026, 8, 7).unwrap();

        let before = local_datetime(date, NaiveTime::from_hms_opt(8, 0, 0).unwrap());
        let open = window.next_open(before);
        assert_eq!(open.date_naive(), date);
        assert_eq!(open.time(), window.start());

        let after = local_datetime(date, NaiveTime::from_hms_opt(15, 0, 0).unwrap());
        let open = window.next_open(after);
        assert_eq!(open.date_naive(), date + chrono::Duration::days(1));
        assert_eq!(open.time(), window.start());

        // Mid-window: the next open is tomorrow, never a re-fire today
        let inside = local_datetime(date, NaiveTime::from_hms_opt(11, 0, 0).unwrap());
        assert_eq!(window.next_open(inside).date_naive(), date + chrono::Duration::days(1));
    }

    #[tokio::test]
    async fn test_no_fetch_outside_window() {
        let transport = MockTransport::new();
        let observer = transport.clone();
        let (scheduler, _dir) = build(transport, closed_window(), Duration::from_millis(20));

        let mut handle = scheduler.start();
        sleep(Duration::from_millis(60)).await;

        assert_eq!(handle.state(), SchedulerState::Waiting);
        assert_eq!(observer.downloads(), 0);

        handle.shutdown();
        handle.join().await.unwrap();
        assert_eq!(handle.state(), SchedulerState::Stopped);
    }

    #[tokio::test]
    async fn test_cycle_failure_does_not_stop_scheduler() {
        // First download parses to nothing useful, later ones are fine
        let transport =
            MockTransport::with_responses(vec![Ok(b"A,B,C\n1,2,3\n".to_vec())]);
        let observer = transport.clone();
        let (scheduler, _dir) = build(transport, open_window(), Duration::from_millis(30));
        let series = scheduler.series();

        let mut handle = scheduler.start();
        sleep(Duration::from_millis(100)).await;
        handle.shutdown();
        handle.join().await.unwrap();

        let stats = handle.stats();
        assert_eq!(stats.failed, 1);
        assert!(stats.successful >= 1);
        assert!(observer.downloads() >= 2);
        assert!(series.snapshot_count() >= 1);
    }

    #[tokio::test]
    async fn test_shutdown_between_cycles_is_prompt() {
        let transport = MockTransport::new();
        let (scheduler, _dir) = build(transport, open_window(), Duration::from_secs(3600));
        let series = scheduler.series();

        let mut handle = scheduler.start();
        // Let the first cycle finish, then interrupt the hour-long sleep
        sleep(Duration::from_millis(80)).await;
        handle.shutdown();
        handle.join().await.unwrap();

        assert_eq!(handle.state(), SchedulerState::Stopped);
        assert_eq!(series.snapshot_count(), 1);
        assert_eq!(handle.stats().successful, 1);
    }

    #[tokio::test]
    async fn test_run_once_ignores_window() {
        let transport = MockTransport::new();
        let (scheduler, _dir) = build(transport, closed_window(), Duration::from_secs(3600));
        let series = scheduler.series();

        let outcome = scheduler.run_once().await.unwrap();
        assert_eq!(outcome.records, 3);
        assert_eq!(series.snapshot_count(), 1);
    }

    #[tokio::test]
    async fn test_run_once_surfaces_cycle_errors() {
        let transport =
            MockTransport::with_responses(vec![Ok(b"A,B,C\n1,2,3\n".to_vec())]);
        let (scheduler, _dir) = build(transport, open_window(), Duration::from_secs(3600));
        let series = scheduler.series();

        let err = scheduler.run_once().await.unwrap_err();
        assert!(matches!(err, CycleError::Process(_)));
        assert_eq!(series.snapshot_count(), 0);
    }
}
