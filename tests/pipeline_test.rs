//! End-to-end pipeline test: scripted transport through fetch, process,
//! persistence and the query interface, without touching the network.

use std::time::Duration;

use chrono::Local;
use rust_decimal_macros::dec;
use tempfile::TempDir;

use oi_tracker::fetcher::mock::MockTransport;
use oi_tracker::{
    CycleScheduler, DailyStore, DailyTimeSeries, DeltaMode, RetryPolicy, SeriesHandle,
    SnapshotFetcher, SnapshotProcessor, TradingWindow,
};

const FIRST_CYCLE: &str = "\
SYMBOL,LATEST OI,% CHANGE IN OI
ABC,100,1.0
RELIANCE,1000,5.5
TCS,2000,2.1
";

const SECOND_CYCLE: &str = "\
SYMBOL,LATEST OI,% CHANGE IN OI
ABC,135,2.5
RELIANCE,1100,8.1
WIPRO,500,3.3
";

fn build_scheduler(
    transport: MockTransport,
    dir: &TempDir,
) -> CycleScheduler<MockTransport> {
    let store = DailyStore::open(dir.path(), 10, 7).unwrap();
    let policy = RetryPolicy {
        max_attempts: 3,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(2),
        jitter: 0.0,
    };
    let fetcher = SnapshotFetcher::new(transport, policy, 10);
    let window = TradingWindow::parse("00:00", "23:59").unwrap();
    let handle = SeriesHandle::new(DailyTimeSeries::new(Local::now().date_naive()));
    CycleScheduler::new(
        fetcher,
        SnapshotProcessor::new(),
        handle,
        store,
        window,
        Duration::from_secs(1200),
    )
}

#[tokio::test]
async fn test_two_cycles_produce_baseline_deltas() {
    let transport = MockTransport::with_responses(vec![
        Ok(FIRST_CYCLE.as_bytes().to_vec()),
        Ok(SECOND_CYCLE.as_bytes().to_vec()),
    ]);
    let dir = TempDir::new().unwrap();
    let scheduler = build_scheduler(transport, &dir);
    let series = scheduler.series();

    let first = scheduler.run_once().await.unwrap();
    assert_eq!(first.records, 3);
    assert_eq!(first.new_today, 0);

    // Distinct capture timestamps between cycles
    tokio::time::sleep(Duration::from_millis(5)).await;

    let second = scheduler.run_once().await.unwrap();
    assert_eq!(second.records, 3);
    assert_eq!(second.new_today, 1); // WIPRO

    // Baseline 100 -> current 135 reports +35
    let delta = series.delta("ABC", DeltaMode::Baseline).unwrap();
    assert!(!delta.new_today);
    assert_eq!(delta.changes["latest_oi"], dec!(35));
    assert_eq!(delta.changes["pct_change_in_oi"], dec!(1.5));

    // Previous-snapshot mode reads the same pair here
    let previous = series.delta("ABC", DeltaMode::Previous).unwrap();
    assert_eq!(previous.changes["latest_oi"], dec!(35));

    // An instrument first seen mid-day is flagged new
    let wipro = series.delta("WIPRO", DeltaMode::Baseline).unwrap();
    assert!(wipro.new_today);

    // An instrument that dropped out keeps its last known values
    let tcs = series.latest_record("TCS").unwrap();
    assert_eq!(tcs.metric("latest_oi"), Some(dec!(2000)));
}

#[tokio::test]
async fn test_cycles_persist_series_and_raw_files() {
    let transport = MockTransport::with_responses(vec![
        Ok(FIRST_CYCLE.as_bytes().to_vec()),
        Ok(SECOND_CYCLE.as_bytes().to_vec()),
    ]);
    let dir = TempDir::new().unwrap();
    let scheduler = build_scheduler(transport, &dir);
    let series = scheduler.series();

    scheduler.run_once().await.unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;
    scheduler.run_once().await.unwrap();

    // The persisted series matches the live one
    let store = DailyStore::open(dir.path(), 10, 7).unwrap();
    let today = Local::now().date_naive();
    let persisted = store.load_series(today).unwrap().unwrap();
    assert_eq!(persisted, series.snapshot_view());
    assert_eq!(persisted.len(), 2);

    // Every cycle left its raw download behind for audit
    let raw_files: Vec<_> = std::fs::read_dir(dir.path().join("raw"))
        .unwrap()
        .filter_map(|entry| entry.ok())
        .collect();
    assert_eq!(raw_files.len(), 2);
}

#[tokio::test]
async fn test_failed_cycle_leaves_persisted_series_intact() {
    let transport = MockTransport::with_responses(vec![
        Ok(FIRST_CYCLE.as_bytes().to_vec()),
        // Parses structurally but has no symbol column
        Ok(b"A,B,C\n1,2,3\n".to_vec()),
    ]);
    let dir = TempDir::new().unwrap();
    let scheduler = build_scheduler(transport, &dir);
    let series = scheduler.series();

    scheduler.run_once().await.unwrap();
    let before = series.snapshot_view();

    tokio::time::sleep(Duration::from_millis(5)).await;
    assert!(scheduler.run_once().await.is_err());

    // Neither the live series nor the persisted file changed
    assert_eq!(series.snapshot_view(), before);
    let store = DailyStore::open(dir.path(), 10, 7).unwrap();
    let persisted = store
        .load_series(Local::now().date_naive())
        .unwrap()
        .unwrap();
    assert_eq!(persisted, before);
}

#[tokio::test]
async fn test_resumed_series_keeps_baseline() {
    let dir = TempDir::new().unwrap();

    // First run collects one snapshot and persists it
    {
        let transport =
            MockTransport::with_responses(vec![Ok(FIRST_CYCLE.as_bytes().to_vec())]);
        let scheduler = build_scheduler(transport, &dir);
        scheduler.run_once().await.unwrap();
    }

    // A fresh process reloads the persisted series and keeps the baseline
    let store = DailyStore::open(dir.path(), 10, 7).unwrap();
    let today = Local::now().date_naive();
    let restored = store.load_series(today).unwrap().unwrap();
    let handle = SeriesHandle::new(restored);

    let policy = RetryPolicy {
        max_attempts: 3,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(2),
        jitter: 0.0,
    };
    let transport = MockTransport::with_responses(vec![Ok(SECOND_CYCLE.as_bytes().to_vec())]);
    let scheduler = CycleScheduler::new(
        SnapshotFetcher::new(transport, policy, 10),
        SnapshotProcessor::new(),
        handle.clone(),
        store,
        TradingWindow::parse("00:00", "23:59").unwrap(),
        Duration::from_secs(1200),
    );

    scheduler.run_once().await.unwrap();

    assert_eq!(handle.snapshot_count(), 2);
    let delta = handle.delta("ABC", DeltaMode::Baseline).unwrap();
    assert_eq!(delta.changes["latest_oi"], dec!(35));
}
