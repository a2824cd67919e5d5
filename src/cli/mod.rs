//! Command-line interface

use anyhow::Result;
use chrono::Local;
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use crate::config::Settings;
use crate::fetcher::{HttpTransport, SnapshotFetcher};
use crate::query::SeriesHandle;
use crate::scheduler::{CycleScheduler, TradingWindow};
use crate::snapshot::{DailyTimeSeries, SnapshotProcessor};
use crate::storage::DailyStore;

pub mod fetch;
pub mod query;
pub mod serve;

/// Top-level CLI definition
#[derive(Parser)]
#[command(name = "oi-tracker", about = "Intraday open-interest spurts tracker", version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand)]
pub enum Commands {
    /// Run the scheduled collection service
    Serve(serve::ServeArgs),
    /// Run a single fetch+process cycle immediately
    Fetch(fetch::FetchArgs),
    /// Inspect the collected intraday series
    Query(query::QueryArgs),
}

/// Load settings, falling back to defaults when no configuration exists.
pub(crate) fn load_settings() -> Settings {
    Settings::load().unwrap_or_else(|err| {
        warn!("Failed to load configuration ({}), using defaults", err);
        Settings::default_settings()
    })
}

/// Wire up the full pipeline from settings, resuming today's persisted
/// series when one exists so a restart keeps the same baseline.
pub(crate) fn build_scheduler(
    settings: &Settings,
) -> Result<CycleScheduler<HttpTransport>> {
    let store = DailyStore::open(
        &settings.storage.data_dir,
        settings.storage.max_raw_files,
        settings.storage.keep_series_days,
    )?;

    let today = Local::now().date_naive();
    let series = match store.load_series(today)? {
        Some(series) => {
            info!(
                "Resuming today's series with {} snapshot(s)",
                series.len()
            );
            series
        }
        None => DailyTimeSeries::new(today),
    };

    let fetcher = SnapshotFetcher::from_settings(&settings.source)?;
    let window = TradingWindow::parse(
        &settings.schedule.window_start,
        &settings.schedule.window_end,
    )?;

    Ok(CycleScheduler::new(
        fetcher,
        SnapshotProcessor::new(),
        SeriesHandle::new(series),
        store,
        window,
        settings.schedule.interval(),
    ))
}
