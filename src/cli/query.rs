//! Query command - inspect the collected intraday series

use anyhow::{anyhow, Context, Result};
use chrono::{Local, NaiveDate};
use clap::Args;
use rust_decimal::Decimal;

use crate::cli::load_settings;
use crate::snapshot::normalize::normalize_symbol;
use crate::snapshot::{DailyTimeSeries, DeltaMode, InstrumentDelta};
use crate::storage::DailyStore;

/// Arguments for the query command
#[derive(Args)]
pub struct QueryArgs {
    /// Instrument symbol to report on
    #[arg(long, short)]
    pub symbol: Option<String>,

    /// Delta reference: "baseline" (first snapshot of the day) or "previous"
    #[arg(long, default_value = "baseline")]
    pub mode: String,

    /// Trading day (YYYY-MM-DD), defaults to today
    #[arg(long)]
    pub date: Option<String>,

    /// List every instrument observed on the trading day
    #[arg(long)]
    pub list: bool,

    /// Override the storage root directory
    #[arg(long)]
    pub data_dir: Option<String>,
}

/// Execute the query command against the persisted series.
pub async fn execute(args: QueryArgs) -> Result<()> {
    let mut settings = load_settings();
    if let Some(data_dir) = args.data_dir {
        settings.storage.data_dir = data_dir;
    }

    let store = DailyStore::open(
        &settings.storage.data_dir,
        settings.storage.max_raw_files,
        settings.storage.keep_series_days,
    )?;

    let date = match args.date {
        Some(raw) => NaiveDate::parse_from_str(&raw, "%Y-%m-%d")
            .with_context(|| format!("invalid date '{}', expected YYYY-MM-DD", raw))?,
        None => Local::now().date_naive(),
    };

    let series = store
        .load_series(date)?
        .with_context(|| format!("no series recorded for {}", date))?;

    if args.list {
        for symbol in series.instruments() {
            println!("{}", symbol);
        }
        return Ok(());
    }

    match args.symbol {
        Some(symbol) => {
            let mode: DeltaMode = args.mode.parse().map_err(|e: String| anyhow!(e))?;
            let wanted =
                normalize_symbol(&symbol).unwrap_or_else(|| symbol.trim().to_uppercase());
            match series.delta(&wanted, mode) {
                Some(delta) => print_delta(&delta),
                None => println!("No data for {} on {}", wanted, date),
            }
        }
        None => print_summary(&series),
    }

    Ok(())
}

fn print_summary(series: &DailyTimeSeries) {
    println!("Trading day: {}", series.date());
    println!("Snapshots:   {}", series.len());
    println!("Instruments: {}", series.instruments().len());
    if let Some(latest) = series.latest() {
        println!("Latest:      {} ({} records)", latest.captured_at, latest.len());
    }
}

fn print_delta(delta: &InstrumentDelta) {
    println!("{} @ {}", delta.symbol, delta.captured_at);
    if delta.new_today {
        println!("  new today (no reference observation)");
    } else if let Some(reference_at) = delta.reference_at {
        println!("  reference: {}", reference_at);
    }
    for (name, value) in &delta.current {
        match delta.changes.get(name) {
            Some(change) => {
                let sign = if *change >= Decimal::ZERO { "+" } else { "" };
                println!("  {}: {} ({}{})", name, value, sign, change);
            }
            None => println!("  {}: {}", name, value),
        }
    }
}
