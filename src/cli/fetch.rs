//! Fetch command - force a single collection cycle

use anyhow::Result;
use clap::Args;
use tracing::info;

use crate::cli::{build_scheduler, load_settings};

/// Arguments for the fetch command
#[derive(Args)]
pub struct FetchArgs {
    /// Override the storage root directory
    #[arg(long)]
    pub data_dir: Option<String>,
}

/// Execute the fetch command: one cycle, trading window ignored.
pub async fn execute(args: FetchArgs) -> Result<()> {
    let mut settings = load_settings();
    if let Some(data_dir) = args.data_dir {
        settings.storage.data_dir = data_dir;
    }

    let scheduler = build_scheduler(&settings)?;
    let outcome = scheduler.run_once().await?;

    info!(
        "Cycle complete at {}: {} record(s), {} dropped, {} duplicate(s), {} new today",
        outcome.captured_at,
        outcome.records,
        outcome.dropped,
        outcome.duplicates,
        outcome.new_today
    );
    info!(
        "Series for {} now holds {} snapshot(s)",
        outcome.trading_day,
        scheduler.series().snapshot_count()
    );

    Ok(())
}
