//! Serve command - run the scheduled collection service

use anyhow::Result;
use clap::Args;
use tracing::info;

use crate::cli::{build_scheduler, load_settings};

/// Arguments for the serve command
#[derive(Args)]
pub struct ServeArgs {
    /// Override the storage root directory
    #[arg(long)]
    pub data_dir: Option<String>,

    /// Override the cycle interval in minutes
    #[arg(long)]
    pub interval_minutes: Option<u64>,
}

/// Execute the serve command
pub async fn execute(args: ServeArgs) -> Result<()> {
    let mut settings = load_settings();
    if let Some(data_dir) = args.data_dir {
        settings.storage.data_dir = data_dir;
    }
    if let Some(minutes) = args.interval_minutes {
        settings.schedule.interval_minutes = minutes;
    }

    info!("Starting OI tracker service");
    info!(
        "  Window: {} - {} (local)",
        settings.schedule.window_start, settings.schedule.window_end
    );
    info!("  Interval: {} minutes", settings.schedule.interval_minutes);
    info!("  Data dir: {}", settings.storage.data_dir);
    info!("  Source: {}", settings.source.data_url);

    let scheduler = build_scheduler(&settings)?;
    let series = scheduler.series();
    let mut handle = scheduler.start();

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    handle.shutdown();
    handle.join().await?;

    let stats = handle.stats();
    info!(
        "Stopped after {} cycle(s): {} successful, {} failed, {} snapshot(s) today",
        stats.cycles_run,
        stats.successful,
        stats.failed,
        series.snapshot_count()
    );

    Ok(())
}
