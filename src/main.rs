//! OI tracker CLI
//!
//! Provides commands for:
//! - `serve`: run the scheduled collection service
//! - `fetch`: force a single collection cycle
//! - `query`: inspect the collected intraday series

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use oi_tracker::cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive("oi_tracker=info".parse()?))
        .init();

    // Load environment variables from .env file
    dotenv::dotenv().ok();

    // Parse CLI arguments
    let cli = Cli::parse();

    // Execute command
    match cli.command {
        Commands::Serve(args) => {
            oi_tracker::cli::serve::execute(args).await?;
        }
        Commands::Fetch(args) => {
            oi_tracker::cli::fetch::execute(args).await?;
        }
        Commands::Query(args) => {
            oi_tracker::cli::query::execute(args).await?;
        }
    }

    Ok(())
}
