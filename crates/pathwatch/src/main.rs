mod cli;

use anyhow::Result;
use atlas_pathwatch::settings::Settings;
use clap::{Parser, Subcommand};
use cli::{classify::ClassifyCommands, fetch::FetchCommands, stats::StatsCommands};
use std::path::PathBuf;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(
    name = "atlas-pathwatch",
    about = "Candidate classification and statistics for RIPE Atlas traceroutes",
    version,
    author,
    after_help = r#"Configuration:
    Configuration can be provided via:
    1. Environment variables with PW__ prefix (e.g., PW__CLASSIFY__MIN_TRACEROUTES)
    2. .env file in the current directory
    3. Config file with -c option

Examples:
    # Refresh the measurement metadata index
    atlas-pathwatch update-metadata

    # Download an hour of traceroute results
    atlas-pathwatch fetch-results 2024-01-31T00:00:00 2024-01-31T01:00:00 shards/

    # Classify candidate pairs against a monitored prefix
    atlas-pathwatch extract shards/4 candidates/ 203.0.113.0/24

    # Aggregate per-shard artifacts into the global candidate table
    atlas-pathwatch aggregate candidates/ candidates.csv

    # Keep only traceroutes of accepted pairs
    atlas-pathwatch filter shards/4 candidates.csv filtered/

    # Bin outcomes and RTTs over time
    atlas-pathwatch bin filtered/ bins.csv 203.0.113.0/24"#
)]
pub struct Cli {
    /// Path to the configuration file (TOML format)
    ///
    /// If not provided, will attempt to load from environment variables
    #[clap(short = 'c', long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    #[command(flatten)]
    Fetch(FetchCommands),
    #[command(flatten)]
    Classify(ClassifyCommands),
    #[command(flatten)]
    Stats(StatsCommands),
    /// Check that a shard file decompresses and parses end to end
    Verify(cli::verify::VerifyArgs),
}

impl Cli {
    pub async fn run(self) -> Result<()> {
        let settings = if let Some(config_path) = &self.config {
            Settings::from_path(config_path)?
        } else {
            Settings::from_env()?
        };
        init_logging(&settings.log_level)?;
        cli::init_worker_pool(&settings)?;

        // Route to module handlers
        match self.command {
            Commands::Fetch(cmd) => cli::fetch::handle(&settings, cmd).await,
            Commands::Classify(cmd) => cli::classify::handle(&settings, cmd),
            Commands::Stats(cmd) => cli::stats::handle(&settings, cmd),
            Commands::Verify(args) => cli::verify::handle(args),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    cli.run().await
}

fn init_logging(log_level: &str) -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level)))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_thread_ids(false)
                .with_thread_names(false),
        )
        .init();

    Ok(())
}
