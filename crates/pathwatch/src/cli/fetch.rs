use anyhow::{Result, bail};
use atlas_pathwatch::{
    fetch::{
        AtlasClient,
        metadata::{self, DEFAULT_METADATA_FILE, MetadataIndex},
        results::{FetchOptions, fetch_interval, parse_interval_timestamp},
    },
    settings::Settings,
};
use clap::Subcommand;
use std::path::PathBuf;
use tracing::info;

/// Measurement download commands
#[derive(Subcommand, Debug)]
pub enum FetchCommands {
    #[command(
        about = "Refresh the local measurement metadata index",
        after_help = "Only measurements newer than the highest known id are requested. Use
--overlap to re-request the most recent known measurements and pick up
status changes (e.g., a measurement that has stopped since the last run)."
    )]
    UpdateMetadata {
        /// Metadata index file
        #[arg(short, long, value_name = "FILE", default_value = DEFAULT_METADATA_FILE)]
        file: PathBuf,

        /// Re-fetch the last N known measurements
        #[arg(short, long, value_name = "N")]
        overlap: Option<usize>,
    },
    #[command(
        about = "Download traceroute results for a time interval",
        after_help = r#"Interval boundaries are UTC timestamps in the form 2024-01-31T00:00:00.
Results are stored as one gzipped shard per measurement under
<OUTPUT_DIR>/<af>/<msm_id>.jsonl.gz. Measurements without results in the
interval are recorded in an empty-results log so an interrupted run can be
resumed without re-requesting them."#
    )]
    FetchResults {
        /// Interval start (inclusive, UTC)
        interval_start: String,

        /// Interval end (exclusive, UTC)
        interval_end: String,

        /// Directory for downloaded shards
        output_dir: PathBuf,

        /// Restrict to one address family (4 or 6)
        #[arg(short, long, value_name = "AF")]
        address_family: Option<u8>,

        /// Metadata index file
        #[arg(short, long, value_name = "FILE", default_value = DEFAULT_METADATA_FILE)]
        metadata: PathBuf,

        /// Number of parallel downloads (default from settings)
        #[arg(short = 'n', long, value_name = "N")]
        parallel_downloads: Option<usize>,

        /// Re-download shards that already exist
        #[arg(short, long)]
        force: bool,
    },
}

pub async fn handle(settings: &Settings, cmd: FetchCommands) -> Result<()> {
    match cmd {
        FetchCommands::UpdateMetadata { file, overlap } => {
            let client = AtlasClient::new(&settings.api)?;
            let mut index = MetadataIndex::load(&file)?;
            let merged = metadata::update(&client, &mut index, overlap).await?;
            info!("Merged {merged} entries.");
            index.store(&file)
        }
        FetchCommands::FetchResults {
            interval_start,
            interval_end,
            output_dir,
            address_family,
            metadata,
            parallel_downloads,
            force,
        } => {
            if let Some(af) = address_family {
                if af != 4 && af != 6 {
                    bail!("Invalid address family: {af} (expected 4 or 6)");
                }
            }
            let interval_start = parse_interval_timestamp(&interval_start)?;
            let interval_end = parse_interval_timestamp(&interval_end)?;
            if interval_start >= interval_end {
                bail!("Interval start must be before interval end.");
            }

            let index = MetadataIndex::load(&metadata)?;
            if index.metadata.is_empty() {
                bail!("Metadata index is empty. Run update-metadata first.");
            }
            let client = AtlasClient::new(&settings.api)?;
            let opts = FetchOptions {
                interval_start,
                interval_end,
                af: address_family,
                output_dir,
                parallel_downloads: parallel_downloads
                    .unwrap_or(settings.api.parallel_downloads),
                force,
            };
            fetch_interval(&client, &index, &opts).await?;
            Ok(())
        }
    }
}
