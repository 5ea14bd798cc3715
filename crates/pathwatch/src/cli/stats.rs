use crate::cli::build_monitored_prefixes;
use anyhow::{Context, Result};
use atlas_pathwatch::{
    artifacts,
    artifacts::shard::{ShardReader, collect_shard_files},
    bins::BinTable,
    classify::scan_shard,
    settings::Settings,
};
use clap::Subcommand;
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use tracing::{error, info};

/// Statistics commands
#[derive(Subcommand, Debug)]
pub enum StatsCommands {
    #[command(
        about = "Bin traceroute outcomes and RTTs into fixed time intervals",
        after_help = r#"Each traceroute falls into exactly one of four categories depending on
whether it reached its target and whether a monitored prefix was on the
path. Per bin, the output lists counts for all four plus RTT statistics for
the two target-reaching categories. Bins without any traceroutes are kept
as explicit zero rows so the series has no gaps."#
    )]
    Bin {
        /// Measurement shard file or directory of shards
        input: PathBuf,

        /// Output CSV file
        output_file: PathBuf,

        /// Monitored-prefix filter: prefix, ASN, or file with one entry per line
        filter: String,

        /// JSON file mapping AS numbers to announced prefixes
        #[arg(long, value_name = "FILE")]
        asn_map: Option<PathBuf>,

        /// Width of time bins in seconds (default from settings)
        #[arg(short, long, value_name = "SECONDS")]
        bin_size: Option<i64>,
    },
}

pub fn handle(settings: &Settings, cmd: StatsCommands) -> Result<()> {
    match cmd {
        StatsCommands::Bin {
            input,
            output_file,
            filter,
            asn_map,
            bin_size,
        } => bin(
            &input,
            &output_file,
            &filter,
            asn_map.as_deref(),
            bin_size.unwrap_or(settings.classify.bin_size_secs),
        ),
    }
}

fn bin(
    input: &Path,
    output_file: &Path,
    filter: &str,
    asn_map: Option<&Path>,
    bin_size: i64,
) -> Result<()> {
    anyhow::ensure!(bin_size > 0, "Bin size must be positive.");
    let prefixes = build_monitored_prefixes(filter, asn_map)?;
    let shards = collect_shard_files(input)?;
    info!("Binning {} shards with {bin_size}s bins.", shards.len());

    // A broken shard is logged and contributes nothing; the remaining shards
    // still produce a series.
    let outcomes: Vec<_> = shards
        .par_iter()
        .map(|shard| {
            let statuses = ShardReader::open(shard)
                .map_err(anyhow::Error::from)
                .and_then(|reader| scan_shard(reader, &prefixes).map_err(anyhow::Error::from));
            match statuses {
                Ok(statuses) => statuses,
                Err(e) => {
                    error!("{e:#}");
                    Vec::new()
                }
            }
        })
        .collect();

    let mut table = BinTable::new(bin_size);
    for shard_outcomes in outcomes {
        table.extend(shard_outcomes);
    }
    match table.finalize() {
        Some(records) => {
            let count = records.len();
            artifacts::write_bins(output_file, &records)
                .with_context(|| format!("Failed to write bins to {}", output_file.display()))?;
            info!("Wrote {count} bins to {}", output_file.display());
        }
        None => info!("No traceroutes to bin, writing nothing."),
    }
    Ok(())
}
