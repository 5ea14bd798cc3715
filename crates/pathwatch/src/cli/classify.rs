use crate::cli::build_monitored_prefixes;
use anyhow::{Context, Result, bail};
use atlas_pathwatch::{
    aggregate::CandidateAggregate,
    artifacts::{
        self, CANDIDATE_FILE_SUFFIX, NON_CANDIDATE_FILE_SUFFIX,
        shard::{SHARD_FILE_SUFFIX, ShardReader, collect_shard_files, write_shard},
    },
    classify::{ShardClassification, classify_shard},
    prefix::MonitoredPrefixes,
    select::filter_shard,
    settings::Settings,
    traceroute::PairId,
};
use clap::Subcommand;
use rayon::prelude::*;
use std::{
    collections::BTreeSet,
    path::{Path, PathBuf},
};
use tracing::{error, info};

/// Candidate classification commands
#[derive(Subcommand, Debug)]
pub enum ClassifyCommands {
    #[command(
        about = "Extract candidate and non-candidate pairs from measurement shards",
        after_help = r#"Candidates are (probe, destination) pairs whose traceroutes always reach
their target and always pass through at least one of the monitored prefixes.
The filter argument can be a single IPv4/IPv6 prefix, an AS number, or a file
containing a mixture of the two, one per line. AS numbers require an
AS-to-prefixes mapping (--asn-map)."#
    )]
    Extract {
        /// Measurement shard file or directory of shards
        input: PathBuf,

        /// Directory for per-shard candidate artifacts
        output_dir: PathBuf,

        /// Monitored-prefix filter: prefix, ASN, or file with one entry per line
        filter: String,

        /// JSON file mapping AS numbers to announced prefixes
        #[arg(long, value_name = "FILE")]
        asn_map: Option<PathBuf>,

        /// Overwrite existing artifacts
        #[arg(short, long)]
        force: bool,
    },
    #[command(
        about = "Aggregate per-shard candidate artifacts into the global candidate table",
        after_help = r#"A pair that is a candidate in one shard but a non-candidate in another is
excluded entirely for the most conservative selection. Only pairs with at
least the minimum number of traceroutes are kept."#
    )]
    Aggregate {
        /// Directory containing per-shard candidate artifacts
        candidates_dir: PathBuf,

        /// Output file for the aggregated candidate table
        output_file: PathBuf,

        /// Minimum number of traceroutes per accepted pair (default from settings)
        #[arg(long, value_name = "N")]
        min_traceroutes: Option<u64>,
    },
    #[command(
        about = "Filter measurement shards down to traceroutes of accepted candidate pairs",
        after_help = "Filtered shards keep their file name, so the output directory must differ
from the input location. Empty output files are never created."
    )]
    Filter {
        /// Measurement shard file or directory of shards
        input: PathBuf,

        /// Aggregated candidate table file
        candidate_file: PathBuf,

        /// Directory for filtered shards
        output_dir: PathBuf,

        /// Overwrite existing files
        #[arg(short, long)]
        force: bool,
    },
}

pub fn handle(settings: &Settings, cmd: ClassifyCommands) -> Result<()> {
    match cmd {
        ClassifyCommands::Extract {
            input,
            output_dir,
            filter,
            asn_map,
            force,
        } => extract(&input, &output_dir, &filter, asn_map.as_deref(), force),
        ClassifyCommands::Aggregate {
            candidates_dir,
            output_file,
            min_traceroutes,
        } => aggregate(
            &candidates_dir,
            &output_file,
            min_traceroutes.unwrap_or(settings.classify.min_traceroutes),
        ),
        ClassifyCommands::Filter {
            input,
            candidate_file,
            output_dir,
            force,
        } => filter(&input, &candidate_file, &output_dir, force),
    }
}

enum ShardOutcome {
    Written,
    Skipped,
    Empty,
    Failed,
}

fn extract(
    input: &Path,
    output_dir: &Path,
    filter: &str,
    asn_map: Option<&Path>,
    force: bool,
) -> Result<()> {
    let prefixes = build_monitored_prefixes(filter, asn_map)?;
    let shards = collect_shard_files(input)?;
    std::fs::create_dir_all(output_dir)
        .with_context(|| format!("Failed to create output directory: {}", output_dir.display()))?;

    let outcomes: Vec<ShardOutcome> = shards
        .par_iter()
        .map(|shard| match extract_shard(shard, output_dir, &prefixes, force) {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("{e:#}");
                ShardOutcome::Failed
            }
        })
        .collect();
    log_outcomes("Extraction", &outcomes);
    Ok(())
}

fn extract_shard(
    shard: &Path,
    output_dir: &Path,
    prefixes: &MonitoredPrefixes,
    force: bool,
) -> Result<ShardOutcome> {
    let file_prefix = shard_file_prefix(shard)?;
    let candidate_file = output_dir.join(format!("{file_prefix}{CANDIDATE_FILE_SUFFIX}"));
    let non_candidate_file = output_dir.join(format!("{file_prefix}{NON_CANDIDATE_FILE_SUFFIX}"));
    if !force && (candidate_file.exists() || non_candidate_file.exists()) {
        return Ok(ShardOutcome::Skipped);
    }

    let classification = classify_shard(ShardReader::open(shard)?, prefixes)?;
    if classification.is_empty() {
        return Ok(ShardOutcome::Empty);
    }
    if !classification.candidates.is_empty() {
        artifacts::write_candidates(&candidate_file, &classification.candidates)?;
    }
    if !classification.non_candidates.is_empty() {
        artifacts::write_non_candidates(&non_candidate_file, &classification.non_candidates)?;
    }
    Ok(ShardOutcome::Written)
}

fn aggregate(candidates_dir: &Path, output_file: &Path, min_traceroutes: u64) -> Result<()> {
    info!("Requiring {min_traceroutes} traceroutes for valid candidates.");
    let mut aggregate = CandidateAggregate::new();
    let entries = std::fs::read_dir(candidates_dir).with_context(|| {
        format!(
            "Failed to read candidates directory: {}",
            candidates_dir.display()
        )
    })?;
    let mut shard_count = 0usize;
    for entry in entries {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
            continue;
        };
        if name.ends_with(CANDIDATE_FILE_SUFFIX) {
            let candidates = artifacts::read_candidates(&path)?.into_iter().collect();
            aggregate.absorb(ShardClassification {
                candidates,
                non_candidates: BTreeSet::new(),
            });
            shard_count += 1;
        } else if name.ends_with(NON_CANDIDATE_FILE_SUFFIX) {
            let non_candidates = artifacts::read_non_candidates(&path)?;
            aggregate.absorb(ShardClassification {
                candidates: Default::default(),
                non_candidates,
            });
            shard_count += 1;
        }
    }
    info!(
        "Aggregated {} artifact files covering {} pairs.",
        shard_count,
        aggregate.len()
    );

    let accepted = aggregate.accepted(min_traceroutes);
    if accepted.is_empty() {
        info!("No candidates left after aggregation, writing nothing.");
        return Ok(());
    }
    artifacts::write_candidates(output_file, &accepted)?;
    info!(
        "Wrote {} accepted pairs to {}",
        accepted.len(),
        output_file.display()
    );
    Ok(())
}

fn filter(input: &Path, candidate_file: &Path, output_dir: &Path, force: bool) -> Result<()> {
    let accepted: BTreeSet<PairId> = artifacts::load_accepted_pairs(candidate_file)?;
    info!("Loaded {} accepted pairs.", accepted.len());
    let shards = collect_shard_files(input)?;
    std::fs::create_dir_all(output_dir)
        .with_context(|| format!("Failed to create output directory: {}", output_dir.display()))?;

    let outcomes: Vec<ShardOutcome> = shards
        .par_iter()
        .map(
            |shard| match filter_one_shard(shard, output_dir, &accepted, force) {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!("{e:#}");
                    ShardOutcome::Failed
                }
            },
        )
        .collect();
    log_outcomes("Filtering", &outcomes);
    Ok(())
}

fn filter_one_shard(
    shard: &Path,
    output_dir: &Path,
    accepted: &BTreeSet<PairId>,
    force: bool,
) -> Result<ShardOutcome> {
    let file_name = shard
        .file_name()
        .with_context(|| format!("Shard has no file name: {}", shard.display()))?;
    let output_file = output_dir.join(file_name);
    if paths_collide(shard, &output_file) {
        bail!("Output file would overwrite input file: {}", shard.display());
    }
    if output_file.exists() && !force {
        return Ok(ShardOutcome::Skipped);
    }
    match filter_shard(ShardReader::open(shard)?, accepted)? {
        Some(selected) => {
            write_shard(&output_file, &selected)?;
            Ok(ShardOutcome::Written)
        }
        None => Ok(ShardOutcome::Empty),
    }
}

/// True if both paths name the same file. The output file may not exist yet,
/// so the comparison canonicalizes the parent directories.
fn paths_collide(input: &Path, output: &Path) -> bool {
    let input_dir = input.parent().and_then(|dir| dir.canonicalize().ok());
    let output_dir = output.parent().and_then(|dir| dir.canonicalize().ok());
    match (input_dir, output_dir) {
        (Some(a), Some(b)) => a == b && input.file_name() == output.file_name(),
        _ => input == output,
    }
}

fn shard_file_prefix(shard: &Path) -> Result<String> {
    let name = shard
        .file_name()
        .and_then(|name| name.to_str())
        .with_context(|| format!("Shard has no usable file name: {}", shard.display()))?;
    Ok(name
        .strip_suffix(SHARD_FILE_SUFFIX)
        .unwrap_or(name)
        .to_string())
}

fn log_outcomes(what: &str, outcomes: &[ShardOutcome]) {
    let written = outcomes
        .iter()
        .filter(|o| matches!(o, ShardOutcome::Written))
        .count();
    let skipped = outcomes
        .iter()
        .filter(|o| matches!(o, ShardOutcome::Skipped))
        .count();
    let empty = outcomes
        .iter()
        .filter(|o| matches!(o, ShardOutcome::Empty))
        .count();
    let failed = outcomes
        .iter()
        .filter(|o| matches!(o, ShardOutcome::Failed))
        .count();
    info!("{what} complete: {written} written, {empty} empty, {skipped} skipped, {failed} failed.");
}
