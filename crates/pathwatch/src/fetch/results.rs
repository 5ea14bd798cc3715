use crate::{
    artifacts::shard::SHARD_FILE_SUFFIX,
    fetch::{AtlasClient, metadata::MetadataIndex},
};
use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use flate2::{Compression, write::GzEncoder};
use futures::{StreamExt, stream};
use std::{
    collections::BTreeSet,
    fs::{File, OpenOptions},
    io::{BufRead, BufReader, BufWriter, Write},
    path::{Path, PathBuf},
};
use tracing::{error, info};

/// Timestamp format of interval boundaries on the command line (UTC).
pub const INTERVAL_DATE_FMT: &str = "%Y-%m-%dT%H:%M:%S";

/// Parse an interval boundary in [`INTERVAL_DATE_FMT`] to a UNIX epoch.
pub fn parse_interval_timestamp(timestamp: &str) -> Result<i64> {
    NaiveDateTime::parse_from_str(timestamp, INTERVAL_DATE_FMT)
        .map(|dt| dt.and_utc().timestamp())
        .with_context(|| {
            format!("Invalid timestamp: {timestamp} (expected format {INTERVAL_DATE_FMT})")
        })
}

fn format_interval_timestamp(ts: i64) -> String {
    match DateTime::<Utc>::from_timestamp(ts, 0) {
        Some(dt) => dt.format(INTERVAL_DATE_FMT).to_string(),
        None => ts.to_string(),
    }
}

/// Options for one interval fetch.
#[derive(Debug, Clone)]
pub struct FetchOptions {
    pub interval_start: i64,
    pub interval_end: i64,
    pub af: Option<u8>,
    pub output_dir: PathBuf,
    pub parallel_downloads: usize,
    pub force: bool,
}

/// Outcome counts of one interval fetch.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FetchSummary {
    pub stored: usize,
    pub skipped: usize,
    pub empty: usize,
    pub failed: usize,
}

enum JobOutcome {
    Stored,
    Empty(u64),
    Failed,
}

/// Download all measurement results that can fall within the interval and
/// store them as one shard per measurement under `<out>/<af>/<msm_id>.jsonl.gz`.
///
/// Already-present shards are skipped unless forced, and measurements that
/// previously returned no data for this interval are remembered in an
/// empty-results log so interrupted runs can resume without re-requesting
/// them.
pub async fn fetch_interval(
    client: &AtlasClient,
    index: &MetadataIndex,
    opts: &FetchOptions,
) -> Result<FetchSummary> {
    let msm_ids = index.filter_interval(opts.interval_start, opts.interval_end, opts.af);

    let families: BTreeSet<u8> = match opts.af {
        Some(af) => BTreeSet::from([af]),
        None => BTreeSet::from([4, 6]),
    };
    for af in &families {
        std::fs::create_dir_all(opts.output_dir.join(af.to_string()))
            .context("Failed to create output directory")?;
    }

    let empty_log = empty_results_log_path(opts.interval_start, opts.interval_end);
    let previously_empty = read_empty_results(&empty_log)?;

    let mut summary = FetchSummary::default();
    let mut jobs = Vec::new();
    for (msm_id, af) in msm_ids {
        if previously_empty.contains(&msm_id) {
            summary.skipped += 1;
            continue;
        }
        let output_file = shard_path(&opts.output_dir, af, msm_id);
        if output_file.exists() && !opts.force {
            summary.skipped += 1;
            continue;
        }
        jobs.push((msm_id, output_file));
    }
    info!(
        "Downloading results for {} measurements ({} skipped) with {} parallel downloads.",
        jobs.len(),
        summary.skipped,
        opts.parallel_downloads
    );

    let outcomes = stream::iter(jobs)
        .map(|(msm_id, output_file)| async move {
            match client
                .measurement_results(msm_id, opts.interval_start, opts.interval_end)
                .await
            {
                Ok(body) if body.trim().is_empty() => {
                    info!("No results for measurement {msm_id}");
                    JobOutcome::Empty(msm_id)
                }
                Ok(body) => {
                    let store_target = output_file.clone();
                    let stored = tokio::task::spawn_blocking(move || {
                        store_shard_text(&store_target, &body)
                    })
                    .await;
                    match stored {
                        Ok(Ok(())) => {
                            info!("Stored {}", output_file.display());
                            JobOutcome::Stored
                        }
                        Ok(Err(e)) => {
                            error!("Store of measurement {msm_id} failed: {e:#}");
                            JobOutcome::Failed
                        }
                        Err(e) => {
                            error!("Store of measurement {msm_id} failed: {e}");
                            JobOutcome::Failed
                        }
                    }
                }
                Err(e) => {
                    error!("Request for measurement {msm_id} failed: {e:#}");
                    JobOutcome::Failed
                }
            }
        })
        .buffer_unordered(opts.parallel_downloads)
        .collect::<Vec<_>>()
        .await;

    let mut new_empty = Vec::new();
    for outcome in outcomes {
        match outcome {
            JobOutcome::Stored => summary.stored += 1,
            JobOutcome::Empty(msm_id) => {
                summary.empty += 1;
                new_empty.push(msm_id);
            }
            JobOutcome::Failed => summary.failed += 1,
        }
    }
    append_empty_results(&empty_log, &new_empty)?;

    info!(
        "Fetch complete: {} stored, {} empty, {} failed, {} skipped.",
        summary.stored, summary.empty, summary.failed, summary.skipped
    );
    Ok(summary)
}

fn shard_path(output_dir: &Path, af: u8, msm_id: u64) -> PathBuf {
    output_dir
        .join(af.to_string())
        .join(format!("{msm_id}{SHARD_FILE_SUFFIX}"))
}

fn empty_results_log_path(interval_start: i64, interval_end: i64) -> PathBuf {
    PathBuf::from(format!(
        "{}--{}-empty-msm-ids.log",
        format_interval_timestamp(interval_start),
        format_interval_timestamp(interval_end)
    ))
}

fn read_empty_results(path: &Path) -> Result<BTreeSet<u64>> {
    if !path.exists() {
        return Ok(BTreeSet::new());
    }
    let file = File::open(path)
        .with_context(|| format!("Failed to open empty-results log: {}", path.display()))?;
    let mut ids = BTreeSet::new();
    for line in BufReader::new(file).lines() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        ids.insert(trimmed.parse::<u64>().with_context(|| {
            format!("Malformed empty-results log: {}", path.display())
        })?);
    }
    Ok(ids)
}

fn append_empty_results(path: &Path, msm_ids: &[u64]) -> Result<()> {
    if msm_ids.is_empty() {
        return Ok(());
    }
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open empty-results log: {}", path.display()))?;
    for msm_id in msm_ids {
        writeln!(file, "{msm_id}")?;
    }
    Ok(())
}

fn store_shard_text(path: &Path, body: &str) -> Result<()> {
    let file = File::create(path)
        .with_context(|| format!("Failed to create shard file: {}", path.display()))?;
    let mut writer = BufWriter::new(GzEncoder::new(file, Compression::default()));
    writer.write_all(body.as_bytes())?;
    if !body.ends_with('\n') {
        writer.write_all(b"\n")?;
    }
    writer
        .into_inner()
        .map_err(|e| e.into_error())
        .and_then(|encoder| encoder.finish())
        .with_context(|| format!("Failed to finish shard file: {}", path.display()))?;
    Ok(())
}
