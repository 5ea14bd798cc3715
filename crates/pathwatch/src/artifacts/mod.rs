pub mod shard;

use crate::{bins::BinRecord, traceroute::PairId};
use anyhow::{Context, Result};
use flate2::{Compression, read::MultiGzDecoder, write::GzEncoder};
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, BTreeSet},
    fs::File,
    io::{BufReader, BufWriter},
    path::Path,
};

/// Suffix of per-shard and aggregated candidate table files.
pub const CANDIDATE_FILE_SUFFIX: &str = ".candidates.csv";
/// Suffix of per-shard non-candidate set files.
pub const NON_CANDIDATE_FILE_SUFFIX: &str = ".non-candidates.bin.gz";

/// One row of the candidate table CSV (`prb_id,dst_addr,num_tr`).
#[derive(Debug, Serialize, Deserialize)]
struct CandidateRow {
    prb_id: u64,
    dst_addr: String,
    num_tr: u64,
}

/// Write a candidate table. The input map is already pair-sorted, which is
/// the stable order the file format requires.
pub fn write_candidates<P: AsRef<Path>>(
    path: P,
    candidates: &BTreeMap<PairId, u64>,
) -> Result<()> {
    let path = path.as_ref();
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("Failed to create candidate file: {}", path.display()))?;
    for (pair, num_tr) in candidates {
        writer.serialize(CandidateRow {
            prb_id: pair.prb_id,
            dst_addr: pair.dst_addr.clone(),
            num_tr: *num_tr,
        })?;
    }
    writer
        .flush()
        .with_context(|| format!("Failed to write candidate file: {}", path.display()))?;
    Ok(())
}

/// Read a candidate table back into pair/count rows.
pub fn read_candidates<P: AsRef<Path>>(path: P) -> Result<Vec<(PairId, u64)>> {
    let path = path.as_ref();
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("Failed to open candidate file: {}", path.display()))?;
    let mut rows = Vec::new();
    for row in reader.deserialize() {
        let row: CandidateRow =
            row.with_context(|| format!("Malformed candidate file: {}", path.display()))?;
        rows.push((
            PairId {
                prb_id: row.prb_id,
                dst_addr: row.dst_addr,
            },
            row.num_tr,
        ));
    }
    Ok(rows)
}

/// Load the accepted pair set from a candidate table, discarding counts.
pub fn load_accepted_pairs<P: AsRef<Path>>(path: P) -> Result<BTreeSet<PairId>> {
    Ok(read_candidates(path)?
        .into_iter()
        .map(|(pair, _)| pair)
        .collect())
}

/// Write a non-candidate pair set as gzip-compressed bincode.
pub fn write_non_candidates<P: AsRef<Path>>(
    path: P,
    non_candidates: &BTreeSet<PairId>,
) -> Result<()> {
    let path = path.as_ref();
    let file = File::create(path)
        .with_context(|| format!("Failed to create non-candidate file: {}", path.display()))?;
    let mut encoder = GzEncoder::new(BufWriter::new(file), Compression::default());
    let pairs: Vec<&PairId> = non_candidates.iter().collect();
    bincode::serialize_into(&mut encoder, &pairs)
        .with_context(|| format!("Failed to write non-candidate file: {}", path.display()))?;
    encoder.finish()?;
    Ok(())
}

/// Read a non-candidate pair set.
pub fn read_non_candidates<P: AsRef<Path>>(path: P) -> Result<BTreeSet<PairId>> {
    let path = path.as_ref();
    let file = File::open(path)
        .with_context(|| format!("Failed to open non-candidate file: {}", path.display()))?;
    let pairs: Vec<PairId> = bincode::deserialize_from(MultiGzDecoder::new(BufReader::new(file)))
        .with_context(|| format!("Malformed non-candidate file: {}", path.display()))?;
    Ok(pairs.into_iter().collect())
}

/// Write the binned statistics series as CSV, one row per bin.
pub fn write_bins<P: AsRef<Path>>(path: P, series: &[BinRecord]) -> Result<()> {
    let path = path.as_ref();
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("Failed to create bin statistics file: {}", path.display()))?;
    for record in series {
        writer.serialize(record)?;
    }
    writer
        .flush()
        .with_context(|| format!("Failed to write bin statistics file: {}", path.display()))?;
    Ok(())
}

/// Read a binned statistics series back from CSV.
pub fn read_bins<P: AsRef<Path>>(path: P) -> Result<Vec<BinRecord>> {
    let path = path.as_ref();
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("Failed to open bin statistics file: {}", path.display()))?;
    let mut series = Vec::new();
    for record in reader.deserialize() {
        series.push(
            record.with_context(|| format!("Malformed bin statistics file: {}", path.display()))?,
        );
    }
    Ok(series)
}
