use crate::classify::PathStatus;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// Default bin width in seconds.
pub const DEFAULT_BIN_SIZE_SECS: i64 = 300;

/// One row of the binned statistics series. The four outcome counters are
/// mutually exclusive and sum to `num_tr`; RTT averages exist only for the
/// two reached categories and are 0 when no samples were collected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BinRecord {
    pub bin_timestamp: i64,
    pub num_tr: u64,
    pub target_pfx: u64,
    pub target_no_pfx: u64,
    pub no_target_pfx: u64,
    pub no_target_no_pfx: u64,
    pub target_pfx_rtt_count: u64,
    pub target_pfx_rtt_avg: f64,
    pub target_no_pfx_rtt_count: u64,
    pub target_no_pfx_rtt_avg: f64,
}

impl BinRecord {
    fn empty(bin_timestamp: i64) -> Self {
        Self {
            bin_timestamp,
            num_tr: 0,
            target_pfx: 0,
            target_no_pfx: 0,
            no_target_pfx: 0,
            no_target_no_pfx: 0,
            target_pfx_rtt_count: 0,
            target_pfx_rtt_avg: 0.0,
            target_no_pfx_rtt_count: 0,
            target_no_pfx_rtt_avg: 0.0,
        }
    }
}

#[derive(Debug, Clone, Default)]
struct BinAccumulator {
    num_tr: u64,
    target_pfx: u64,
    target_no_pfx: u64,
    no_target_pfx: u64,
    no_target_no_pfx: u64,
    target_pfx_rtts: Vec<f64>,
    target_no_pfx_rtts: Vec<f64>,
}

impl BinAccumulator {
    fn finalize(&self, bin_timestamp: i64) -> BinRecord {
        BinRecord {
            bin_timestamp,
            num_tr: self.num_tr,
            target_pfx: self.target_pfx,
            target_no_pfx: self.target_no_pfx,
            no_target_pfx: self.no_target_pfx,
            no_target_no_pfx: self.no_target_no_pfx,
            target_pfx_rtt_count: self.target_pfx_rtts.len() as u64,
            target_pfx_rtt_avg: mean(&self.target_pfx_rtts),
            target_no_pfx_rtt_count: self.target_no_pfx_rtts.len() as u64,
            target_no_pfx_rtt_avg: mean(&self.target_no_pfx_rtts),
        }
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Accumulates per-traceroute outcomes into fixed-width time bins.
///
/// Bins are keyed by the timestamp rounded down to a multiple of the bin
/// width and created on first observation; they are only ever mutated
/// additively. [`BinTable::finalize`] materializes the gap-free series.
#[derive(Debug, Clone)]
pub struct BinTable {
    bin_size: i64,
    bins: BTreeMap<i64, BinAccumulator>,
}

impl BinTable {
    /// `bin_size` must be positive; validated at the configuration boundary.
    pub fn new(bin_size: i64) -> Self {
        debug_assert!(bin_size > 0);
        Self {
            bin_size,
            bins: BTreeMap::new(),
        }
    }

    /// Record one traceroute outcome. An `rtt` of 0 on a reached outcome
    /// counts as "no RTT data" and contributes no sample.
    pub fn record(&mut self, timestamp: i64, status: &PathStatus) {
        let key = timestamp - timestamp.rem_euclid(self.bin_size);
        let bin = self.bins.entry(key).or_default();
        bin.num_tr += 1;
        match (status.target_reached, status.prefix_in_path) {
            (true, true) => {
                bin.target_pfx += 1;
                if status.rtt > 0.0 {
                    bin.target_pfx_rtts.push(status.rtt);
                }
            }
            (true, false) => {
                bin.target_no_pfx += 1;
                if status.rtt > 0.0 {
                    bin.target_no_pfx_rtts.push(status.rtt);
                }
            }
            (false, true) => bin.no_target_pfx += 1,
            (false, false) => bin.no_target_no_pfx += 1,
        }
    }

    pub fn extend(&mut self, outcomes: impl IntoIterator<Item = (i64, PathStatus)>) {
        for (timestamp, status) in outcomes {
            self.record(timestamp, &status);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.bins.is_empty()
    }

    /// Materialize the chronologically contiguous series from the first to
    /// the last populated bin, synthesizing all-zero rows for gaps and
    /// reducing RTT samples to their arithmetic mean.
    ///
    /// Returns `None` when nothing was recorded: with no populated bin there
    /// is no well-defined series, and callers must not emit an artifact.
    pub fn finalize(self) -> Option<Vec<BinRecord>> {
        let first = *self.bins.keys().next()?;
        let last = *self.bins.keys().next_back()?;
        let mut series = Vec::with_capacity(((last - first) / self.bin_size + 1) as usize);
        let mut key = first;
        while key <= last {
            match self.bins.get(&key) {
                Some(bin) => series.push(bin.finalize(key)),
                None => series.push(BinRecord::empty(key)),
            }
            key += self.bin_size;
        }
        debug!(
            "Materialized {} bins from {} to {} ({} populated)",
            series.len(),
            first,
            last,
            self.bins.len()
        );
        Some(series)
    }
}
