use crate::{classify::ShardClassification, traceroute::PairId};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Global classification of a pair across shards.
///
/// Forms a lattice under [`PairClass::merge`]: `NonCandidate` absorbs
/// everything (non-candidate status is sticky and monotonic), and candidate
/// counts sum. Merging is commutative and associative, so shard outputs can
/// be folded in any order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairClass {
    Candidate { count: u64 },
    NonCandidate,
}

impl PairClass {
    pub fn merge(self, other: PairClass) -> PairClass {
        match (self, other) {
            (PairClass::Candidate { count: a }, PairClass::Candidate { count: b }) => {
                PairClass::Candidate { count: a + b }
            }
            _ => PairClass::NonCandidate,
        }
    }
}

/// Accumulates shard classifications into a single global pair table.
///
/// Pure reduction: shards may have been produced in parallel and can be
/// absorbed in any order. The non-candidate exclusion is inherent in the
/// lattice merge, so it holds even for pairs that never appear with a
/// positive count in any shard.
#[derive(Debug, Clone, Default)]
pub struct CandidateAggregate {
    pairs: BTreeMap<PairId, PairClass>,
}

impl CandidateAggregate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one shard's classification into the global table.
    pub fn absorb(&mut self, shard: ShardClassification) {
        for (pair, count) in shard.candidates {
            self.merge_pair(pair, PairClass::Candidate { count });
        }
        for pair in shard.non_candidates {
            self.merge_pair(pair, PairClass::NonCandidate);
        }
    }

    fn merge_pair(&mut self, pair: PairId, class: PairClass) {
        let merged = match self.pairs.get(&pair) {
            Some(existing) => existing.merge(class),
            None => class,
        };
        self.pairs.insert(pair, merged);
    }

    /// Number of pairs seen so far, candidates and non-candidates alike.
    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// The accepted candidate table: every pair never disqualified anywhere,
    /// with a summed traceroute count of at least `min_traceroutes`. Sorted
    /// by pair for reproducible output.
    pub fn accepted(&self, min_traceroutes: u64) -> BTreeMap<PairId, u64> {
        let mut accepted = BTreeMap::new();
        let mut excluded = 0usize;
        let mut below_threshold = 0usize;
        for (pair, class) in &self.pairs {
            match class {
                PairClass::NonCandidate => excluded += 1,
                PairClass::Candidate { count } if *count < min_traceroutes => {
                    below_threshold += 1;
                }
                PairClass::Candidate { count } => {
                    accepted.insert(pair.clone(), *count);
                }
            }
        }
        debug!(
            "Accepted {} pairs ({} non-candidates excluded, {} below threshold {})",
            accepted.len(),
            excluded,
            below_threshold,
            min_traceroutes
        );
        accepted
    }
}

/// Merge all shard classifications and apply the minimum-traceroute
/// threshold in one step.
pub fn aggregate_shards(
    shards: impl IntoIterator<Item = ShardClassification>,
    min_traceroutes: u64,
) -> BTreeMap<PairId, u64> {
    let mut aggregate = CandidateAggregate::new();
    let mut shard_count = 0usize;
    for shard in shards {
        aggregate.absorb(shard);
        shard_count += 1;
    }
    info!(
        "Aggregated {} shard classifications covering {} pairs",
        shard_count,
        aggregate.len()
    );
    aggregate.accepted(min_traceroutes)
}
