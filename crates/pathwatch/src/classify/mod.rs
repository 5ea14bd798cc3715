use crate::{
    artifacts::shard::ShardError,
    prefix::MonitoredPrefixes,
    traceroute::{Hop, PairId, TracerouteRecord},
};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Outcome of one traceroute: whether it reached its destination, whether it
/// traversed a monitored prefix, and (only when the destination was reached)
/// the mean RTT of the final hop. An RTT of 0 means "no RTT data".
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PathStatus {
    pub target_reached: bool,
    pub prefix_in_path: bool,
    pub rtt: f64,
}

/// Compute the path status of one traceroute, or `None` if the record has no
/// usable destination address.
pub fn path_status(
    record: &TracerouteRecord,
    prefixes: &MonitoredPrefixes,
) -> Option<PathStatus> {
    let dst_addr = record.dst_addr.as_deref().filter(|addr| !addr.is_empty())?;
    let last_hop = record.hops.last();
    let target_reached = last_hop.is_some_and(|hop| addr_in_hop(hop, dst_addr));
    let rtt = match last_hop {
        Some(hop) if target_reached => avg_hop_rtt(hop),
        _ => 0.0,
    };
    let prefix_in_path = record
        .hops
        .iter()
        .any(|hop| prefixes_in_hop(hop, prefixes));
    Some(PathStatus {
        target_reached,
        prefix_in_path,
        rtt,
    })
}

/// True if any reply of the hop came from the given address.
fn addr_in_hop(hop: &Hop, addr: &str) -> bool {
    hop.usable_replies()
        .iter()
        .any(|reply| reply.from.as_deref() == Some(addr))
}

/// True if any reply of the hop came from inside a monitored prefix.
/// Source addresses that do not parse as IP literals never match.
fn prefixes_in_hop(hop: &Hop, prefixes: &MonitoredPrefixes) -> bool {
    hop.usable_replies().iter().any(|reply| {
        reply
            .from
            .as_deref()
            .and_then(|from| from.parse().ok())
            .is_some_and(|addr| prefixes.contains(addr))
    })
}

/// Mean RTT over the replies of a hop that carry one; 0 if none do.
fn avg_hop_rtt(hop: &Hop) -> f64 {
    let rtts: Vec<f64> = hop
        .usable_replies()
        .iter()
        .filter_map(|reply| reply.rtt)
        .collect();
    if rtts.is_empty() {
        return 0.0;
    }
    rtts.iter().sum::<f64>() / rtts.len() as f64
}

/// Per-pair state during a single shard pass. Disqualification is sticky
/// within the pass: once a pair fails the candidate predicate, later
/// qualifying traceroutes are ignored and its count stays discarded.
#[derive(Debug, Clone, Copy)]
enum PairState {
    Counted(u64),
    Disqualified,
}

/// Frozen classification of one shard: candidate pairs with their traceroute
/// counts, and pairs disqualified by at least one traceroute.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ShardClassification {
    pub candidates: BTreeMap<PairId, u64>,
    pub non_candidates: BTreeSet<PairId>,
}

impl ShardClassification {
    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty() && self.non_candidates.is_empty()
    }
}

/// Classify one shard's records in file order.
///
/// Records without a destination address are skipped. A record qualifies its
/// pair only if it reached the target and traversed a monitored prefix; the
/// first failing record permanently disqualifies the pair within this shard.
/// The first corrupt record aborts the whole shard without a partial result.
pub fn classify_shard(
    records: impl IntoIterator<Item = Result<TracerouteRecord, ShardError>>,
    prefixes: &MonitoredPrefixes,
) -> Result<ShardClassification, ShardError> {
    let mut pairs: BTreeMap<PairId, PairState> = BTreeMap::new();
    for record in records {
        let record = record?;
        let Some(pair) = record.pair() else {
            continue;
        };
        if matches!(pairs.get(&pair), Some(PairState::Disqualified)) {
            continue;
        }
        let Some(status) = path_status(&record, prefixes) else {
            continue;
        };
        if status.target_reached && status.prefix_in_path {
            let count = match pairs.get(&pair) {
                Some(PairState::Counted(n)) => n + 1,
                _ => 1,
            };
            pairs.insert(pair, PairState::Counted(count));
        } else {
            pairs.insert(pair, PairState::Disqualified);
        }
    }

    let mut classification = ShardClassification::default();
    for (pair, state) in pairs {
        match state {
            PairState::Counted(count) => {
                classification.candidates.insert(pair, count);
            }
            PairState::Disqualified => {
                classification.non_candidates.insert(pair);
            }
        }
    }
    debug!(
        "Classified shard: {} candidate pairs, {} non-candidate pairs",
        classification.candidates.len(),
        classification.non_candidates.len()
    );
    Ok(classification)
}

/// Compute the per-traceroute outcome for every record of a shard, paired
/// with its timestamp. Records without a destination address are skipped; a
/// corrupt record aborts the shard.
pub fn scan_shard(
    records: impl IntoIterator<Item = Result<TracerouteRecord, ShardError>>,
    prefixes: &MonitoredPrefixes,
) -> Result<Vec<(i64, PathStatus)>, ShardError> {
    let mut outcomes = Vec::new();
    for record in records {
        let record = record?;
        if let Some(status) = path_status(&record, prefixes) {
            outcomes.push((record.timestamp, status));
        }
    }
    Ok(outcomes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(line: &str) -> TracerouteRecord {
        serde_json::from_str(line).unwrap()
    }

    fn prefixes(filter: &str) -> MonitoredPrefixes {
        MonitoredPrefixes::from_filter(filter, None).unwrap()
    }

    fn reaching(prb_id: u64, dst: &str, via: &str, rtt: f64) -> String {
        format!(
            r#"{{"prb_id":{prb_id},"dst_addr":"{dst}","timestamp":100,"result":[{{"hop":1,"result":[{{"from":"{via}","rtt":1.0}}]}},{{"hop":2,"result":[{{"from":"{dst}","rtt":{rtt}}}]}}]}}"#
        )
    }

    fn unreached(prb_id: u64, dst: &str, via: &str) -> String {
        format!(
            r#"{{"prb_id":{prb_id},"dst_addr":"{dst}","timestamp":100,"result":[{{"hop":1,"result":[{{"from":"{via}","rtt":1.0}}]}},{{"hop":2,"result":[{{"x":"*"}}]}}]}}"#
        )
    }

    #[test]
    fn status_reached_through_prefix() {
        let pfx = prefixes("10.0.0.0/8");
        let status =
            path_status(&record(&reaching(1, "192.0.2.1", "10.1.2.3", 20.0)), &pfx).unwrap();
        assert!(status.target_reached);
        assert!(status.prefix_in_path);
        assert!((status.rtt - 20.0).abs() < f64::EPSILON);
    }

    #[test]
    fn status_rtt_is_final_hop_mean() {
        let pfx = prefixes("10.0.0.0/8");
        let tr = record(
            r#"{"prb_id":1,"dst_addr":"192.0.2.1","timestamp":100,"result":[{"hop":1,"result":[{"from":"192.0.2.1","rtt":10.0},{"from":"192.0.2.1","rtt":20.0},{"from":"192.0.2.1"}]}]}"#,
        );
        let status = path_status(&tr, &pfx).unwrap();
        assert!(status.target_reached);
        assert!((status.rtt - 15.0).abs() < f64::EPSILON);
    }

    #[test]
    fn status_no_rtt_when_unreached() {
        let pfx = prefixes("10.0.0.0/8");
        let status = path_status(&record(&unreached(1, "192.0.2.1", "10.0.0.1")), &pfx).unwrap();
        assert!(!status.target_reached);
        assert!(status.prefix_in_path);
        assert_eq!(status.rtt, 0.0);
    }

    #[test]
    fn status_errored_final_hop_never_reaches() {
        let pfx = prefixes("10.0.0.0/8");
        let tr = record(
            r#"{"prb_id":1,"dst_addr":"192.0.2.1","timestamp":100,"result":[{"error":"timeout","result":[{"from":"192.0.2.1","rtt":5.0}]}]}"#,
        );
        let status = path_status(&tr, &pfx).unwrap();
        assert!(!status.target_reached);
    }

    #[test]
    fn disqualification_is_sticky_within_shard() {
        let pfx = prefixes("10.0.0.0/8");
        let records = vec![
            Ok(record(&reaching(1, "192.0.2.1", "10.0.0.1", 5.0))),
            Ok(record(&unreached(1, "192.0.2.1", "10.0.0.1"))),
            Ok(record(&reaching(1, "192.0.2.1", "10.0.0.1", 5.0))),
        ];
        let classification = classify_shard(records, &pfx).unwrap();
        let pair = PairId {
            prb_id: 1,
            dst_addr: "192.0.2.1".to_string(),
        };
        assert!(classification.candidates.is_empty());
        assert!(classification.non_candidates.contains(&pair));
    }

    #[test]
    fn qualifying_traceroutes_are_counted() {
        let pfx = prefixes("10.0.0.0/8");
        let records = vec![
            Ok(record(&reaching(1, "192.0.2.1", "10.0.0.1", 5.0))),
            Ok(record(&reaching(1, "192.0.2.1", "10.0.0.1", 6.0))),
            Ok(record(&reaching(2, "192.0.2.1", "172.16.0.1", 6.0))),
        ];
        let classification = classify_shard(records, &pfx).unwrap();
        let pair = PairId {
            prb_id: 1,
            dst_addr: "192.0.2.1".to_string(),
        };
        assert_eq!(classification.candidates.get(&pair), Some(&2));
        // Probe 2 reached its target but outside the monitored prefixes.
        assert_eq!(classification.non_candidates.len(), 1);
    }

    #[test]
    fn missing_destination_is_skipped() {
        let pfx = prefixes("10.0.0.0/8");
        let records = vec![Ok(record(
            r#"{"prb_id":1,"timestamp":100,"result":[{"hop":1,"result":[{"from":"10.0.0.1","rtt":1.0}]}]}"#,
        ))];
        let classification = classify_shard(records, &pfx).unwrap();
        assert!(classification.is_empty());
    }

    #[test]
    fn corrupt_record_aborts_shard() {
        let pfx = prefixes("10.0.0.0/8");
        let records = vec![
            Ok(record(&reaching(1, "192.0.2.1", "10.0.0.1", 5.0))),
            Err(ShardError::Corrupt {
                path: "shard.jsonl.gz".into(),
                line: 2,
                source: serde_json::from_str::<TracerouteRecord>("{").unwrap_err(),
            }),
        ];
        assert!(classify_shard(records, &pfx).is_err());
    }

    #[test]
    fn scan_keeps_timestamps() {
        let pfx = prefixes("10.0.0.0/8");
        let records = vec![
            Ok(record(&reaching(1, "192.0.2.1", "10.0.0.1", 5.0))),
            Ok(record(&unreached(2, "192.0.2.2", "172.16.0.1"))),
        ];
        let outcomes = scan_shard(records, &pfx).unwrap();
        assert_eq!(outcomes.len(), 2);
        assert_eq!(outcomes[0].0, 100);
        assert!(outcomes[0].1.target_reached);
        assert!(!outcomes[1].1.target_reached);
        assert!(!outcomes[1].1.prefix_in_path);
    }
}
