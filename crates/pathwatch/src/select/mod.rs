use crate::{
    artifacts::shard::ShardError,
    traceroute::{PairId, TracerouteRecord},
};
use std::collections::BTreeSet;

/// Filter one shard down to traceroutes between accepted pairs, preserving
/// file order. Records without a usable destination address are dropped.
///
/// Returns `None` when nothing matched, so callers can distinguish "nothing
/// to emit" from an emitted empty shard (empty output files are never
/// written). A corrupt record aborts the shard.
pub fn filter_shard(
    records: impl IntoIterator<Item = Result<TracerouteRecord, ShardError>>,
    accepted: &BTreeSet<PairId>,
) -> Result<Option<Vec<TracerouteRecord>>, ShardError> {
    let mut selected = Vec::new();
    for record in records {
        let record = record?;
        let Some(pair) = record.pair() else {
            continue;
        };
        if accepted.contains(&pair) {
            selected.push(record);
        }
    }
    if selected.is_empty() {
        return Ok(None);
    }
    Ok(Some(selected))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(prb_id: u64, dst: &str) -> TracerouteRecord {
        serde_json::from_str(&format!(
            r#"{{"prb_id":{prb_id},"dst_addr":"{dst}","timestamp":100,"result":[]}}"#
        ))
        .unwrap()
    }

    fn pair(prb_id: u64, dst: &str) -> PairId {
        PairId {
            prb_id,
            dst_addr: dst.to_string(),
        }
    }

    #[test]
    fn keeps_only_accepted_pairs_in_order() {
        let accepted = BTreeSet::from([pair(1, "192.0.2.1"), pair(3, "192.0.2.3")]);
        let records = vec![
            Ok(record(3, "192.0.2.3")),
            Ok(record(2, "192.0.2.2")),
            Ok(record(1, "192.0.2.1")),
        ];
        let selected = filter_shard(records, &accepted).unwrap().unwrap();
        assert_eq!(selected.len(), 2);
        assert_eq!(selected[0].prb_id, 3);
        assert_eq!(selected[1].prb_id, 1);
    }

    #[test]
    fn nothing_to_emit_is_none() {
        let accepted = BTreeSet::from([pair(1, "192.0.2.1")]);
        let records = vec![Ok(record(2, "192.0.2.2"))];
        assert!(filter_shard(records, &accepted).unwrap().is_none());
    }

    #[test]
    fn missing_destination_is_dropped() {
        let accepted = BTreeSet::from([pair(1, "192.0.2.1")]);
        let no_dst: TracerouteRecord =
            serde_json::from_str(r#"{"prb_id":1,"timestamp":100,"result":[]}"#).unwrap();
        assert!(filter_shard(vec![Ok(no_dst)], &accepted).unwrap().is_none());
    }
}
