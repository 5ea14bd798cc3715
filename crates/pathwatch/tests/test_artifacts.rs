use anyhow::Result;
use atlas_pathwatch::{artifacts, traceroute::PairId};
use std::collections::{BTreeMap, BTreeSet};
use tempfile::tempdir;

fn pair(prb_id: u64, dst: &str) -> PairId {
    PairId {
        prb_id,
        dst_addr: dst.to_string(),
    }
}

#[test]
fn candidate_table_format_is_stable() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("candidates.csv");
    let candidates: BTreeMap<PairId, u64> = [
        (pair(1001, "192.0.2.1"), 30),
        (pair(17, "2001:db8::1"), 24),
    ]
    .into_iter()
    .collect();
    artifacts::write_candidates(&path, &candidates)?;

    let contents = std::fs::read_to_string(&path)?;
    let mut lines = contents.lines();
    assert_eq!(lines.next(), Some("prb_id,dst_addr,num_tr"));
    // Pair order: probe id first, then destination address.
    assert_eq!(lines.next(), Some("17,2001:db8::1,24"));
    assert_eq!(lines.next(), Some("1001,192.0.2.1,30"));
    assert_eq!(lines.next(), None);

    let rows = artifacts::read_candidates(&path)?;
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0], (pair(17, "2001:db8::1"), 24));
    Ok(())
}

#[test]
fn non_candidate_set_round_trips() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("shard.non-candidates.bin.gz");
    let non_candidates = BTreeSet::from([
        pair(1, "192.0.2.1"),
        pair(1, "192.0.2.2"),
        pair(99, "2001:db8::1"),
    ]);
    artifacts::write_non_candidates(&path, &non_candidates)?;
    assert_eq!(artifacts::read_non_candidates(&path)?, non_candidates);
    Ok(())
}

#[test]
fn malformed_candidate_file_is_an_error() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("candidates.csv");
    std::fs::write(&path, "prb_id,dst_addr,num_tr\nnot-a-number,192.0.2.1,5\n")?;
    assert!(artifacts::read_candidates(&path).is_err());
    Ok(())
}
