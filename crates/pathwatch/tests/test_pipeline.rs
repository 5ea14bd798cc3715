use anyhow::Result;
use atlas_pathwatch::{
    aggregate::CandidateAggregate,
    artifacts::{
        self,
        shard::{ShardReader, collect_shard_files, verify_shard, write_shard},
    },
    bins::BinTable,
    classify::{ShardClassification, classify_shard, scan_shard},
    prefix::MonitoredPrefixes,
    select::filter_shard,
    traceroute::{PairId, TracerouteRecord},
};
use std::collections::BTreeSet;
use tempfile::tempdir;

fn reaching(prb_id: u64, dst: &str, via: &str, rtt: f64, timestamp: i64) -> TracerouteRecord {
    serde_json::from_str(&format!(
        r#"{{"prb_id":{prb_id},"dst_addr":"{dst}","timestamp":{timestamp},"msm_id":7,"result":[{{"hop":1,"result":[{{"from":"{via}","rtt":1.0}}]}},{{"hop":2,"result":[{{"from":"{dst}","rtt":{rtt}}}]}}]}}"#
    ))
    .unwrap()
}

fn unreached(prb_id: u64, dst: &str, timestamp: i64) -> TracerouteRecord {
    serde_json::from_str(&format!(
        r#"{{"prb_id":{prb_id},"dst_addr":"{dst}","timestamp":{timestamp},"result":[{{"hop":1,"result":[{{"x":"*"}}]}}]}}"#
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
fn classify_aggregate_filter_through_files() -> Result<()> {
    let dir = tempdir()?;
    let prefixes = MonitoredPrefixes::from_filter("10.0.0.0/8", None)?;

    let shard_file = dir.path().join("100.jsonl.gz");
    write_shard(
        &shard_file,
        &[
            reaching(1, "192.0.2.1", "10.0.0.1", 5.0, 0),
            reaching(1, "192.0.2.1", "10.0.0.1", 6.0, 60),
            reaching(1, "192.0.2.1", "10.0.0.1", 7.0, 120),
            unreached(2, "192.0.2.2", 0),
        ],
    )?;

    let classification = classify_shard(ShardReader::open(&shard_file)?, &prefixes)?;
    assert_eq!(classification.candidates.get(&pair(1, "192.0.2.1")), Some(&3));
    assert!(classification.non_candidates.contains(&pair(2, "192.0.2.2")));

    let mut aggregate = CandidateAggregate::new();
    aggregate.absorb(classification);
    let accepted = aggregate.accepted(3);
    assert_eq!(accepted.len(), 1);

    let candidate_file = dir.path().join("candidates.csv");
    artifacts::write_candidates(&candidate_file, &accepted)?;
    let accepted_pairs = artifacts::load_accepted_pairs(&candidate_file)?;
    assert_eq!(accepted_pairs, BTreeSet::from([pair(1, "192.0.2.1")]));

    let selected = filter_shard(ShardReader::open(&shard_file)?, &accepted_pairs)?
        .expect("accepted pair has traceroutes");
    assert_eq!(selected.len(), 3);

    let filtered_file = dir.path().join("filtered").join("100.jsonl.gz");
    std::fs::create_dir_all(filtered_file.parent().unwrap())?;
    write_shard(&filtered_file, &selected)?;
    assert_eq!(verify_shard(&filtered_file)?, 3);

    // Filtered records keep fields the pipeline does not model.
    let reread: Vec<TracerouteRecord> = ShardReader::open(&filtered_file)?
        .collect::<Result<_, _>>()?;
    assert_eq!(reread[0].extra.get("msm_id"), Some(&serde_json::json!(7)));
    Ok(())
}

#[test]
fn disqualification_in_one_shard_wins_through_artifacts() -> Result<()> {
    let dir = tempdir()?;
    let target = pair(1, "192.0.2.1");

    let candidate_file = dir.path().join("a.candidates.csv");
    artifacts::write_candidates(&candidate_file, &[(target.clone(), 30)].into_iter().collect())?;
    let non_candidate_file = dir.path().join("b.non-candidates.bin.gz");
    artifacts::write_non_candidates(&non_candidate_file, &BTreeSet::from([target.clone()]))?;

    let mut aggregate = CandidateAggregate::new();
    aggregate.absorb(ShardClassification {
        candidates: artifacts::read_candidates(&candidate_file)?.into_iter().collect(),
        non_candidates: BTreeSet::new(),
    });
    aggregate.absorb(ShardClassification {
        candidates: Default::default(),
        non_candidates: artifacts::read_non_candidates(&non_candidate_file)?,
    });
    assert!(aggregate.accepted(1).is_empty());
    Ok(())
}

#[test]
fn binned_series_round_trips_as_csv() -> Result<()> {
    let dir = tempdir()?;
    let prefixes = MonitoredPrefixes::from_filter("10.0.0.0/8", None)?;

    let shard_file = dir.path().join("100.jsonl.gz");
    write_shard(
        &shard_file,
        &[
            reaching(1, "192.0.2.1", "10.0.0.1", 10.0, 0),
            reaching(1, "192.0.2.1", "10.0.0.1", 20.0, 100),
            unreached(2, "192.0.2.2", 700),
        ],
    )?;

    let mut table = BinTable::new(300);
    table.extend(scan_shard(ShardReader::open(&shard_file)?, &prefixes)?);
    let series = table.finalize().expect("series is populated");
    assert_eq!(series.len(), 3);

    let bin_file = dir.path().join("bins.csv");
    artifacts::write_bins(&bin_file, &series)?;

    let header = std::fs::read_to_string(&bin_file)?;
    assert!(header.starts_with(
        "bin_timestamp,num_tr,target_pfx,target_no_pfx,no_target_pfx,no_target_no_pfx,\
         target_pfx_rtt_count,target_pfx_rtt_avg,target_no_pfx_rtt_count,target_no_pfx_rtt_avg"
    ));

    let reread = artifacts::read_bins(&bin_file)?;
    assert_eq!(reread, series);
    assert_eq!(reread[0].target_pfx, 2);
    assert!((reread[0].target_pfx_rtt_avg - 15.0).abs() < f64::EPSILON);
    // The middle bin is an explicit zero row.
    assert_eq!(reread[1].num_tr, 0);
    assert_eq!(reread[2].no_target_no_pfx, 1);
    Ok(())
}

#[test]
fn shard_collection_is_sorted_and_suffix_filtered() -> Result<()> {
    let dir = tempdir()?;
    write_shard(&dir.path().join("200.jsonl.gz"), &[])?;
    write_shard(&dir.path().join("100.jsonl.gz"), &[])?;
    std::fs::write(dir.path().join("notes.txt"), "not a shard")?;

    let files = collect_shard_files(dir.path())?;
    let names: Vec<_> = files
        .iter()
        .map(|path| path.file_name().unwrap().to_string_lossy().to_string())
        .collect();
    assert_eq!(names, vec!["100.jsonl.gz", "200.jsonl.gz"]);
    Ok(())
}
