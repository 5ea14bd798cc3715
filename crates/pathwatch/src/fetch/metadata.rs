use crate::fetch::AtlasClient;
use anyhow::{Context, Result};
use flate2::{Compression, read::MultiGzDecoder, write::GzEncoder};
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fs::File,
    io::{BufReader, BufWriter},
    path::Path,
};
use tracing::{debug, info, warn};

/// Default location of the metadata index.
pub const DEFAULT_METADATA_FILE: &str = "metadata.json.gz";

/// Measurement status id for a still-running measurement.
const STATUS_ONGOING: u8 = 2;

/// Metadata kept per measurement: enough to decide whether it can have
/// results within a time interval and which address family it belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeasurementMeta {
    pub af: u8,
    pub is_oneoff: bool,
    pub start_time: i64,
    pub stop_time: Option<i64>,
}

/// One measurement row as returned by the metadata API.
#[derive(Debug, Clone, Deserialize)]
pub struct RawMeasurement {
    pub id: u64,
    pub af: u8,
    pub is_oneoff: bool,
    pub start_time: i64,
    pub stop_time: Option<i64>,
    pub status: MeasurementStatus,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MeasurementStatus {
    pub id: u8,
    pub when: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct MeasurementPage {
    count: u64,
    next: Option<String>,
    results: Vec<RawMeasurement>,
}

/// The persistent metadata index: every known public traceroute measurement,
/// plus the highest measurement id seen so far so that refreshes only fetch
/// newer entries.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetadataIndex {
    pub last_id: u64,
    pub metadata: BTreeMap<u64, MeasurementMeta>,
}

impl MetadataIndex {
    /// Load the index from a gzipped JSON file. A missing file yields an
    /// empty index, meaning the next refresh fetches everything.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            info!("Metadata file does not exist. Fetching everything.");
            return Ok(Self::default());
        }
        info!("Loading metadata from file: {}", path.display());
        let file = File::open(path)
            .with_context(|| format!("Failed to open metadata file: {}", path.display()))?;
        let index: Self = serde_json::from_reader(MultiGzDecoder::new(BufReader::new(file)))
            .with_context(|| format!("Malformed metadata file: {}", path.display()))?;
        info!("Loaded metadata for {} measurements.", index.metadata.len());
        Ok(index)
    }

    /// Write the index to a gzipped JSON file.
    ///
    /// The data goes to a temporary sibling first and is renamed into place,
    /// so an interrupted write never leaves a half-overwritten index behind.
    pub fn store<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let tmp_path = path.with_extension("tmp");
        debug!("Writing metadata to temporary file {}", tmp_path.display());
        let file = File::create(&tmp_path)
            .with_context(|| format!("Failed to create {}", tmp_path.display()))?;
        let mut encoder = GzEncoder::new(BufWriter::new(file), Compression::default());
        serde_json::to_writer(&mut encoder, self)
            .with_context(|| format!("Failed to write metadata to {}", tmp_path.display()))?;
        encoder.finish()?;
        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("Failed to move metadata into place: {}", path.display()))?;
        info!(
            "Wrote {} metadata entries to {}",
            self.metadata.len(),
            path.display()
        );
        Ok(())
    }

    /// Merge freshly fetched measurement rows into the index and update
    /// `last_id`. Returns the number of merged entries.
    ///
    /// A measurement that is no longer running and reports an earlier system
    /// stop time has its stop time clamped to it. A re-fetched entry that
    /// differs from the stored one is logged; the fresh value wins.
    pub fn merge(&mut self, new_entries: Vec<RawMeasurement>) -> usize {
        info!("Merging {} new entries.", new_entries.len());
        let merged = new_entries.len();
        for entry in new_entries {
            let mut stop_time = entry.stop_time;
            if entry.status.id != STATUS_ONGOING {
                if let Some(when) = entry.status.when {
                    if stop_time.is_none_or(|stop| when < stop) {
                        stop_time = Some(when);
                    }
                }
            }
            let meta = MeasurementMeta {
                af: entry.af,
                is_oneoff: entry.is_oneoff,
                start_time: entry.start_time,
                stop_time,
            };
            if let Some(existing) = self.metadata.get(&entry.id) {
                if *existing != meta {
                    warn!("Metadata for measurement {} changed:", entry.id);
                    warn!("Old: {:?}", existing);
                    warn!("New: {:?}", meta);
                }
            }
            self.metadata.insert(entry.id, meta);
        }
        if let Some(max_id) = self.metadata.keys().next_back() {
            self.last_id = *max_id;
        }
        merged
    }

    /// Measurement ids (with address family) that can have results within
    /// the given interval. One-off measurements must start inside it;
    /// repeated measurements must start before its end and not stop before
    /// its start.
    pub fn filter_interval(&self, start_time: i64, stop_time: i64, af: Option<u8>) -> Vec<(u64, u8)> {
        let mut filtered = Vec::new();
        for (msm_id, meta) in &self.metadata {
            if af.is_some_and(|af| meta.af != af) {
                continue;
            }
            let active = if meta.is_oneoff {
                meta.start_time >= start_time && meta.start_time < stop_time
            } else {
                meta.start_time < stop_time
                    && meta.stop_time.is_none_or(|stop| stop > start_time)
            };
            if active {
                filtered.push((*msm_id, meta.af));
            }
        }
        info!(
            "Filtered {}/{} measurements.",
            filtered.len(),
            self.metadata.len()
        );
        filtered
    }
}

/// Refresh the metadata index from the API, fetching only measurements newer
/// than the last known id. With `overlap`, the last `overlap` known
/// measurements are fetched again to pick up status changes.
pub async fn update(
    client: &AtlasClient,
    index: &mut MetadataIndex,
    overlap: Option<usize>,
) -> Result<usize> {
    let mut last_id = index.last_id;
    if let Some(overlap) = overlap.filter(|n| *n > 0) {
        let ids: Vec<u64> = index.metadata.keys().copied().collect();
        if ids.len() >= overlap {
            last_id = ids[ids.len() - overlap];
            info!("Adjusting last measurement id by -{overlap}");
        }
    }
    info!(
        "Loaded {} existing entries. Fetching from measurement id {}",
        index.metadata.len(),
        last_id
    );

    // page_size 500 is the maximal value the API accepts; only metadata of
    // public traceroute measurements is of interest.
    let query = [
        ("page_size", "500".to_string()),
        ("format", "json".to_string()),
        ("type", "traceroute".to_string()),
        ("is_public", "true".to_string()),
        (
            "fields",
            "af,id,is_oneoff,start_time,stop_time,status".to_string(),
        ),
        ("id__gt", last_id.to_string()),
    ];

    let url = client.measurements_url();
    let mut page: MeasurementPage = client.get_json(&url, &query).await?;
    info!("Loading {} results", page.count);
    let mut new_entries = std::mem::take(&mut page.results);

    // Fetch remaining pages. A persistently failing page ends the refresh
    // early; everything fetched so far is still merged, and the next run
    // resumes from the updated last_id.
    while let Some(next) = page.next.take() {
        debug!("{next}");
        page = match client.get_json(&next, &[]).await {
            Ok(page) => page,
            Err(e) => {
                warn!("Stopping metadata refresh early: {e:#}");
                break;
            }
        };
        new_entries.extend(std::mem::take(&mut page.results));
    }

    Ok(index.merge(new_entries))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(
        id: u64,
        af: u8,
        is_oneoff: bool,
        start_time: i64,
        stop_time: Option<i64>,
        status_id: u8,
        when: Option<i64>,
    ) -> RawMeasurement {
        RawMeasurement {
            id,
            af,
            is_oneoff,
            start_time,
            stop_time,
            status: MeasurementStatus {
                id: status_id,
                when,
            },
        }
    }

    #[test]
    fn merge_clamps_stop_time_for_finished_measurements() {
        let mut index = MetadataIndex::default();
        index.merge(vec![raw(1, 4, false, 100, Some(1000), 4, Some(500))]);
        assert_eq!(index.metadata[&1].stop_time, Some(500));
        // A running measurement keeps its requested stop time.
        index.merge(vec![raw(2, 4, false, 100, Some(1000), 2, Some(500))]);
        assert_eq!(index.metadata[&2].stop_time, Some(1000));
    }

    #[test]
    fn merge_tracks_last_id() {
        let mut index = MetadataIndex::default();
        index.merge(vec![
            raw(7, 4, true, 100, None, 2, None),
            raw(3, 6, true, 100, None, 2, None),
        ]);
        assert_eq!(index.last_id, 7);
    }

    #[test]
    fn interval_filter_selects_active_measurements() {
        let mut index = MetadataIndex::default();
        index.merge(vec![
            // One-off inside the interval.
            raw(1, 4, true, 150, None, 4, None),
            // One-off before the interval.
            raw(2, 4, true, 50, None, 4, None),
            // Repeated, stopped before the interval.
            raw(3, 4, false, 10, Some(90), 4, None),
            // Repeated, still running.
            raw(4, 4, false, 10, None, 2, None),
            // Repeated, stops inside the interval.
            raw(5, 6, false, 10, Some(150), 4, None),
        ]);
        let selected = index.filter_interval(100, 200, None);
        let ids: Vec<u64> = selected.iter().map(|(id, _)| *id).collect();
        assert_eq!(ids, vec![1, 4, 5]);

        let v6_only = index.filter_interval(100, 200, Some(6));
        assert_eq!(v6_only, vec![(5, 6)]);
    }
}
