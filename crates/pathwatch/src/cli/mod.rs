pub mod classify;
pub mod fetch;
pub mod stats;
pub mod verify;

use anyhow::{Result, bail};
use atlas_pathwatch::{
    prefix::{self, MonitoredPrefixes},
    settings::Settings,
};
use std::path::Path;

/// Build the monitored-prefix set from the filter argument and optional
/// AS-to-prefixes mapping. An empty result is a configuration error and is
/// fatal before any shard work starts.
pub(crate) fn build_monitored_prefixes(
    filter: &str,
    asn_map_path: Option<&Path>,
) -> Result<MonitoredPrefixes> {
    let asn_map = asn_map_path
        .map(prefix::load_asn_prefix_map)
        .transpose()?;
    let prefixes = MonitoredPrefixes::from_filter(filter, asn_map.as_ref())?;
    if prefixes.is_empty() {
        bail!("Invalid prefix specified or no prefixes found for ASN.");
    }
    tracing::debug!("Filtering for {} prefixes:", prefixes.len());
    for pfx in prefixes.iter() {
        tracing::debug!("  {pfx}");
    }
    Ok(prefixes)
}

/// Configure the global rayon pool from settings. A worker count of 0 keeps
/// rayon's default of one thread per core.
pub(crate) fn init_worker_pool(settings: &Settings) -> Result<()> {
    if settings.workers > 0 {
        rayon::ThreadPoolBuilder::new()
            .num_threads(settings.workers)
            .build_global()?;
    }
    Ok(())
}
