use anyhow::{Context, Result};
use flate2::read::MultiGzDecoder;
use ipnet::IpNet;
use serde::Deserialize;
use std::{
    collections::{BTreeMap, BTreeSet},
    fs::File,
    io::{BufRead, BufReader, Read},
    net::IpAddr,
    path::Path,
};
use tracing::{debug, warn};

/// AS number (as decimal string) to announced prefixes.
pub type AsnPrefixMap = BTreeMap<String, Vec<String>>;

/// The set of network prefixes a run monitors. Built once from a filter
/// specification, then shared read-only by every worker.
#[derive(Debug, Clone, Default)]
pub struct MonitoredPrefixes {
    prefixes: BTreeSet<IpNet>,
}

impl MonitoredPrefixes {
    /// Build the prefix set from a filter specification.
    ///
    /// The specification is either a single IPv4/IPv6 prefix, a single AS
    /// number, or a path to a file containing a mixture of the two, one per
    /// line. ASN entries require an AS-to-prefixes mapping. Entries that
    /// cannot be resolved are logged and skipped; deciding whether an empty
    /// result is fatal is up to the caller.
    pub fn from_filter(filter: &str, asn_map: Option<&AsnPrefixMap>) -> Result<Self> {
        let path = Path::new(filter);
        let mut prefixes = BTreeSet::new();
        if path.exists() {
            debug!("Interpreting filter as file: {filter}");
            let file = File::open(path)
                .with_context(|| format!("Failed to open filter file: {filter}"))?;
            for line in BufReader::new(file).lines() {
                let line = line.context("Failed to read filter file")?;
                let entry = line.trim();
                if entry.is_empty() {
                    continue;
                }
                prefixes.extend(parse_filter_entry(entry, asn_map));
            }
        } else {
            prefixes = parse_filter_entry(filter, asn_map);
        }
        Ok(Self { prefixes })
    }

    /// True if the address falls inside at least one monitored prefix.
    pub fn contains(&self, addr: IpAddr) -> bool {
        self.prefixes.iter().any(|pfx| pfx.contains(&addr))
    }

    pub fn is_empty(&self) -> bool {
        self.prefixes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.prefixes.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &IpNet> {
        self.prefixes.iter()
    }
}

/// Parse a single filter entry into prefixes.
///
/// An all-digit entry is an AS number and is resolved through the mapping;
/// anything else must be an IPv4/IPv6 prefix (a bare address is treated as a
/// host prefix). Unresolvable entries contribute nothing.
fn parse_filter_entry(entry: &str, asn_map: Option<&AsnPrefixMap>) -> BTreeSet<IpNet> {
    if !entry.is_empty() && entry.chars().all(|c| c.is_ascii_digit()) {
        let Some(asn_map) = asn_map else {
            warn!("Filtering by ASN requires an AS-to-prefixes mapping, ignoring: {entry}");
            return BTreeSet::new();
        };
        let Some(asn_prefixes) = asn_map.get(entry) else {
            warn!("No prefixes found for AS{entry}");
            return BTreeSet::new();
        };
        return asn_prefixes
            .iter()
            .filter_map(|pfx| match parse_prefix(pfx) {
                Some(net) => Some(net),
                None => {
                    warn!("Invalid prefix in AS{entry} mapping: {pfx}");
                    None
                }
            })
            .collect();
    }
    match parse_prefix(entry) {
        Some(net) => BTreeSet::from([net]),
        None => {
            warn!("Entry is not an ASN, but also not a valid IPv4/IPv6 prefix: {entry}");
            BTreeSet::new()
        }
    }
}

fn parse_prefix(entry: &str) -> Option<IpNet> {
    if let Ok(net) = entry.parse::<IpNet>() {
        return Some(net);
    }
    // Bare addresses become host prefixes.
    entry.parse::<IpAddr>().ok().map(IpNet::from)
}

/// Load an AS-to-prefixes mapping from a JSON file, transparently handling
/// gzip-compressed files.
pub fn load_asn_prefix_map<P: AsRef<Path>>(path: P) -> Result<AsnPrefixMap> {
    let path = path.as_ref();
    debug!("Loading AS-to-prefixes mapping from {}", path.display());
    let file = File::open(path)
        .with_context(|| format!("Failed to open AS mapping file: {}", path.display()))?;
    let reader: Box<dyn Read> = if path.extension().is_some_and(|ext| ext == "gz") {
        Box::new(MultiGzDecoder::new(file))
    } else {
        Box::new(file)
    };
    let map = AsnPrefixMap::deserialize(&mut serde_json::Deserializer::from_reader(
        BufReader::new(reader),
    ))
    .with_context(|| format!("Malformed AS mapping file: {}", path.display()))?;
    debug!("Loaded prefixes for {} ASes", map.len());
    Ok(map)
}
