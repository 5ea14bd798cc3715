use serde::{Deserialize, Serialize};
use std::fmt;

/// One traceroute result line as stored in a measurement shard.
///
/// Only the fields the pipeline consumes are modeled explicitly; everything
/// else is kept in `extra` so the selector can re-emit records without losing
/// information. A line that fails to deserialize into this shape is shard
/// corruption, while a missing `dst_addr` is a benign data artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TracerouteRecord {
    pub prb_id: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dst_addr: Option<String>,
    pub timestamp: i64,
    #[serde(rename = "result")]
    pub hops: Vec<Hop>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl TracerouteRecord {
    /// The (probe, destination) identity of this record, if it has a usable
    /// destination address.
    pub fn pair(&self) -> Option<PairId> {
        match &self.dst_addr {
            Some(addr) if !addr.is_empty() => Some(PairId {
                prb_id: self.prb_id,
                dst_addr: addr.clone(),
            }),
            _ => None,
        }
    }
}

/// A single hop within a traceroute. A hop either carries replies or an
/// error marker; an errored hop contributes no replies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hop {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<serde_json::Value>,
    #[serde(rename = "result", skip_serializing_if = "Option::is_none")]
    pub replies: Option<Vec<Reply>>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Hop {
    /// Replies of a non-errored hop. Errored hops and hops without a result
    /// list yield nothing.
    pub fn usable_replies(&self) -> &[Reply] {
        if self.error.is_some() {
            return &[];
        }
        self.replies.as_deref().unwrap_or(&[])
    }
}

/// One reply within a hop. Timed-out probes appear as replies without a
/// source address or RTT.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reply {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rtt: Option<f64>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// A (probe id, destination address) pair, the unit of candidacy.
///
/// Destination addresses are compared textually, exactly as they appear in
/// the measurement data. Ordering is probe id first, then address, which
/// gives the stable sort used by all artifacts.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PairId {
    pub prb_id: u64,
    pub dst_addr: String,
}

impl fmt::Display for PairId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.prb_id, self.dst_addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_round_trips_unknown_fields() {
        let line = r#"{"prb_id":1,"dst_addr":"192.0.2.1","timestamp":100,"result":[{"hop":1,"result":[{"from":"10.0.0.1","rtt":1.5,"ttl":64}]}],"msm_id":42,"af":4}"#;
        let record: TracerouteRecord = serde_json::from_str(line).unwrap();
        assert_eq!(record.prb_id, 1);
        assert_eq!(record.extra.get("msm_id"), Some(&serde_json::json!(42)));

        let emitted = serde_json::to_string(&record).unwrap();
        let reparsed: serde_json::Value = serde_json::from_str(&emitted).unwrap();
        assert_eq!(reparsed["msm_id"], 42);
        assert_eq!(reparsed["result"][0]["result"][0]["ttl"], 64);
    }

    #[test]
    fn pair_requires_destination() {
        let record: TracerouteRecord =
            serde_json::from_str(r#"{"prb_id":1,"timestamp":100,"result":[]}"#).unwrap();
        assert!(record.pair().is_none());
    }

    #[test]
    fn errored_hop_has_no_replies() {
        let hop: Hop =
            serde_json::from_str(r#"{"error":"network unreachable"}"#).unwrap();
        assert!(hop.usable_replies().is_empty());
    }
}
