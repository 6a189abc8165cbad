//! Statistics and metrics for graph nodes

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::core::Codec;
use crate::graph::NodeId;

/// Live counters shared between a node and its handlers
#[derive(Debug)]
pub struct Counters {
    bytes: AtomicU64,
    packets: AtomicU64,
    drops: AtomicU64,
    started_at: Instant,
}

impl Counters {
    pub fn new() -> Self {
        Self {
            bytes: AtomicU64::new(0),
            packets: AtomicU64::new(0),
            drops: AtomicU64::new(0),
            started_at: Instant::now(),
        }
    }

    /// Count one packet of `len` payload bytes
    pub fn record(&self, len: usize) {
        self.bytes.fetch_add(len as u64, Ordering::Relaxed);
        self.packets.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_drop(&self) {
        self.drops.fetch_add(1, Ordering::Relaxed);
    }

    pub fn bytes(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }

    pub fn packets(&self) -> u64 {
        self.packets.load(Ordering::Relaxed)
    }

    pub fn drops(&self) -> u64 {
        self.drops.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> NodeStats {
        NodeStats {
            bytes: self.bytes(),
            packets: self.packets(),
            drops: self.drops(),
            duration: self.started_at.elapsed(),
        }
    }
}

impl Default for Counters {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of a node's counters
#[derive(Debug, Clone, Default)]
pub struct NodeStats {
    /// Total payload bytes
    pub bytes: u64,
    /// Total packets
    pub packets: u64,
    /// Packets dropped on a full buffer
    pub drops: u64,
    /// Time since the node was created
    pub duration: Duration,
}

/// Serializable view of a node for API listings
#[derive(Debug, Clone, Serialize)]
pub struct NodeInfo {
    pub id: NodeId,
    pub codec: Codec,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub parents: Vec<NodeId>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub childs: Vec<NodeId>,
    #[serde(skip_serializing_if = "is_zero")]
    pub bytes: u64,
    #[serde(skip_serializing_if = "is_zero")]
    pub packets: u64,
    #[serde(skip_serializing_if = "is_zero")]
    pub drops: u64,
}

fn is_zero(v: &u64) -> bool {
    *v == 0
}

impl NodeInfo {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

impl fmt::Display for NodeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}, bytes={}", self.codec, self.bytes)?;
        if !self.childs.is_empty() {
            write!(f, ", childs={}", self.childs.len())?;
        }
        if !self.parents.is_empty() {
            write!(f, ", parents={}", self.parents.len())?;
        }
        if self.drops > 0 {
            write!(f, ", drops={}", self.drops)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Graph;

    #[test]
    fn test_counters_new() {
        let counters = Counters::new();
        assert_eq!(counters.bytes(), 0);
        assert_eq!(counters.packets(), 0);
        assert_eq!(counters.drops(), 0);
    }

    #[test]
    fn test_counters_record() {
        let counters = Counters::new();
        counters.record(100);
        counters.record(50);
        counters.record_drop();

        let stats = counters.snapshot();
        assert_eq!(stats.bytes, 150);
        assert_eq!(stats.packets, 2);
        assert_eq!(stats.drops, 1);
    }

    #[test]
    fn test_node_info_json_and_display() {
        let graph = Graph::new();
        let a = graph.create_node(Codec::new("OPUS", 48_000, 111).with_channels(2));

        let info = NodeInfo {
            id: a.id(),
            codec: a.codec().clone(),
            parents: vec![],
            childs: vec![a.id()],
            bytes: 42,
            packets: 1,
            drops: 0,
        };

        let json = info.to_json().unwrap();
        assert!(json.contains(r#""childs":[1]"#));
        assert!(!json.contains("parents"));
        assert!(!json.contains("drops"));
        assert_eq!(info.to_string(), "OPUS/48000/2, bytes=42, childs=1");
    }
}
