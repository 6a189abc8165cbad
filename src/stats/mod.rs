//! Packet counters and node introspection

pub mod metrics;

pub use metrics::{Counters, NodeInfo, NodeStats};
