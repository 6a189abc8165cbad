//! Fan-out point for a produced track

use std::fmt;
use std::sync::Arc;

use crate::core::{handler, Codec, Media, Packet};
use crate::stats::{Counters, NodeInfo, NodeStats};

use super::node::{Graph, Node};

/// Receiver of a producer's track
///
/// Every input packet is counted and handed synchronously to each child.
/// There is no queue here: a slow child stalls the producer unless a
/// [`Sender`](super::Sender) sits between them.
#[derive(Clone)]
pub struct Receiver {
    node: Node,
    media: Media,
    counters: Arc<Counters>,
}

impl Receiver {
    pub fn new(graph: &Arc<Graph>, media: Media, codec: Codec) -> Self {
        let node = graph.create_node(codec);
        let counters = Arc::new(Counters::new());

        let weak = node.downgrade();
        let stats = Arc::clone(&counters);
        node.set_input(handler(move |packet| {
            let Some(node) = weak.upgrade() else {
                return;
            };
            stats.record(packet.len());
            fan_out(&node, packet);
        }));

        Self {
            node,
            media,
            counters,
        }
    }

    pub fn node(&self) -> &Node {
        &self.node
    }

    pub fn media(&self) -> &Media {
        &self.media
    }

    pub fn codec(&self) -> &Codec {
        self.node.codec()
    }

    /// Push a packet to every child
    pub fn input(&self, packet: &Packet) {
        self.node.input(packet);
    }

    /// Attach a consumer node
    pub fn append_child(&self, child: &Node) {
        self.node.append_child(child);
    }

    /// Move all consumers of this receiver onto `target`
    pub fn replace(&self, target: &Receiver) {
        super::node::move_node(&target.node, &self.node);
    }

    pub fn stats(&self) -> NodeStats {
        self.counters.snapshot()
    }

    pub fn info(&self) -> NodeInfo {
        let stats = self.stats();
        NodeInfo {
            id: self.node.id(),
            codec: self.codec().clone(),
            parents: self.node.parents(),
            childs: self.node.childs(),
            bytes: stats.bytes,
            packets: stats.packets,
            drops: 0,
        }
    }

    pub fn close(&self) {
        self.node.close();
    }
}

impl fmt::Display for Receiver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}, bytes={}, senders={}",
            self.codec(),
            self.counters.bytes(),
            self.node.childs().len()
        )
    }
}

/// Deliver to every child of `node`, honouring its forward hook
///
/// The child list is snapshotted first so no node lock is held while
/// downstream handlers run.
pub(crate) fn fan_out(node: &Node, packet: &Packet) {
    let forward = node.forward();
    for child_id in node.childs() {
        if let Some(fwd) = &forward {
            if fwd.target == child_id {
                (fwd.handler)(packet);
                continue;
            }
        }
        if let Some(child) = node.graph().get(child_id) {
            child.input(packet);
        }
    }
}
