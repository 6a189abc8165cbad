//! Arena-backed graph vertices
//!
//! Every [`Node`] lives in a [`Graph`] keyed by [`NodeId`]. Parent/child
//! edges are stored as id lists on both endpoints and are always updated on
//! both sides, so `a ∈ b.childs ⇔ b ∈ a.parents` holds after every call.
//!
//! Locking: each node has its own mutex and no operation ever holds two node
//! locks at once. Graph operations take a snapshot under one node's lock,
//! release it, then visit the neighbours one by one.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use serde::Serialize;

use crate::core::{Codec, HandlerFunc, Packet};

/// Process-unique node identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct NodeId(u32);

impl NodeId {
    pub fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Default)]
struct Links {
    childs: Vec<NodeId>,
    parents: Vec<NodeId>,
}

/// Hook that takes over delivery to one child
#[derive(Clone)]
pub(crate) struct Forward {
    pub(crate) target: NodeId,
    pub(crate) handler: HandlerFunc,
}

struct CloseHook {
    /// Node that registered the hook, when it may replace or withdraw it
    owner: Option<NodeId>,
    hook: Box<dyn FnOnce() + Send>,
}

struct NodeRecord {
    id: NodeId,
    codec: Codec,
    input: RwLock<Option<HandlerFunc>>,
    output: RwLock<Option<HandlerFunc>>,
    forward: RwLock<Option<Forward>>,
    links: Mutex<Links>,
    on_close: Mutex<Vec<CloseHook>>,
}

/// Registry of live nodes
pub struct Graph {
    nodes: RwLock<HashMap<NodeId, Arc<NodeRecord>>>,
    next_id: AtomicU32,
}

impl Graph {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            nodes: RwLock::new(HashMap::new()),
            next_id: AtomicU32::new(1),
        })
    }

    /// Register a new node with no handlers and no edges
    pub fn create_node(self: &Arc<Self>, codec: Codec) -> Node {
        let id = NodeId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let record = Arc::new(NodeRecord {
            id,
            codec,
            input: RwLock::new(None),
            output: RwLock::new(None),
            forward: RwLock::new(None),
            links: Mutex::new(Links::default()),
            on_close: Mutex::new(Vec::new()),
        });

        self.nodes.write().insert(id, Arc::clone(&record));
        tracing::trace!(node = %id, "Node created");

        Node {
            record,
            graph: Arc::clone(self),
        }
    }

    /// Resolve an id to a live node
    pub fn get(self: &Arc<Self>, id: NodeId) -> Option<Node> {
        let record = self.nodes.read().get(&id).cloned()?;
        Some(Node {
            record,
            graph: Arc::clone(self),
        })
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.read().contains_key(&id)
    }

    /// Number of live nodes
    pub fn len(&self) -> usize {
        self.nodes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.read().is_empty()
    }

    fn record(&self, id: NodeId) -> Option<Arc<NodeRecord>> {
        self.nodes.read().get(&id).cloned()
    }

    fn remove(&self, id: NodeId) -> bool {
        self.nodes.write().remove(&id).is_some()
    }
}

/// Handle to a graph vertex: a receiver, a sender or a transform
#[derive(Clone)]
pub struct Node {
    record: Arc<NodeRecord>,
    graph: Arc<Graph>,
}

/// Non-owning handle, used inside handlers installed on the node itself
#[derive(Clone)]
pub struct WeakNode {
    record: Weak<NodeRecord>,
    graph: Weak<Graph>,
}

impl WeakNode {
    pub fn upgrade(&self) -> Option<Node> {
        Some(Node {
            record: self.record.upgrade()?,
            graph: self.graph.upgrade()?,
        })
    }
}

impl Node {
    pub fn id(&self) -> NodeId {
        self.record.id
    }

    pub fn codec(&self) -> &Codec {
        &self.record.codec
    }

    pub fn graph(&self) -> &Arc<Graph> {
        &self.graph
    }

    pub fn downgrade(&self) -> WeakNode {
        WeakNode {
            record: Arc::downgrade(&self.record),
            graph: Arc::downgrade(&self.graph),
        }
    }

    /// Whether the node is still registered (not closed)
    pub fn is_alive(&self) -> bool {
        self.graph.contains(self.id())
    }

    pub fn set_input(&self, handler: HandlerFunc) {
        *self.record.input.write() = Some(handler);
    }

    pub fn set_output(&self, handler: HandlerFunc) {
        *self.record.output.write() = Some(handler);
    }

    /// Feed a packet into the node
    pub fn input(&self, packet: &Packet) {
        let handler = self.record.input.read().clone();
        if let Some(handler) = handler {
            handler(packet);
        }
    }

    /// Emit a packet from the node
    pub fn output(&self, packet: &Packet) {
        let handler = self.record.output.read().clone();
        if let Some(handler) = handler {
            handler(packet);
        }
    }

    /// Route packets for `target` through `handler` instead of its input
    pub fn set_forward(&self, target: NodeId, handler: HandlerFunc) {
        *self.record.forward.write() = Some(Forward { target, handler });
    }

    /// Drop the forward hook if it still points at `target`
    pub fn clear_forward(&self, target: NodeId) {
        let mut forward = self.record.forward.write();
        if forward.as_ref().is_some_and(|f| f.target == target) {
            *forward = None;
        }
    }

    pub(crate) fn forward(&self) -> Option<Forward> {
        self.record.forward.read().clone()
    }

    /// Run `hook` once when the node is closed, directly or by cascade
    pub fn on_close<F>(&self, hook: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.record.on_close.lock().push(CloseHook {
            owner: None,
            hook: Box::new(hook),
        });
    }

    /// Like [`Node::on_close`], replacing any hook `owner` registered before
    pub fn on_close_for<F>(&self, owner: NodeId, hook: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut hooks = self.record.on_close.lock();
        hooks.retain(|h| h.owner != Some(owner));
        hooks.push(CloseHook {
            owner: Some(owner),
            hook: Box::new(hook),
        });
    }

    /// Withdraw the close hook registered by `owner`
    pub fn clear_close_hook(&self, owner: NodeId) {
        self.record.on_close.lock().retain(|h| h.owner != Some(owner));
    }

    #[cfg(test)]
    pub(crate) fn close_hook_count(&self) -> usize {
        self.record.on_close.lock().len()
    }

    /// Link `self → child` and `child → self`
    ///
    /// Linking to a closed node leaves both endpoints untouched.
    pub fn append_child(&self, child: &Node) {
        {
            let mut links = self.record.links.lock();
            if !links.childs.contains(&child.id()) {
                links.childs.push(child.id());
            }
        }
        {
            let mut links = child.record.links.lock();
            if !links.parents.contains(&self.id()) {
                links.parents.push(self.id());
            }
        }

        // a close that unregistered either end before seeing the new edge
        if !self.is_alive() || !child.is_alive() {
            self.remove_child(child);
            return;
        }

        tracing::trace!(parent = %self.id(), child = %child.id(), "Edge added");
    }

    /// Attach to `parent` and return self
    pub fn with_parent(self, parent: &Node) -> Self {
        parent.append_child(&self);
        self
    }

    /// Unlink a single `self → child` edge on both endpoints
    pub fn remove_child(&self, child: &Node) {
        self.record.links.lock().childs.retain(|id| *id != child.id());
        child.record.links.lock().parents.retain(|id| *id != self.id());
    }

    /// Unlink a single `parent → self` edge on both endpoints
    pub fn remove_parent(&self, parent: &Node) {
        parent.remove_child(self);
    }

    pub fn childs(&self) -> Vec<NodeId> {
        self.record.links.lock().childs.clone()
    }

    pub fn parents(&self) -> Vec<NodeId> {
        self.record.links.lock().parents.clone()
    }

    pub fn has_child(&self, id: NodeId) -> bool {
        self.record.links.lock().childs.contains(&id)
    }

    /// Live child nodes, in link order
    pub fn child_nodes(&self) -> Vec<Node> {
        self.childs()
            .into_iter()
            .filter_map(|id| self.graph.get(id))
            .collect()
    }

    /// Tear the node out of the graph
    ///
    /// Former parents forget this node; former children forget it too and
    /// any child left without parents is closed in turn. Closing twice is a
    /// no-op.
    pub fn close(&self) {
        let id = self.id();
        // unregister first so a racing append_child sees the node as closed
        let removed = self.graph.remove(id);
        let Links { childs, parents } = std::mem::take(&mut *self.record.links.lock());

        for parent_id in parents {
            if let Some(parent) = self.graph.record(parent_id) {
                parent.links.lock().childs.retain(|c| *c != id);
            }
        }

        for child_id in childs {
            let Some(child) = self.graph.get(child_id) else {
                continue;
            };
            let orphaned = {
                let mut links = child.record.links.lock();
                links.parents.retain(|p| *p != id);
                links.parents.is_empty()
            };
            if orphaned {
                child.close();
            }
        }

        let hooks = std::mem::take(&mut *self.record.on_close.lock());
        for entry in hooks {
            (entry.hook)();
        }

        if removed {
            tracing::trace!(node = %id, "Node closed");
        }
    }
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for Node {}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id())
            .field("codec", &self.codec().to_string())
            .field("childs", &self.childs())
            .field("parents", &self.parents())
            .finish()
    }
}

/// Transplant every child of `src` onto `dst`
///
/// Each child is re-parented explicitly (edge to `src` removed, edge to `dst`
/// added) so consumers survive a producer swap without being closed.
pub fn move_node(dst: &Node, src: &Node) {
    let childs = std::mem::take(&mut src.record.links.lock().childs);

    for child_id in childs {
        let Some(child) = src.graph.get(child_id) else {
            continue;
        };
        child.record.links.lock().parents.retain(|p| *p != src.id());
        dst.append_child(&child);
    }

    tracing::debug!(src = %src.id(), dst = %dst.id(), "Children moved");
}
