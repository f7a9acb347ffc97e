//! Node registry
//!
//! Holds every simulated ECU in registration order. Indices are stable for
//! the lifetime of the process: nodes are never added once the simulation
//! runs, only enabled and disabled.

use std::collections::HashSet;
use std::fmt;

use crate::script::ScriptEngine;
use crate::timer::NodeTimer;

/// Stable index of a node in the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle callback queued for a node whose engine is busy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Lifecycle {
    Enable,
    Disable,
}

/// One simulated ECU
pub struct Node {
    id: NodeId,
    name: String,
    pub(crate) enabled: bool,
    pub(crate) autostart: bool,
    /// `None` while one of the node's own callbacks is running
    pub(crate) engine: Option<Box<dyn ScriptEngine>>,
    pub(crate) timer: NodeTimer,
    pub(crate) deferred: Vec<Lifecycle>,
    pub(crate) warned_missing: HashSet<&'static str>,
}

impl Node {
    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Whether configuration asked for this node to start enabled
    pub fn autostart(&self) -> bool {
        self.autostart
    }

    pub fn timer(&self) -> &NodeTimer {
        &self.timer
    }

    /// True while one of this node's callbacks is executing
    pub fn is_busy(&self) -> bool {
        self.engine.is_none()
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("enabled", &self.enabled)
            .field("timer", &self.timer)
            .finish()
    }
}

/// Ordered, index-stable collection of nodes
#[derive(Debug, Default)]
pub struct NodeRegistry {
    nodes: Vec<Node>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a node; it starts disabled regardless of `autostart`
    pub fn add(
        &mut self,
        name: impl Into<String>,
        autostart: bool,
        engine: Box<dyn ScriptEngine>,
    ) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            id,
            name: name.into(),
            enabled: false,
            autostart,
            engine: Some(engine),
            timer: NodeTimer::new(),
            deferred: Vec::new(),
            warned_missing: HashSet::new(),
        });
        id
    }

    /// Id the next registered node will get
    pub fn next_id(&self) -> NodeId {
        NodeId(self.nodes.len())
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0)
    }

    /// Panics on an id that did not come from this registry
    pub(crate) fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.0]
    }

    /// First node called `name`
    pub fn find_by_name(&self, name: &str) -> Option<NodeId> {
        self.nodes.iter().find(|n| n.name == name).map(|n| n.id)
    }

    /// All ids, in dispatch order
    pub fn ids(&self) -> impl Iterator<Item = NodeId> {
        (0..self.nodes.len()).map(NodeId)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter()
    }

    pub fn is_enabled(&self, id: NodeId) -> bool {
        self.get(id).map_or(false, |n| n.enabled)
    }

    pub fn any_enabled(&self) -> bool {
        self.nodes.iter().any(|n| n.enabled)
    }

    pub fn enabled_count(&self) -> usize {
        self.nodes.iter().filter(|n| n.enabled).count()
    }
}
