#![forbid(unsafe_code)]

use crate::ids::NodeId;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    #[serde(default)]
    pub depth: u32,
}

/// The operation that produced a child state from its parent.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[derive(Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EdgeKind {
    Advance,
    AgentCtx,
    AgentPlan,
    AgentProps,
    SceneState,
    PublicEvent,
    #[default]
    Unknown,
}

impl EdgeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Advance => "advance",
            Self::AgentCtx => "agent_ctx",
            Self::AgentPlan => "agent_plan",
            Self::AgentProps => "agent_props",
            Self::SceneState => "scene_state",
            Self::PublicEvent => "public_event",
            Self::Unknown => "unknown",
        }
    }

    pub fn parse(value: &str) -> Self {
        match value.trim() {
            "advance" => Self::Advance,
            "agent_ctx" => Self::AgentCtx,
            "agent_plan" => Self::AgentPlan,
            "agent_props" => Self::AgentProps,
            "scene_state" => Self::SceneState,
            "public_event" => Self::PublicEvent,
            _ => Self::Unknown,
        }
    }
}

impl From<String> for EdgeKind {
    fn from(value: String) -> Self {
        Self::parse(&value)
    }
}

impl From<EdgeKind> for String {
    fn from(value: EdgeKind) -> Self {
        value.as_str().to_string()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Edge {
    pub from: NodeId,
    pub to: NodeId,
    #[serde(rename = "type", default)]
    pub kind: EdgeKind,
}

impl Edge {
    pub fn new(from: NodeId, to: NodeId, kind: EdgeKind) -> Self {
        Self { from, to, kind }
    }

    pub fn touches(&self, id: NodeId) -> bool {
        self.from == id || self.to == id
    }
}

/// Point-in-time structure of one simulation tree.
///
/// `nodes`, `edges` and `running` keep arrival order; uniqueness is maintained by the
/// `*_if_absent` inserts rather than by the container type so the order the server emitted
/// stays observable.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub root: Option<NodeId>,
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub edges: Vec<Edge>,
    #[serde(default)]
    pub running: Vec<NodeId>,
}

impl Snapshot {
    pub fn single(root: NodeId, depth: u32) -> Self {
        Self {
            root: Some(root),
            nodes: vec![Node { id: root, depth }],
            edges: Vec::new(),
            running: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.iter().find(|node| node.id == id)
    }

    pub fn contains_node(&self, id: NodeId) -> bool {
        self.node(id).is_some()
    }

    pub fn is_running(&self, id: NodeId) -> bool {
        self.running.contains(&id)
    }

    pub fn parent_of(&self, id: NodeId) -> Option<NodeId> {
        self.edges.iter().find(|edge| edge.to == id).map(|edge| edge.from)
    }

    pub fn children_of(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.edges
            .iter()
            .filter(move |edge| edge.from == id)
            .map(|edge| edge.to)
    }

    pub fn is_leaf(&self, id: NodeId) -> bool {
        !self.edges.iter().any(|edge| edge.from == id)
    }

    pub fn node_ids(&self) -> BTreeSet<NodeId> {
        self.nodes.iter().map(|node| node.id).collect()
    }

    /// One-hop `from -> [to...]` index. Child lists keep edge order.
    pub fn children_index(&self) -> BTreeMap<NodeId, Vec<NodeId>> {
        let mut index: BTreeMap<NodeId, Vec<NodeId>> = BTreeMap::new();
        for edge in &self.edges {
            index.entry(edge.from).or_default().push(edge.to);
        }
        index
    }

    /// Returns `true` when the node was not present before.
    pub fn insert_node_if_absent(&mut self, node: Node) -> bool {
        if self.contains_node(node.id) {
            return false;
        }
        self.nodes.push(node);
        true
    }

    /// Returns `true` when an identical edge was not present before.
    pub fn insert_edge_if_absent(&mut self, edge: Edge) -> bool {
        if self.edges.contains(&edge) {
            return false;
        }
        self.edges.push(edge);
        true
    }

    /// Set-insert into `running`. Returns `true` when membership changed.
    pub fn mark_running(&mut self, id: NodeId) -> bool {
        if self.running.contains(&id) {
            return false;
        }
        self.running.push(id);
        true
    }

    /// Set-remove from `running`. Returns `true` when membership changed.
    pub fn clear_running(&mut self, id: NodeId) -> bool {
        let before = self.running.len();
        self.running.retain(|member| *member != id);
        self.running.len() != before
    }
}
