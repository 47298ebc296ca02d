#![forbid(unsafe_code)]

use super::types::{Edge, Snapshot};
use crate::ids::NodeId;
use std::collections::BTreeSet;

/// `root` plus every node transitively reachable from it over `edges`.
///
/// Worklist + visited set: terminates even if a cycle slipped into the edge set, and does not
/// recurse, so deep chains are fine.
pub fn descendants_of(snapshot: &Snapshot, root: NodeId) -> BTreeSet<NodeId> {
    let children = snapshot.children_index();
    let mut visited = BTreeSet::new();
    let mut worklist = vec![root];
    while let Some(id) = worklist.pop() {
        if !visited.insert(id) {
            continue;
        }
        if let Some(next) = children.get(&id) {
            worklist.extend(next.iter().copied().filter(|child| !visited.contains(child)));
        }
    }
    visited
}

/// Everything a delete of `node` would take with it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeletionPlan {
    pub target: NodeId,
    pub nodes: BTreeSet<NodeId>,
    pub edges: Vec<Edge>,
    pub running: Vec<NodeId>,
    pub clears_root: bool,
}

impl DeletionPlan {
    pub fn removes(&self, id: NodeId) -> bool {
        self.nodes.contains(&id)
    }
}

/// Preview of a cascade delete. `None` when the node is not part of the tree.
pub fn plan_deletion(snapshot: &Snapshot, node: NodeId) -> Option<DeletionPlan> {
    if !snapshot.contains_node(node) {
        return None;
    }
    let clears_root = snapshot.root == Some(node);
    let nodes = if clears_root {
        snapshot.node_ids()
    } else {
        descendants_of(snapshot, node)
    };
    let edges = snapshot
        .edges
        .iter()
        .filter(|edge| nodes.contains(&edge.from) || nodes.contains(&edge.to))
        .copied()
        .collect();
    let running = snapshot
        .running
        .iter()
        .filter(|id| nodes.contains(id))
        .copied()
        .collect();
    Some(DeletionPlan {
        target: node,
        nodes,
        edges,
        running,
        clears_root,
    })
}

/// Selection after `removed` left the tree: keep it if it survived, otherwise fall back to
/// the root, otherwise nothing.
pub fn next_selection(
    selected: Option<NodeId>,
    removed: &BTreeSet<NodeId>,
    root: Option<NodeId>,
) -> Option<NodeId> {
    match selected {
        None => None,
        Some(id) if !removed.contains(&id) => Some(id),
        Some(_) => root.filter(|root| !removed.contains(root)),
    }
}
