#![forbid(unsafe_code)]

use super::cascade::descendants_of;
use super::events::{Attached, TreeEvent};
use super::types::{Edge, Node, Snapshot};
use crate::ids::NodeId;

/// What one event did to the state.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ApplyOutcome {
    pub nodes_inserted: usize,
    pub edges_inserted: usize,
    pub nodes_removed: Vec<NodeId>,
    pub edges_removed: usize,
    pub running_changed: bool,
    /// Edge whose parent was not present; the node was recorded without it.
    pub orphan_edge: Option<Edge>,
    /// The event was well-formed but had nothing to act on.
    pub ignored: bool,
}

impl ApplyOutcome {
    /// Node or edge set changed, so any layout is out of date.
    pub fn is_structural(&self) -> bool {
        self.nodes_inserted > 0
            || self.edges_inserted > 0
            || !self.nodes_removed.is_empty()
            || self.edges_removed > 0
    }

    pub fn is_noop(&self) -> bool {
        !self.is_structural() && !self.running_changed && self.orphan_edge.is_none()
    }

    fn ignored() -> Self {
        Self {
            ignored: true,
            ..Self::default()
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Reduced {
    pub state: Option<Snapshot>,
    pub outcome: ApplyOutcome,
}

/// `(state, event) -> state`. Never fails; events that cannot apply are reported as ignored.
pub fn reduce(state: Option<Snapshot>, event: &TreeEvent) -> Reduced {
    match event {
        TreeEvent::Attached(attached) => apply_attached(state, attached),
        TreeEvent::RunStart { node } => apply_run_start(state, *node),
        TreeEvent::RunFinish { node } => apply_run_finish(state, *node),
        TreeEvent::Deleted { node } => apply_deleted(state, *node),
        TreeEvent::Unknown { .. } => Reduced {
            state,
            outcome: ApplyOutcome::ignored(),
        },
    }
}

pub fn apply_attached(state: Option<Snapshot>, event: &Attached) -> Reduced {
    let Some(mut snapshot) = state else {
        // The stream can beat the first snapshot fetch; the first attach names the root.
        let depth = event.depth.unwrap_or(0);
        return Reduced {
            state: Some(Snapshot::single(event.node, depth)),
            outcome: ApplyOutcome {
                nodes_inserted: 1,
                ..ApplyOutcome::default()
            },
        };
    };

    let mut outcome = ApplyOutcome::default();
    let parent = event.parent.filter(|parent| *parent != event.node);
    let parent_node = parent.and_then(|parent| snapshot.node(parent).copied());
    let depth = event
        .depth
        .or_else(|| parent_node.map(|p| p.depth.saturating_add(1)))
        .unwrap_or(0);

    if snapshot.insert_node_if_absent(Node {
        id: event.node,
        depth,
    }) {
        outcome.nodes_inserted = 1;
    }
    if snapshot.root.is_none() && parent.is_none() {
        snapshot.root = Some(event.node);
    }

    if let Some(parent) = parent {
        let edge = Edge::new(parent, event.node, event.edge_kind);
        if snapshot.root == Some(event.node) {
            tracing::warn!(
                node = %event.node,
                parent = %parent,
                "attached gives the root a parent; edge dropped"
            );
            outcome.ignored = outcome.nodes_inserted == 0;
        } else if let Some(existing) = snapshot.parent_of(event.node) {
            // A node has exactly one parent. Re-attaching under it is a no-op whatever the kind.
            if existing != parent {
                tracing::warn!(
                    node = %event.node,
                    parent = %parent,
                    existing = %existing,
                    "attached names a second parent; edge dropped"
                );
                outcome.ignored = true;
            }
        } else if parent_node.is_none() {
            outcome.orphan_edge = Some(edge);
        } else if descendants_of(&snapshot, event.node).contains(&parent) {
            tracing::warn!(
                node = %event.node,
                parent = %parent,
                "attached would close a cycle; edge dropped"
            );
            outcome.ignored = outcome.nodes_inserted == 0;
        } else if snapshot.insert_edge_if_absent(edge) {
            outcome.edges_inserted = 1;
        }
    }

    Reduced {
        state: Some(snapshot),
        outcome,
    }
}

pub fn apply_run_start(state: Option<Snapshot>, node: NodeId) -> Reduced {
    let Some(mut snapshot) = state else {
        return Reduced {
            state: None,
            outcome: ApplyOutcome::ignored(),
        };
    };
    // `running` stays a subset of `nodes`.
    if !snapshot.contains_node(node) {
        return Reduced {
            state: Some(snapshot),
            outcome: ApplyOutcome::ignored(),
        };
    }
    let running_changed = snapshot.mark_running(node);
    Reduced {
        state: Some(snapshot),
        outcome: ApplyOutcome {
            running_changed,
            ..ApplyOutcome::default()
        },
    }
}

pub fn apply_run_finish(state: Option<Snapshot>, node: NodeId) -> Reduced {
    let Some(mut snapshot) = state else {
        return Reduced {
            state: None,
            outcome: ApplyOutcome::ignored(),
        };
    };
    let running_changed = snapshot.clear_running(node);
    Reduced {
        state: Some(snapshot),
        outcome: ApplyOutcome {
            running_changed,
            ..ApplyOutcome::default()
        },
    }
}

pub fn apply_deleted(state: Option<Snapshot>, node: NodeId) -> Reduced {
    let Some(mut snapshot) = state else {
        return Reduced {
            state: None,
            outcome: ApplyOutcome::ignored(),
        };
    };
    if !snapshot.contains_node(node) {
        return Reduced {
            state: Some(snapshot),
            outcome: ApplyOutcome::ignored(),
        };
    }

    // Deleting the root empties the tree, including nodes still waiting for their edge.
    let removed = if snapshot.root == Some(node) {
        snapshot.node_ids()
    } else {
        descendants_of(&snapshot, node)
    };
    let running_before = snapshot.running.len();
    let edges_before = snapshot.edges.len();

    // `running` first so it is never a superset of `nodes`, even transiently.
    snapshot.running.retain(|id| !removed.contains(id));
    snapshot
        .edges
        .retain(|edge| !removed.contains(&edge.from) && !removed.contains(&edge.to));
    let mut nodes_removed = Vec::with_capacity(removed.len());
    snapshot.nodes.retain(|n| {
        if removed.contains(&n.id) {
            nodes_removed.push(n.id);
            false
        } else {
            true
        }
    });
    if snapshot.root.is_some_and(|root| removed.contains(&root)) {
        snapshot.root = None;
    }

    Reduced {
        outcome: ApplyOutcome {
            nodes_removed,
            edges_removed: edges_before - snapshot.edges.len(),
            running_changed: running_before != snapshot.running.len(),
            ..ApplyOutcome::default()
        },
        state: Some(snapshot),
    }
}
