#![forbid(unsafe_code)]

use super::cascade::{DeletionPlan, descendants_of, plan_deletion};
use super::events::TreeEvent;
use super::reduce::{ApplyOutcome, reduce};
use super::types::{Edge, Snapshot};
use crate::ids::NodeId;
use std::collections::BTreeMap;

const MAX_PENDING_EDGES: usize = 256;

/// Owned tree state for one tree: the reduced snapshot plus edges still waiting for their
/// parent to arrive.
///
/// All mutation goes through [`TreeStore::apply`] or [`TreeStore::replace`].
#[derive(Clone, Debug, Default)]
pub struct TreeStore {
    state: Option<Snapshot>,
    pending: BTreeMap<NodeId, Vec<Edge>>,
    needs_resync: bool,
    revision: u64,
}

impl TreeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Option<&Snapshot> {
        self.state.as_ref()
    }

    pub fn root(&self) -> Option<NodeId> {
        self.state.as_ref().and_then(|s| s.root)
    }

    pub fn has_nodes(&self) -> bool {
        self.state.as_ref().is_some_and(|s| !s.is_empty())
    }

    pub fn contains_node(&self, id: NodeId) -> bool {
        self.state.as_ref().is_some_and(|s| s.contains_node(id))
    }

    /// Bumps whenever the node or edge set changes. Layout caches key on it.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn needs_resync(&self) -> bool {
        self.needs_resync
    }

    /// Ask for a snapshot refetch, e.g. after the stream missed events.
    pub fn request_resync(&mut self) {
        self.needs_resync = true;
    }

    pub fn pending_edges(&self) -> usize {
        self.pending.values().map(Vec::len).sum()
    }

    /// Drop everything, e.g. when switching trees.
    pub fn clear(&mut self) {
        self.state = None;
        self.pending.clear();
        self.needs_resync = false;
        self.revision += 1;
    }

    /// Install a fetched snapshot wholesale. Buffered edges and the resync flag are
    /// superseded by it.
    pub fn replace(&mut self, snapshot: Snapshot) {
        let changed = self.state.as_ref() != Some(&snapshot);
        self.state = Some(snapshot);
        self.pending.clear();
        self.needs_resync = false;
        if changed {
            self.revision += 1;
        }
    }

    pub fn apply(&mut self, event: &TreeEvent) -> ApplyOutcome {
        let reduced = reduce(self.state.take(), event);
        self.state = reduced.state;
        let mut outcome = reduced.outcome;

        if let Some(edge) = outcome.orphan_edge {
            self.buffer_orphan(edge);
        }
        if let TreeEvent::Attached(attached) = event {
            outcome.edges_inserted += self.promote_pending(attached.node);
        }
        if !outcome.nodes_removed.is_empty() {
            self.forget_removed(&outcome.nodes_removed);
        }

        if outcome.is_structural() {
            self.revision += 1;
        }
        outcome
    }

    pub fn preview_delete(&self, node: NodeId) -> Option<DeletionPlan> {
        self.state.as_ref().and_then(|s| plan_deletion(s, node))
    }

    fn buffer_orphan(&mut self, edge: Edge) {
        tracing::warn!(
            node = %edge.to,
            parent = %edge.from,
            "attached references an unknown parent; edge buffered, resync requested"
        );
        self.needs_resync = true;
        if self.pending_edges() >= MAX_PENDING_EDGES {
            return;
        }
        let waiting = self.pending.entry(edge.from).or_default();
        if !waiting.contains(&edge) {
            waiting.push(edge);
        }
    }

    fn promote_pending(&mut self, parent: NodeId) -> usize {
        let Some(waiting) = self.pending.remove(&parent) else {
            return 0;
        };
        let Some(snapshot) = self.state.as_mut() else {
            return 0;
        };
        let mut promoted = 0;
        for edge in waiting {
            if !snapshot.contains_node(edge.to)
                || snapshot.root == Some(edge.to)
                || snapshot.parent_of(edge.to).is_some()
                || descendants_of(snapshot, edge.to).contains(&parent)
            {
                continue;
            }
            if snapshot.insert_edge_if_absent(edge) {
                promoted += 1;
            }
        }
        promoted
    }

    fn forget_removed(&mut self, removed: &[NodeId]) {
        for id in removed {
            self.pending.remove(id);
        }
        for waiting in self.pending.values_mut() {
            waiting.retain(|edge| !removed.contains(&edge.to));
        }
        self.pending.retain(|_, waiting| !waiting.is_empty());
    }
}
