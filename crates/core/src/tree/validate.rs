#![forbid(unsafe_code)]

use super::types::{Edge, Snapshot};
use crate::ids::NodeId;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidateError {
    pub code: &'static str,
    pub message: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ValidateReport {
    pub nodes: usize,
    pub edges: usize,
    pub errors: Vec<ValidateError>,
}

impl ValidateReport {
    pub fn ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Structural check of the tree invariants. Collects up to `max_errors` problems.
pub fn validate_snapshot(snapshot: &Snapshot, max_errors: usize) -> ValidateReport {
    let max_errors = max_errors.max(1);
    let node_set: BTreeSet<NodeId> = snapshot.node_ids();
    let mut errors = Vec::new();
    let mut push = |code: &'static str, message: String| {
        if errors.len() < max_errors {
            errors.push(ValidateError { code, message });
        }
    };

    if snapshot.nodes.len() != node_set.len() {
        push("DUPLICATE_NODE", "nodes contains a repeated id".to_string());
    }
    match snapshot.root {
        Some(root) if !node_set.contains(&root) => {
            push("ROOT_MISSING", format!("root {root} is not in nodes"));
        }
        None if !snapshot.nodes.is_empty() => {
            push("ROOT_UNSET", "tree has nodes but no root".to_string());
        }
        _ => {}
    }

    let mut incoming: BTreeMap<NodeId, usize> = BTreeMap::new();
    for Edge { from, to, kind } in snapshot.edges.iter().copied() {
        if !node_set.contains(&from) || !node_set.contains(&to) {
            push(
                "EDGE_ENDPOINT_MISSING",
                format!("edge {from}->{to} ({}) has a missing endpoint", kind.as_str()),
            );
        }
        *incoming.entry(to).or_default() += 1;
    }
    for (node, count) in incoming {
        if Some(node) == snapshot.root {
            push("ROOT_HAS_PARENT", format!("root {node} has an incoming edge"));
        } else if count > 1 {
            push(
                "MULTIPLE_PARENTS",
                format!("node {node} has {count} incoming edges"),
            );
        }
    }

    let parents: BTreeMap<NodeId, NodeId> = snapshot
        .edges
        .iter()
        .map(|edge| (edge.to, edge.from))
        .collect();
    for &start in &node_set {
        let mut cursor = parents.get(&start).copied();
        let mut smallest = start;
        let mut steps = 0;
        while let Some(id) = cursor {
            if id == start {
                // Reported by the smallest member only.
                if smallest == start {
                    push("CYCLE", format!("node {start} is its own ancestor"));
                }
                break;
            }
            smallest = smallest.min(id);
            steps += 1;
            if steps > node_set.len() {
                break;
            }
            cursor = parents.get(&id).copied();
        }
    }

    let mut seen_running = BTreeSet::new();
    for id in &snapshot.running {
        if !node_set.contains(id) {
            push("RUNNING_NOT_IN_NODES", format!("running {id} is not in nodes"));
        }
        if !seen_running.insert(*id) {
            push("RUNNING_DUPLICATE", format!("running {id} listed twice"));
        }
    }

    ValidateReport {
        nodes: snapshot.nodes.len(),
        edges: snapshot.edges.len(),
        errors,
    }
}
