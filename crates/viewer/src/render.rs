#![forbid(unsafe_code)]

use simtree_core::detail::{NodeDetail, format_event};
use simtree_core::ids::NodeId;
use simtree_core::layout::{NodeClass, Position};
use simtree_core::tree::{EdgeKind, Snapshot};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;

const DETAIL_EVENTS: usize = 8;

/// Indented outline of the tree, root first, children in id order.
///
/// `*` marks running nodes and `>` the selection. Nodes with no path from the root (their
/// edge has not arrived yet) are listed separately.
pub(crate) fn render_tree(
    snapshot: &Snapshot,
    classes: &BTreeMap<NodeId, NodeClass>,
    positions: &BTreeMap<NodeId, Position>,
) -> String {
    let mut out = String::new();
    let children = snapshot.children_index();
    let mut visited = BTreeSet::new();

    let mut stack: Vec<(NodeId, usize)> = snapshot.root.map(|root| (root, 0)).into_iter().collect();
    while let Some((id, level)) = stack.pop() {
        if !visited.insert(id) {
            continue;
        }
        let kind = incoming_kind(snapshot, id);
        render_line(&mut out, snapshot, id, level, kind, classes, positions);
        if let Some(next) = children.get(&id) {
            let mut next = next.clone();
            next.sort();
            stack.extend(next.into_iter().rev().map(|child| (child, level + 1)));
        }
    }

    let detached: Vec<NodeId> = snapshot
        .nodes
        .iter()
        .map(|node| node.id)
        .filter(|id| !visited.contains(id))
        .collect();
    if !detached.is_empty() {
        out.push_str("unattached:\n");
        for id in detached {
            render_line(&mut out, snapshot, id, 1, None, classes, positions);
        }
    }
    out
}

fn incoming_kind(snapshot: &Snapshot, id: NodeId) -> Option<EdgeKind> {
    snapshot
        .edges
        .iter()
        .find(|edge| edge.to == id)
        .map(|edge| edge.kind)
}

fn render_line(
    out: &mut String,
    snapshot: &Snapshot,
    id: NodeId,
    level: usize,
    kind: Option<EdgeKind>,
    classes: &BTreeMap<NodeId, NodeClass>,
    positions: &BTreeMap<NodeId, Position>,
) {
    let class = classes.get(&id).copied().unwrap_or_default();
    let marker = match (class.selected, class.running) {
        (true, true) => ">*",
        (true, false) => "> ",
        (false, true) => " *",
        (false, false) => "  ",
    };
    let depth = snapshot.node(id).map(|node| node.depth).unwrap_or_default();
    let _ = write!(out, "{marker}{}{id} d{depth}", "  ".repeat(level));
    if let Some(kind) = kind {
        let _ = write!(out, " <{}>", kind.as_str());
    }
    if let Some(pos) = positions.get(&id) {
        let _ = write!(out, " @({:.0},{:.0})", pos.x, pos.y);
    }
    out.push('\n');
}

/// Agents and the most recent events of the selected node.
pub(crate) fn render_detail(detail: &NodeDetail) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "node {} | turns {}", detail.node, detail.turns);
    for (name, agent) in &detail.agents {
        let _ = write!(out, "  {name}");
        if !agent.role.is_empty() {
            let _ = write!(out, " ({})", agent.role);
        }
        if !agent.emotion.is_null() {
            let _ = write!(out, " feels {}", agent.emotion);
        }
        let _ = writeln!(out, " | {} memories", agent.short_memory.len());
    }
    let skip = detail.events.len().saturating_sub(DETAIL_EVENTS);
    for event in detail.events.iter().skip(skip) {
        let _ = writeln!(out, "  {}", format_event(event));
    }
    out
}

pub(crate) fn status_line(tree: &str, snapshot: Option<&Snapshot>, initializing: bool) -> String {
    let Some(snapshot) = snapshot else {
        return format!("tree {tree} | no nodes yet");
    };
    let mut line = format!(
        "tree {tree} | {} nodes | {} edges | {} running",
        snapshot.nodes.len(),
        snapshot.edges.len(),
        snapshot.running.len()
    );
    if initializing {
        line.push_str(" | initializing");
    }
    line
}
