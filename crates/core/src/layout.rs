#![forbid(unsafe_code)]

//! Layered placement of the tree for rendering.
//!
//! Ranks come from the shortest distance to a source node, order within a rank from a fixed
//! number of barycenter sweeps, coordinates from a uniform grid. Same input, same output:
//! nothing depends on hash order or randomness, so the picture only moves when the structure
//! does.

use crate::ids::NodeId;
use crate::tree::{Edge, Node, Snapshot};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, VecDeque};

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LayoutConfig {
    pub node_sep: f64,
    pub rank_sep: f64,
    pub sweeps: usize,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            node_sep: 180.0,
            rank_sep: 110.0,
            sweeps: 4,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

pub fn layout(nodes: &[Node], edges: &[Edge]) -> BTreeMap<NodeId, Position> {
    layout_with(&LayoutConfig::default(), nodes, edges)
}

pub fn layout_with(
    config: &LayoutConfig,
    nodes: &[Node],
    edges: &[Edge],
) -> BTreeMap<NodeId, Position> {
    let node_set: BTreeSet<NodeId> = nodes.iter().map(|node| node.id).collect();
    let mut succ: BTreeMap<NodeId, Vec<NodeId>> = BTreeMap::new();
    let mut pred: BTreeMap<NodeId, Vec<NodeId>> = BTreeMap::new();
    for edge in edges {
        if edge.from == edge.to
            || !node_set.contains(&edge.from)
            || !node_set.contains(&edge.to)
        {
            continue;
        }
        succ.entry(edge.from).or_default().push(edge.to);
        pred.entry(edge.to).or_default().push(edge.from);
    }
    for list in succ.values_mut() {
        list.sort_unstable();
        list.dedup();
    }

    let mut layers = assign_ranks(&node_set, &succ, &pred);
    order_layers(&mut layers, &succ, &pred, config.sweeps);

    let mut out = BTreeMap::new();
    for (rank, layer) in layers.iter().enumerate() {
        let centre = (layer.len() as f64 - 1.0) / 2.0;
        for (index, id) in layer.iter().enumerate() {
            out.insert(
                *id,
                Position {
                    x: (index as f64 - centre) * config.node_sep,
                    y: rank as f64 * config.rank_sep,
                },
            );
        }
    }
    out
}

/// BFS from every source (no incoming edge), smallest id first. Whatever is left afterwards
/// sits on a cycle; its smallest id seeds another pass.
fn assign_ranks(
    nodes: &BTreeSet<NodeId>,
    succ: &BTreeMap<NodeId, Vec<NodeId>>,
    pred: &BTreeMap<NodeId, Vec<NodeId>>,
) -> Vec<Vec<NodeId>> {
    let mut rank: BTreeMap<NodeId, usize> = BTreeMap::new();
    let mut layers: Vec<Vec<NodeId>> = Vec::new();
    let mut queue = VecDeque::new();

    let sources = nodes.iter().copied().filter(|id| !pred.contains_key(id));
    let mut seeds: Vec<NodeId> = sources.collect();
    loop {
        for seed in seeds.drain(..) {
            if rank.contains_key(&seed) {
                continue;
            }
            rank.insert(seed, 0);
            queue.push_back(seed);
        }
        while let Some(id) = queue.pop_front() {
            let r = rank[&id];
            if layers.len() <= r {
                layers.resize_with(r + 1, Vec::new);
            }
            layers[r].push(id);
            for child in succ.get(&id).map(Vec::as_slice).unwrap_or_default() {
                if !rank.contains_key(child) {
                    rank.insert(*child, r + 1);
                    queue.push_back(*child);
                }
            }
        }
        match nodes.iter().find(|id| !rank.contains_key(id)) {
            Some(next) => seeds.push(*next),
            None => break,
        }
    }
    layers
}

fn order_layers(
    layers: &mut [Vec<NodeId>],
    succ: &BTreeMap<NodeId, Vec<NodeId>>,
    pred: &BTreeMap<NodeId, Vec<NodeId>>,
    sweeps: usize,
) {
    for _ in 0..sweeps {
        for r in 1..layers.len() {
            let (above, rest) = layers.split_at_mut(r);
            reorder_by_barycenter(&mut rest[0], &above[r - 1], pred);
        }
        for r in (0..layers.len().saturating_sub(1)).rev() {
            let (head, below) = layers.split_at_mut(r + 1);
            reorder_by_barycenter(&mut head[r], &below[0], succ);
        }
    }
}

fn reorder_by_barycenter(
    layer: &mut Vec<NodeId>,
    fixed: &[NodeId],
    neighbours: &BTreeMap<NodeId, Vec<NodeId>>,
) {
    let slot: BTreeMap<NodeId, usize> = fixed.iter().enumerate().map(|(i, id)| (*id, i)).collect();
    let mut keyed: Vec<(f64, usize, NodeId)> = layer
        .iter()
        .enumerate()
        .map(|(current, id)| {
            let positions: Vec<usize> = neighbours
                .get(id)
                .map(Vec::as_slice)
                .unwrap_or_default()
                .iter()
                .filter_map(|n| slot.get(n).copied())
                .collect();
            let barycenter = if positions.is_empty() {
                // No anchor in the fixed layer: hold the current slot.
                current as f64
            } else {
                positions.iter().sum::<usize>() as f64 / positions.len() as f64
            };
            (barycenter, current, *id)
        })
        .collect();
    keyed.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)).then(a.2.cmp(&b.2)));
    *layer = keyed.into_iter().map(|(_, _, id)| id).collect();
}

/// Styling flags only; none of these affect placement.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct NodeClass {
    pub root: bool,
    pub leaf: bool,
    pub running: bool,
    pub selected: bool,
}

pub fn classify(snapshot: &Snapshot, selected: Option<NodeId>) -> BTreeMap<NodeId, NodeClass> {
    snapshot
        .nodes
        .iter()
        .map(|node| {
            let class = NodeClass {
                root: snapshot.root == Some(node.id),
                leaf: snapshot.is_leaf(node.id),
                running: snapshot.is_running(node.id),
                selected: selected == Some(node.id),
            };
            (node.id, class)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::EdgeKind;

    fn tree(edges: &[(u64, u64)]) -> (Vec<Node>, Vec<Edge>) {
        let mut ids: BTreeSet<u64> = BTreeSet::new();
        for (from, to) in edges {
            ids.insert(*from);
            ids.insert(*to);
        }
        let nodes = ids
            .into_iter()
            .map(|id| Node {
                id: NodeId(id),
                depth: 0,
            })
            .collect();
        let edges = edges
            .iter()
            .map(|(from, to)| Edge::new(NodeId(*from), NodeId(*to), EdgeKind::Advance))
            .collect();
        (nodes, edges)
    }

    #[test]
    fn children_sit_one_rank_below_parent() {
        let (nodes, edges) = tree(&[(1, 2), (1, 3), (2, 4), (3, 5), (5, 6)]);
        let positions = layout(&nodes, &edges);
        assert_eq!(positions.len(), 6);
        let rank_sep = LayoutConfig::default().rank_sep;
        for edge in &edges {
            let dy = positions[&edge.to].y - positions[&edge.from].y;
            assert_eq!(dy, rank_sep);
        }
        assert_eq!(positions[&NodeId(1)], Position { x: 0.0, y: 0.0 });
    }

    #[test]
    fn layout_is_deterministic_regardless_of_input_order() {
        let (nodes, edges) = tree(&[(1, 2), (1, 3), (2, 4), (2, 5), (3, 6)]);
        let first = layout(&nodes, &edges);

        let mut nodes_rev = nodes.clone();
        nodes_rev.reverse();
        let mut edges_rev = edges.clone();
        edges_rev.reverse();
        assert_eq!(layout(&nodes_rev, &edges_rev), first);
        assert_eq!(layout(&nodes, &edges), first);
    }

    #[test]
    fn siblings_do_not_cross_parent_order() {
        let (nodes, edges) = tree(&[(1, 2), (1, 3), (2, 4), (3, 5)]);
        let positions = layout(&nodes, &edges);
        assert!(positions[&NodeId(2)].x < positions[&NodeId(3)].x);
        assert!(positions[&NodeId(4)].x < positions[&NodeId(5)].x);
    }

    #[test]
    fn nodes_without_edges_and_cycles_still_get_placed() {
        let (mut nodes, mut edges) = tree(&[(1, 2), (3, 4), (4, 3)]);
        nodes.push(Node {
            id: NodeId(9),
            depth: 3,
        });
        edges.push(Edge::new(NodeId(2), NodeId(77), EdgeKind::Advance));
        let positions = layout(&nodes, &edges);
        assert_eq!(positions.len(), 5);
        assert_eq!(positions[&NodeId(9)].y, 0.0);
    }

    #[test]
    fn classify_marks_root_leaf_running_selected() {
        let snapshot = Snapshot {
            root: Some(NodeId(1)),
            nodes: vec![
                Node { id: NodeId(1), depth: 0 },
                Node { id: NodeId(2), depth: 1 },
            ],
            edges: vec![Edge::new(NodeId(1), NodeId(2), EdgeKind::Advance)],
            running: vec![NodeId(2)],
        };
        let classes = classify(&snapshot, Some(NodeId(2)));
        assert_eq!(
            classes[&NodeId(1)],
            NodeClass {
                root: true,
                ..NodeClass::default()
            }
        );
        assert_eq!(
            classes[&NodeId(2)],
            NodeClass {
                root: false,
                leaf: true,
                running: true,
                selected: true,
            }
        );
    }
}
