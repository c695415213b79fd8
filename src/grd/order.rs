//! Deterministic execution ordering.

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction as Flow;
use std::cmp::Reverse;
use std::collections::BinaryHeap;

use super::graph::{Edge, GrdGraph, Node};
use super::validate::successors;
use crate::core::config::TieBreak;

/// Kahn's algorithm over an acyclic graph. Among ready nodes the one ranked
/// first by `tie_break` is emitted next.
pub(super) fn topological_order(graph: &DiGraph<Node, Edge>, tie_break: TieBreak) -> Vec<NodeIndex> {
    let rank = ranks(graph, tie_break);
    let mut pending: Vec<usize> = graph
        .node_indices()
        .map(|idx| graph.edges_directed(idx, Flow::Incoming).count())
        .collect();

    let mut ready: BinaryHeap<Reverse<(usize, NodeIndex)>> = graph
        .node_indices()
        .filter(|idx| pending[idx.index()] == 0)
        .map(|idx| Reverse((rank[idx.index()], idx)))
        .collect();

    let mut order = Vec::with_capacity(graph.node_count());
    while let Some(Reverse((_, idx))) = ready.pop() {
        order.push(idx);
        for next in successors(graph, idx) {
            pending[next.index()] -= 1;
            if pending[next.index()] == 0 {
                ready.push(Reverse((rank[next.index()], next)));
            }
        }
    }

    order
}

fn ranks(graph: &DiGraph<Node, Edge>, tie_break: TieBreak) -> Vec<usize> {
    match tie_break {
        TieBreak::DeclarationOrder => graph.node_indices().map(|idx| idx.index()).collect(),
        TieBreak::Lexicographic => {
            let mut sorted: Vec<NodeIndex> = graph.node_indices().collect();
            sorted.sort_by(|a, b| graph[*a].id.cmp(&graph[*b].id));
            let mut rank = vec![0; sorted.len()];
            for (position, idx) in sorted.into_iter().enumerate() {
                rank[idx.index()] = position;
            }
            rank
        }
    }
}

impl GrdGraph {
    /// Groups node ids by their longest distance from a root. Nodes in one
    /// level have no dependency on each other.
    pub fn levels(&self) -> Vec<Vec<&str>> {
        let graph = self.inner();
        let mut depth = vec![0usize; graph.node_count()];
        let mut levels: Vec<Vec<&str>> = Vec::new();

        for &idx in self.order_indices() {
            let level = graph
                .neighbors_directed(idx, Flow::Incoming)
                .map(|parent| depth[parent.index()] + 1)
                .max()
                .unwrap_or(0);
            depth[idx.index()] = level;

            while levels.len() <= level {
                levels.push(Vec::new());
            }
            levels[level].push(graph[idx].id.as_str());
        }

        levels
    }
}
