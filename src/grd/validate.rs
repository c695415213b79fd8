//! Structural checks run while a [`GrdGraph`](super::GrdGraph) is built.

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction as Flow;
use std::collections::{HashMap, VecDeque};

use super::graph::{Edge, Node};
use crate::core::errors::ValidationError;

/// Resolves one endpoint of `edge`.
pub(super) fn endpoint(
    index: &HashMap<String, NodeIndex>,
    edge: &Edge,
    id: &str,
) -> Result<NodeIndex, ValidationError> {
    index
        .get(id)
        .copied()
        .ok_or_else(|| ValidationError::UnknownNode {
            id: id.to_string(),
            from: edge.from.clone(),
            to: edge.to.clone(),
        })
}

/// Successors of `idx` in edge declaration order. Parallel edges repeat the target.
pub(super) fn successors(graph: &DiGraph<Node, Edge>, idx: NodeIndex) -> Vec<NodeIndex> {
    let mut out: Vec<_> = graph
        .edges_directed(idx, Flow::Outgoing)
        .map(|edge| (edge.id(), edge.target()))
        .collect();
    out.sort_by_key(|(id, _)| *id);
    out.into_iter().map(|(_, target)| target).collect()
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    OnStack,
    Done,
}

/// Depth-first search in declaration order. Returns the first cycle found as
/// a path that starts and ends on the same node.
pub(super) fn find_cycle(graph: &DiGraph<Node, Edge>) -> Option<Vec<String>> {
    let mut marks = vec![Mark::Unvisited; graph.node_count()];

    for root in graph.node_indices() {
        if marks[root.index()] != Mark::Unvisited {
            continue;
        }

        // (node, its successors, next successor to visit)
        let mut stack: Vec<(NodeIndex, Vec<NodeIndex>, usize)> =
            vec![(root, successors(graph, root), 0)];
        marks[root.index()] = Mark::OnStack;

        while let Some((node, next, cursor)) = stack.last_mut() {
            let Some(&target) = next.get(*cursor) else {
                marks[node.index()] = Mark::Done;
                stack.pop();
                continue;
            };
            *cursor += 1;

            match marks[target.index()] {
                Mark::Done => {}
                Mark::OnStack => {
                    let start = stack
                        .iter()
                        .position(|(on_stack, _, _)| *on_stack == target)
                        .unwrap_or(0);
                    let mut path: Vec<String> = stack[start..]
                        .iter()
                        .map(|(idx, _, _)| graph[*idx].id.clone())
                        .collect();
                    path.push(graph[target].id.clone());
                    return Some(path);
                }
                Mark::Unvisited => {
                    marks[target.index()] = Mark::OnStack;
                    stack.push((target, successors(graph, target), 0));
                }
            }
        }
    }

    None
}

/// Entry-point and reachability defects of an acyclic graph.
///
/// The entry node is the first declared node without incoming edges. Other
/// parentless nodes either compete with it (they have successors) or are
/// stranded (no edges at all).
pub(super) fn entry_defects(graph: &DiGraph<Node, Edge>) -> Vec<ValidationError> {
    let roots: Vec<NodeIndex> = graph
        .node_indices()
        .filter(|idx| graph.edges_directed(*idx, Flow::Incoming).next().is_none())
        .collect();

    let Some((&entry, others)) = roots.split_first() else {
        return vec![ValidationError::NoEntryPoint];
    };

    let mut defects = Vec::new();
    let (competing, stranded): (Vec<NodeIndex>, Vec<NodeIndex>) = others
        .iter()
        .copied()
        .partition(|idx| graph.edges_directed(*idx, Flow::Outgoing).next().is_some());

    if !competing.is_empty() {
        let ids = std::iter::once(entry)
            .chain(competing)
            .map(|idx| graph[idx].id.clone())
            .collect();
        defects.push(ValidationError::MultipleEntryPoints { ids });
    }

    let reachable = reachable_from(graph, entry);
    for idx in stranded {
        if !reachable[idx.index()] {
            defects.push(ValidationError::Unreachable {
                id: graph[idx].id.clone(),
                entry: graph[entry].id.clone(),
            });
        }
    }

    defects
}

fn reachable_from(graph: &DiGraph<Node, Edge>, entry: NodeIndex) -> Vec<bool> {
    let mut seen = vec![false; graph.node_count()];
    let mut queue = VecDeque::from([entry]);
    seen[entry.index()] = true;
    while let Some(idx) = queue.pop_front() {
        for next in graph.neighbors_directed(idx, Flow::Outgoing) {
            if !seen[next.index()] {
                seen[next.index()] = true;
                queue.push_back(next);
            }
        }
    }
    seen
}
