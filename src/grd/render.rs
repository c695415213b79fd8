use serde::{Deserialize, Serialize};
use std::fmt::Write as _;

use super::graph::{GrdGraph, Node, NodeKind};

/// One line of a plan listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionStep {
    pub id: String,
    pub label: String,
    pub kind: NodeKind,
    /// Successor ids in edge declaration order.
    pub next: Vec<String>,
    /// Labels of the outgoing edges that carry one.
    pub conditions: Vec<String>,
}

impl GrdGraph {
    /// Canonical flowchart text for this graph. Parsing it again gives the
    /// same nodes, edges and execution order.
    pub fn to_mermaid(&self) -> String {
        let mut out = format!("flowchart {}\n", self.direction().as_str());

        for node in self.nodes() {
            let _ = writeln!(out, "    {}", render_node(node));
        }
        for edge in self.edges() {
            let _ = match &edge.label {
                Some(label) => writeln!(
                    out,
                    "    {} {}|{}| {}",
                    edge.from,
                    edge.style.as_str(),
                    edge_label(label),
                    edge.to
                ),
                None => writeln!(out, "    {} {} {}", edge.from, edge.style.as_str(), edge.to),
            };
        }

        out
    }

    pub fn steps(&self) -> Vec<ExecutionStep> {
        self.ordered_nodes()
            .map(|node| {
                let outgoing = self.outgoing(&node.id);
                ExecutionStep {
                    id: node.id.clone(),
                    label: node.plain_label(),
                    kind: node.kind,
                    next: outgoing.iter().map(|edge| edge.to.clone()).collect(),
                    conditions: outgoing
                        .iter()
                        .filter_map(|edge| edge.label.clone())
                        .collect(),
                }
            })
            .collect()
    }
}

fn render_node(node: &Node) -> String {
    let (open, close) = node.shape.delimiters();
    let label = node.label.replace('\n', "<br/>");
    let needs_quotes = label
        .chars()
        .any(|c| matches!(c, '[' | ']' | '(' | ')' | '{' | '}' | '/' | '\\' | '>' | '"' | '|' | ';' | '%'));

    if needs_quotes {
        format!("{}{}\"{}\"{}", node.id, open, label.replace('"', "#quot;"), close)
    } else {
        format!("{}{}{}{}", node.id, open, label, close)
    }
}

fn edge_label(label: &str) -> String {
    if label.contains(|c| matches!(c, '|' | '"' | '%' | ';')) {
        format!("\"{}\"", label.replace('"', "#quot;"))
    } else {
        label.to_string()
    }
}
