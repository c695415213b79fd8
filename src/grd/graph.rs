//! In-memory form of a validated Guided Reasoning Diagram.
//!
//! A [`GrdGraph`] is built exactly once, either by [`DiagramParser`](super::DiagramParser)
//! or by [`GrdGraph::from_parts`], and is immutable afterwards. Its execution
//! order is computed during construction.

use petgraph::graph::{DiGraph, EdgeIndex, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction as Flow;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

use super::{order, validate};
use crate::core::config::{ParserConfig, Strictness};
use crate::core::errors::{ParseError, ValidationError};

/// Layout direction from the diagram header. Only kept for re-serialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    TopDown,
    TopBottom,
    BottomTop,
    LeftRight,
    RightLeft,
}

impl Direction {
    pub fn from_keyword(keyword: &str) -> Option<Self> {
        match keyword.to_ascii_uppercase().as_str() {
            "TD" => Some(Self::TopDown),
            "TB" => Some(Self::TopBottom),
            "BT" => Some(Self::BottomTop),
            "LR" => Some(Self::LeftRight),
            "RL" => Some(Self::RightLeft),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TopDown => "TD",
            Self::TopBottom => "TB",
            Self::BottomTop => "BT",
            Self::LeftRight => "LR",
            Self::RightLeft => "RL",
        }
    }
}

impl Default for Direction {
    fn default() -> Self {
        Self::TopDown
    }
}

/// Node shape as written in the diagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Shape {
    Rectangle,
    Rounded,
    Stadium,
    Subroutine,
    Cylinder,
    Circle,
    DoubleCircle,
    Diamond,
    Hexagon,
    Parallelogram,
    ParallelogramAlt,
    Trapezoid,
    TrapezoidAlt,
    Asymmetric,
}

impl Shape {
    /// Opening and closing markers around the label.
    pub fn delimiters(&self) -> (&'static str, &'static str) {
        match self {
            Self::Rectangle => ("[", "]"),
            Self::Rounded => ("(", ")"),
            Self::Stadium => ("([", "])"),
            Self::Subroutine => ("[[", "]]"),
            Self::Cylinder => ("[(", ")]"),
            Self::Circle => ("((", "))"),
            Self::DoubleCircle => ("(((", ")))"),
            Self::Diamond => ("{", "}"),
            Self::Hexagon => ("{{", "}}"),
            Self::Parallelogram => ("[/", "/]"),
            Self::ParallelogramAlt => ("[\\", "\\]"),
            Self::Trapezoid => ("[/", "\\]"),
            Self::TrapezoidAlt => ("[\\", "/]"),
            Self::Asymmetric => (">", "]"),
        }
    }

    pub fn is_decision(&self) -> bool {
        matches!(self, Self::Diamond | Self::Hexagon)
    }
}

impl Default for Shape {
    fn default() -> Self {
        Self::Rectangle
    }
}

/// Role of a node, decided once when the graph is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Start,
    Intermediate,
    Decision,
    Terminal,
}

impl NodeKind {
    fn classify(shape: Shape, incoming: usize, outgoing: usize) -> Self {
        if incoming == 0 {
            Self::Start
        } else if outgoing == 0 {
            Self::Terminal
        } else if shape.is_decision() {
            Self::Decision
        } else {
            Self::Intermediate
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Start => "start",
            Self::Intermediate => "intermediate",
            Self::Decision => "decision",
            Self::Terminal => "terminal",
        };
        f.write_str(name)
    }
}

/// A reasoning step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    /// Label text exactly as it appeared between the shape markers.
    pub label: String,
    pub shape: Shape,
    pub kind: NodeKind,
    /// `key = value` / `key: value` segments found in the label.
    pub fields: BTreeMap<String, String>,
}

impl Node {
    pub fn new<I: Into<String>, L: Into<String>>(id: I, label: L, shape: Shape) -> Self {
        let label = label.into();
        let fields = extract_fields(&label);
        Self {
            id: id.into(),
            label,
            shape,
            kind: NodeKind::Intermediate,
            fields,
        }
    }

    /// Label with `<br/>` breaks turned into newlines.
    pub fn plain_label(&self) -> String {
        label_segments(&self.label).collect::<Vec<_>>().join("\n")
    }

    pub fn field(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }
}

fn label_segments(label: &str) -> impl Iterator<Item = &str> {
    label
        .split('\n')
        .flat_map(|line| line.split("<br/>"))
        .flat_map(|line| line.split("<br />"))
        .flat_map(|line| line.split("<br>"))
        .map(str::trim)
        .filter(|segment| !segment.is_empty())
}

/// Best-effort extraction of structured sub-fields from a label.
pub fn extract_fields(label: &str) -> BTreeMap<String, String> {
    let mut fields = BTreeMap::new();
    for segment in label_segments(label) {
        let split = segment
            .split_once('=')
            .or_else(|| segment.split_once(':'));
        if let Some((key, value)) = split {
            let key = key.trim();
            let value = value.trim();
            if !key.is_empty() && !value.is_empty() {
                fields.insert(key.to_string(), value.to_string());
            }
        }
    }
    fields
}

/// How an edge was drawn. Every style is a directed dependency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EdgeStyle {
    Arrow,
    Open,
    Thick,
    ThickOpen,
    Dotted,
    DottedOpen,
}

impl EdgeStyle {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Arrow => "-->",
            Self::Open => "---",
            Self::Thick => "==>",
            Self::ThickOpen => "===",
            Self::Dotted => "-.->",
            Self::DottedOpen => "-.-",
        }
    }
}

impl Default for EdgeStyle {
    fn default() -> Self {
        Self::Arrow
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    pub from: String,
    pub to: String,
    /// Branch label, e.g. `yes` / `no` out of a decision.
    pub label: Option<String>,
    pub style: EdgeStyle,
}

impl Edge {
    pub fn new<F: Into<String>, T: Into<String>>(from: F, to: T) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            label: None,
            style: EdgeStyle::Arrow,
        }
    }

    pub fn labeled<F: Into<String>, T: Into<String>, L: Into<String>>(
        from: F,
        to: T,
        label: L,
    ) -> Self {
        Self {
            label: Some(label.into()),
            ..Self::new(from, to)
        }
    }

    pub fn with_style(mut self, style: EdgeStyle) -> Self {
        self.style = style;
        self
    }
}

/// A defect that did not stop the graph from being built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Diagnostic {
    /// A line the lenient parser could not read.
    SkippedLine(ParseError),
    /// A structural defect tolerated in lenient mode.
    Structure(ValidationError),
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SkippedLine(err) => write!(f, "skipped {}", err),
            Self::Structure(err) => write!(f, "{}", err),
        }
    }
}

/// Validated diagram: nodes, edges, adjacency and execution order.
#[derive(Debug, Clone)]
pub struct GrdGraph {
    direction: Direction,
    graph: DiGraph<Node, Edge>,
    index: HashMap<String, NodeIndex>,
    order: Vec<NodeIndex>,
    diagnostics: Vec<Diagnostic>,
}

impl GrdGraph {
    /// Builds and validates a graph. Node order in `nodes` is the declaration order.
    pub fn from_parts(
        direction: Direction,
        nodes: Vec<Node>,
        edges: Vec<Edge>,
        config: &ParserConfig,
    ) -> Result<Self, ValidationError> {
        if nodes.is_empty() {
            return Err(ValidationError::EmptyGraph);
        }

        let mut graph = DiGraph::with_capacity(nodes.len(), edges.len());
        let mut index = HashMap::with_capacity(nodes.len());
        for node in nodes {
            if index.contains_key(&node.id) {
                return Err(ValidationError::DuplicateNode { id: node.id });
            }
            let id = node.id.clone();
            index.insert(id, graph.add_node(node));
        }

        for edge in edges {
            let from = validate::endpoint(&index, &edge, &edge.from)?;
            let to = validate::endpoint(&index, &edge, &edge.to)?;
            graph.add_edge(from, to, edge);
        }

        if let Some(path) = validate::find_cycle(&graph) {
            return Err(ValidationError::Cycle { path });
        }

        let mut diagnostics = Vec::new();
        for defect in validate::entry_defects(&graph) {
            match config.strictness {
                Strictness::Strict => return Err(defect),
                Strictness::Lenient => {
                    tracing::warn!(defect = %defect, "accepting structurally defective diagram");
                    diagnostics.push(Diagnostic::Structure(defect));
                }
            }
        }

        for idx in graph.node_indices() {
            let incoming = graph.edges_directed(idx, Flow::Incoming).count();
            let outgoing = graph.edges_directed(idx, Flow::Outgoing).count();
            let node = &mut graph[idx];
            node.kind = NodeKind::classify(node.shape, incoming, outgoing);
        }

        let order = order::topological_order(&graph, config.tie_break);

        Ok(Self {
            direction,
            graph,
            index,
            order,
            diagnostics,
        })
    }

    pub(crate) fn with_diagnostics(mut self, diagnostics: Vec<Diagnostic>) -> Self {
        self.diagnostics.extend(diagnostics);
        self
    }

    pub(crate) fn inner(&self) -> &DiGraph<Node, Edge> {
        &self.graph
    }

    pub(crate) fn order_indices(&self) -> &[NodeIndex] {
        &self.order
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.index.get(id).map(|idx| &self.graph[*idx])
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// Nodes in declaration order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.graph.node_weights()
    }

    /// Edges in declaration order, parallel edges included.
    pub fn edges(&self) -> impl Iterator<Item = &Edge> {
        self.graph.edge_weights()
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Node ids in the order they are executed. For every edge u → v, u comes first.
    pub fn execution_order(&self) -> Vec<&str> {
        self.order
            .iter()
            .map(|idx| self.graph[*idx].id.as_str())
            .collect()
    }

    /// Nodes in execution order.
    pub fn ordered_nodes(&self) -> impl Iterator<Item = &Node> {
        self.order.iter().map(|idx| &self.graph[*idx])
    }

    pub fn position(&self, id: &str) -> Option<usize> {
        let idx = self.index.get(id)?;
        self.order.iter().position(|candidate| candidate == idx)
    }

    pub fn outgoing(&self, id: &str) -> Vec<&Edge> {
        self.edges_of(id, Flow::Outgoing)
    }

    pub fn incoming(&self, id: &str) -> Vec<&Edge> {
        self.edges_of(id, Flow::Incoming)
    }

    pub fn successors(&self, id: &str) -> Vec<&str> {
        self.outgoing(id)
            .into_iter()
            .map(|edge| edge.to.as_str())
            .collect()
    }

    pub fn predecessors(&self, id: &str) -> Vec<&str> {
        self.incoming(id)
            .into_iter()
            .map(|edge| edge.from.as_str())
            .collect()
    }

    fn edges_of(&self, id: &str, flow: Flow) -> Vec<&Edge> {
        let Some(idx) = self.index.get(id) else {
            return Vec::new();
        };
        // petgraph walks adjacency newest-first; report declaration order instead
        let mut ids: Vec<EdgeIndex> = self
            .graph
            .edges_directed(*idx, flow)
            .map(|edge| edge.id())
            .collect();
        ids.sort();
        ids.into_iter().map(|edge| &self.graph[edge]).collect()
    }

    pub fn start_nodes(&self) -> Vec<&Node> {
        self.nodes_of_kind(NodeKind::Start)
    }

    pub fn terminal_nodes(&self) -> Vec<&Node> {
        self.nodes_of_kind(NodeKind::Terminal)
    }

    fn nodes_of_kind(&self, kind: NodeKind) -> Vec<&Node> {
        self.nodes().filter(|node| node.kind == kind).collect()
    }

    /// The single entry node, when there is exactly one.
    pub fn entry(&self) -> Option<&Node> {
        match self.start_nodes().as_slice() {
            [entry] => Some(entry),
            _ => None,
        }
    }

    /// False when lenient parsing tolerated a structural defect.
    pub fn is_valid(&self) -> bool {
        !self
            .diagnostics
            .iter()
            .any(|diagnostic| matches!(diagnostic, Diagnostic::Structure(_)))
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }
}
