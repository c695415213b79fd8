//! Guided Reasoning Diagrams: Mermaid flowcharts whose nodes are reasoning
//! steps and whose edges are dependencies between them.

pub mod extract;
pub mod graph;
mod order;
pub mod parser;
pub mod render;
mod syntax;
mod validate;

pub use extract::extract_diagram;
pub use graph::{Diagnostic, Direction, Edge, EdgeStyle, GrdGraph, Node, NodeKind, Shape};
pub use parser::DiagramParser;
pub use render::ExecutionStep;
