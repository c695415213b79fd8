//! Diagram text → [`GrdGraph`].

use std::collections::HashMap;
use tracing::{debug, warn};

use super::graph::{Diagnostic, Edge, GrdGraph, Node, Shape};
use super::syntax::{self, NodeRef, SourceLine, Statement};
use crate::core::config::{ParserConfig, Strictness};
use crate::core::errors::{GrdResult, ParseError, ValidationError};

/// Parses and validates Mermaid flowchart text. Holds no state between
/// calls, so one parser can serve concurrent runs.
#[derive(Debug, Clone, Default)]
pub struct DiagramParser {
    config: ParserConfig,
}

impl DiagramParser {
    pub fn new(config: ParserConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ParserConfig {
        &self.config
    }

    pub fn parse(&self, text: &str) -> GrdResult<GrdGraph> {
        let lines = syntax::significant_lines(text);
        let Some((header, body)) = lines.split_first() else {
            return Err(ParseError::Empty.into());
        };
        let direction = syntax::parse_header(header)?;

        let mut table = NodeTable::default();
        let mut edges = Vec::new();
        let mut skipped = Vec::new();

        for line in body {
            let statement = match syntax::scan_statement(line) {
                Ok(statement) => statement,
                Err(err) => match self.config.strictness {
                    Strictness::Strict => return Err(err.into()),
                    Strictness::Lenient => {
                        warn!(line = line.number, error = %err, "skipping unreadable diagram line");
                        skipped.push(Diagnostic::SkippedLine(err));
                        continue;
                    }
                },
            };

            let Statement::Chain { groups, links } = statement else {
                continue;
            };

            let standalone = links.is_empty();
            for group in &groups {
                for node in group {
                    table.record(node, line, standalone)?;
                }
            }

            for (i, link) in links.iter().enumerate() {
                for from in &groups[i] {
                    for to in &groups[i + 1] {
                        edges.push(Edge {
                            from: from.id.clone(),
                            to: to.id.clone(),
                            label: link.label.clone(),
                            style: link.style,
                        });
                    }
                }
            }
        }

        if !self.config.implicit_nodes {
            if let Some(edge) = edges.iter().find(|edge| {
                !table.is_declared(&edge.from) || !table.is_declared(&edge.to)
            }) {
                let id = if table.is_declared(&edge.from) {
                    &edge.to
                } else {
                    &edge.from
                };
                return Err(ValidationError::UnknownNode {
                    id: id.clone(),
                    from: edge.from.clone(),
                    to: edge.to.clone(),
                }
                .into());
            }
        }

        let nodes = table.into_nodes();
        debug!(
            nodes = nodes.len(),
            edges = edges.len(),
            "parsed diagram statements"
        );

        let graph = GrdGraph::from_parts(direction, nodes, edges, &self.config)?;
        Ok(graph.with_diagnostics(skipped))
    }

    /// Convenience check that reports only whether `text` is an executable plan.
    pub fn validate(&self, text: &str) -> GrdResult<()> {
        self.parse(text).map(|_| ())
    }

    pub fn is_valid(&self, text: &str) -> bool {
        self.parse(text).is_ok_and(|graph| graph.is_valid())
    }
}

#[derive(Debug)]
struct Declaration {
    id: String,
    shape: Option<(Shape, String)>,
    /// Declared by a shape or by a standalone statement, not only mentioned in an edge.
    declared: bool,
    line: usize,
}

impl Declaration {
    fn render(&self) -> String {
        match &self.shape {
            Some((shape, label)) => {
                let (open, close) = shape.delimiters();
                format!("{}{}{}{}", self.id, open, label, close)
            }
            None => self.id.clone(),
        }
    }
}

/// Nodes in order of first mention.
#[derive(Debug, Default)]
struct NodeTable {
    decls: Vec<Declaration>,
    index: HashMap<String, usize>,
}

impl NodeTable {
    fn record(
        &mut self,
        node: &NodeRef,
        line: &SourceLine<'_>,
        standalone: bool,
    ) -> Result<(), ParseError> {
        let declares = node.shape.is_some() || standalone;

        let Some(&at) = self.index.get(&node.id) else {
            self.index.insert(node.id.clone(), self.decls.len());
            self.decls.push(Declaration {
                id: node.id.clone(),
                shape: node.shape.clone(),
                declared: declares,
                line: line.number,
            });
            return Ok(());
        };

        let existing = &mut self.decls[at];
        existing.declared |= declares;
        let Some(shape) = &node.shape else {
            return Ok(());
        };

        if existing.shape.is_none() {
            existing.shape = Some(shape.clone());
            existing.line = line.number;
            return Ok(());
        }
        if existing.shape.as_ref() == Some(shape) {
            return Ok(());
        }

        let redeclared = Declaration {
            id: node.id.clone(),
            shape: Some(shape.clone()),
            declared: true,
            line: line.number,
        };
        Err(ParseError::ConflictingDeclaration {
            id: node.id.clone(),
            line: line.number,
            first_line: existing.line,
            first: existing.render(),
            redeclared: redeclared.render(),
        })
    }

    fn is_declared(&self, id: &str) -> bool {
        self.index
            .get(id)
            .map(|at| self.decls[*at].declared)
            .unwrap_or(false)
    }

    fn into_nodes(self) -> Vec<Node> {
        self.decls
            .into_iter()
            .map(|decl| match decl.shape {
                Some((shape, label)) if !label.is_empty() => Node::new(decl.id, label, shape),
                Some((shape, _)) => Node::new(decl.id.clone(), decl.id, shape),
                None => Node::new(decl.id.clone(), decl.id, Shape::default()),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::errors::GrdError;
    use crate::grd::graph::NodeKind;
    use pretty_assertions::assert_eq;

    #[test]
    fn inline_declarations_and_bare_mentions() {
        let graph = DiagramParser::default()
            .parse("flowchart TD\n    A[Start] --> B\n    B --> C{Done?}\n    B[Middle]")
            .unwrap();

        let labels: Vec<_> = graph.nodes().map(|n| (n.id.as_str(), n.label.as_str())).collect();
        assert_eq!(labels, vec![("A", "Start"), ("B", "Middle"), ("C", "Done?")]);
        assert_eq!(graph.node("C").map(|n| n.kind), Some(NodeKind::Terminal));
    }

    #[test]
    fn conflicting_redeclaration_names_both_lines() {
        let err = DiagramParser::default()
            .parse("flowchart TD\nA[One] --> B\nA[Two] --> C")
            .unwrap_err();
        assert_eq!(
            err,
            GrdError::Parse(ParseError::ConflictingDeclaration {
                id: "A".into(),
                line: 3,
                first_line: 2,
                first: "A[One]".into(),
                redeclared: "A[Two]".into(),
            })
        );
    }

    #[test]
    fn identical_redeclaration_is_fine() {
        assert!(DiagramParser::default()
            .parse("flowchart TD\nA[One] --> B\nA[One] --> C\nB --> C")
            .is_ok());
    }

    #[test]
    fn lenient_mode_skips_bad_lines() {
        let parser = DiagramParser::new(ParserConfig::lenient());
        let graph = parser
            .parse("flowchart TD\nA --> B\n??? what\nB --> C")
            .unwrap();
        assert_eq!(graph.execution_order(), vec!["A", "B", "C"]);
        assert_eq!(graph.diagnostics().len(), 1);
        assert!(graph.is_valid());
    }

    #[test]
    fn strict_mode_rejects_bad_lines() {
        let err = DiagramParser::default()
            .parse("flowchart TD\nA --> B\n??? what")
            .unwrap_err();
        assert_eq!(err.to_string(), "parse error: line 3: unrecognized statement `??? what`");
    }

    #[test]
    fn undeclared_endpoint_without_implicit_nodes() {
        let parser = DiagramParser::new(ParserConfig::default().with_implicit_nodes(false));
        let err = parser
            .parse("flowchart TD\nA[Start] --> B[Next]\nB --> Ghost")
            .unwrap_err();
        assert_eq!(
            err,
            GrdError::Validation(ValidationError::UnknownNode {
                id: "Ghost".into(),
                from: "B".into(),
                to: "Ghost".into(),
            })
        );
    }
}
