use std::fmt;
use thiserror::Error;

use crate::reasoning::context::TraceEntry;

/// Malformed diagram syntax.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("diagram text is empty")]
    Empty,

    #[error("line {line}: expected a `flowchart` or `graph` header, found `{found}`")]
    MissingHeader { line: usize, found: String },

    #[error("line {line}: only flowchart diagrams are supported, found `{kind}`")]
    UnsupportedDiagram { line: usize, kind: String },

    #[error("line {line}: unrecognized statement `{text}`")]
    UnrecognizedLine { line: usize, text: String },

    #[error("line {line}, column {column}: {message}")]
    Syntax {
        line: usize,
        column: usize,
        message: String,
    },

    #[error(
        "line {line}: node '{id}' redeclared as `{redeclared}` but line {first_line} declared it as `{first}`"
    )]
    ConflictingDeclaration {
        id: String,
        line: usize,
        first_line: usize,
        first: String,
        redeclared: String,
    },
}

impl ParseError {
    pub(crate) fn syntax<S: Into<String>>(line: usize, column: usize, message: S) -> Self {
        Self::Syntax {
            line,
            column,
            message: message.into(),
        }
    }

    /// Source line the error points at, when there is one.
    pub fn line(&self) -> Option<usize> {
        match self {
            Self::Empty => None,
            Self::MissingHeader { line, .. }
            | Self::UnsupportedDiagram { line, .. }
            | Self::UnrecognizedLine { line, .. }
            | Self::Syntax { line, .. }
            | Self::ConflictingDeclaration { line, .. } => Some(*line),
        }
    }
}

/// Well-formed diagram that does not describe an executable plan.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("diagram declares no nodes")]
    EmptyGraph,

    #[error("node '{id}' is declared more than once")]
    DuplicateNode { id: String },

    #[error("edge {from} → {to} references unknown node '{id}'")]
    UnknownNode { id: String, from: String, to: String },

    #[error("cycle detected: {}", .path.join(" → "))]
    Cycle { path: Vec<String> },

    #[error("diagram has no entry node")]
    NoEntryPoint,

    #[error("diagram has {} entry nodes ({}), expected exactly one", .ids.len(), .ids.join(", "))]
    MultipleEntryPoints { ids: Vec<String> },

    #[error("node {id} is unreachable from the entry node {entry}")]
    Unreachable { id: String, entry: String },

    #[error("plan has {nodes} steps, limit is {limit}")]
    PlanTooLarge { nodes: usize, limit: usize },
}

impl ValidationError {
    /// Node ids the defect is about.
    pub fn node_ids(&self) -> Vec<&str> {
        match self {
            Self::DuplicateNode { id }
            | Self::UnknownNode { id, .. }
            | Self::Unreachable { id, .. } => vec![id.as_str()],
            Self::Cycle { path } => path.iter().map(String::as_str).collect(),
            Self::MultipleEntryPoints { ids } => ids.iter().map(String::as_str).collect(),
            Self::EmptyGraph | Self::NoEntryPoint | Self::PlanTooLarge { .. } => Vec::new(),
        }
    }
}

/// Anything that stops diagram text from becoming a graph.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GrdError {
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),
}

pub type GrdResult<T> = std::result::Result<T, GrdError>;

/// The plan generator could not supply a usable diagram.
#[derive(Debug, Error)]
pub enum PlanAcquisitionError {
    #[error("no diagram supplied and no plan generator configured")]
    NoGenerator,

    #[error("generation failed after {attempts} attempts: {source}")]
    Generation {
        attempts: u32,
        #[source]
        source: anyhow::Error,
    },

    #[error("could not extract diagram text from the response after {attempts} attempts")]
    NoDiagram { attempts: u32 },

    #[error("generated diagram is still invalid after {attempts} attempts: {source}")]
    InvalidDiagram {
        attempts: u32,
        #[source]
        source: GrdError,
    },

    #[error("plan generation timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("plan generation was cancelled")]
    Cancelled,
}

/// Why a single step did not produce a result.
#[derive(Debug, Error)]
pub enum StepFailure {
    #[error("{0}")]
    Failed(#[source] anyhow::Error),

    #[error("timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("cancelled")]
    Cancelled,
}

#[derive(Debug, Error)]
#[error("step '{node_id}' failed: {failure}")]
pub struct StepExecutionError {
    pub node_id: String,
    #[source]
    pub failure: StepFailure,
}

impl StepExecutionError {
    pub fn new<S: Into<String>>(node_id: S, failure: StepFailure) -> Self {
        Self {
            node_id: node_id.into(),
            failure,
        }
    }
}

/// Orchestration phase a failure happened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Planning,
    Parsing,
    Executing,
    Finalizing,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Planning => "planning",
            Phase::Parsing => "parsing",
            Phase::Executing => "executing",
            Phase::Finalizing => "finalizing",
        };
        f.write_str(name)
    }
}

/// Terminal failure of an orchestration run.
#[derive(Debug, Error)]
pub enum OrchestrationError {
    #[error("{} failed: {source}", Phase::Planning)]
    PlanFailed {
        #[source]
        source: PlanAcquisitionError,
    },

    #[error("{} failed: {source}", Phase::Parsing)]
    ParseFailed {
        diagram: String,
        #[source]
        source: GrdError,
    },

    #[error("{} failed after {} completed steps: {source}", Phase::Executing, .partial.len())]
    StepFailed {
        partial: Vec<TraceEntry>,
        #[source]
        source: StepExecutionError,
    },

    #[error("{} failed: {message}", Phase::Finalizing)]
    Finalize { message: String },
}

impl OrchestrationError {
    pub fn phase(&self) -> Phase {
        match self {
            Self::PlanFailed { .. } => Phase::Planning,
            Self::ParseFailed { .. } => Phase::Parsing,
            Self::StepFailed { .. } => Phase::Executing,
            Self::Finalize { .. } => Phase::Finalizing,
        }
    }

    /// Results produced before the failing step. Empty for failures
    /// outside the execution phase.
    pub fn partial_trace(&self) -> &[TraceEntry] {
        match self {
            Self::StepFailed { partial, .. } => partial,
            _ => &[],
        }
    }

    /// The validation defect behind a parsing failure, if that is what failed.
    pub fn validation_error(&self) -> Option<&ValidationError> {
        match self {
            Self::ParseFailed {
                source: GrdError::Validation(err),
                ..
            } => Some(err),
            _ => None,
        }
    }
}
