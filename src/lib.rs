// Shared configuration and error types
pub mod core {
    pub mod config;
    pub mod errors;
}

pub mod grd; // diagram parsing, validation and ordering
pub mod reasoning; // plan acquisition and step-by-step execution

// Re-exports for convenience
pub use crate::core::config::{
    FinalAnswerPolicy, OrchestratorConfig, ParserConfig, Strictness, TieBreak,
};
pub use crate::core::errors::{
    GrdError, GrdResult, OrchestrationError, ParseError, Phase, PlanAcquisitionError,
    StepExecutionError, StepFailure, ValidationError,
};
pub use grd::{DiagramParser, GrdGraph, Node, NodeKind};
pub use reasoning::{
    CancelToken, Orchestrator, RunRequest, RunResult, StepExecutor, StepRequest, TraceEntry,
};
