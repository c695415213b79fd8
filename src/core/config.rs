use anyhow::{anyhow, Error, Result};
use serde::{Deserialize, Serialize};

/// How the parser treats recoverable defects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strictness {
    /// Unrecognized lines, extra entry nodes and unreachable nodes are errors.
    Strict,
    /// Those defects are logged and recorded as diagnostics on the graph.
    Lenient,
}

/// Which ready node goes first when several have no ordering between them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TieBreak {
    /// Earliest first appearance in the diagram text.
    DeclarationOrder,
    /// Smallest id by byte order.
    Lexicographic,
}

/// Which step result becomes the final answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinalAnswerPolicy {
    /// The terminal node's result when the graph has exactly one terminal
    /// node, otherwise the last executed node's result.
    PreferSingleTerminal,
    /// Always the last executed node's result.
    LastExecuted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParserConfig {
    pub strictness: Strictness,
    pub tie_break: TieBreak,
    /// Whether an edge may introduce a node that is never declared on its own.
    pub implicit_nodes: bool,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            strictness: Strictness::Strict,
            tie_break: TieBreak::DeclarationOrder,
            implicit_nodes: true,
        }
    }
}

impl ParserConfig {
    pub fn lenient() -> Self {
        Self {
            strictness: Strictness::Lenient,
            ..Self::default()
        }
    }

    pub fn with_tie_break(mut self, tie_break: TieBreak) -> Self {
        self.tie_break = tie_break;
        self
    }

    pub fn with_implicit_nodes(mut self, implicit_nodes: bool) -> Self {
        self.implicit_nodes = implicit_nodes;
        self
    }
}

/// Configuration for orchestration runs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub parser: ParserConfig,
    pub final_answer: FinalAnswerPolicy,
    /// Largest plan (in nodes) a run will execute
    pub max_steps: Option<usize>,
    /// Bound on a single plan generation call
    pub plan_timeout_ms: Option<u64>,
    /// Bound on a single step execution call
    pub step_timeout_ms: Option<u64>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            parser: ParserConfig::default(),
            final_answer: FinalAnswerPolicy::PreferSingleTerminal,
            max_steps: Some(20),
            plan_timeout_ms: None,
            step_timeout_ms: None,
        }
    }
}

impl OrchestratorConfig {
    /// Reads a configuration document; absent fields keep their defaults.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validates configuration values
    pub fn validate(&self) -> Result<(), Error> {
        if self.max_steps == Some(0) {
            return Err(anyhow!("max_steps must be greater than 0"));
        }
        if self.plan_timeout_ms == Some(0) {
            return Err(anyhow!("plan_timeout_ms must be greater than 0"));
        }
        if self.step_timeout_ms == Some(0) {
            return Err(anyhow!("step_timeout_ms must be greater than 0"));
        }
        Ok(())
    }
}
