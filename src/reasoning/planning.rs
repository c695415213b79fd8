//! Obtaining diagram text for a problem.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::core::config::{OrchestratorConfig, ParserConfig};
use crate::core::errors::{GrdResult, PlanAcquisitionError, ValidationError};
use crate::grd::{extract_diagram, DiagramParser, GrdGraph};

/// A worked problem shown to the planner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanExample {
    pub problem: String,
    pub diagram: String,
}

impl PlanExample {
    pub fn new<P: Into<String>, D: Into<String>>(problem: P, diagram: D) -> Self {
        Self {
            problem: problem.into(),
            diagram: diagram.into(),
        }
    }
}

/// What a plan has to satisfy before a run will execute it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlanLimits {
    pub parser: ParserConfig,
    /// Largest plan in nodes. Unbounded when `None`.
    pub max_steps: Option<usize>,
}

impl PlanLimits {
    /// Parses `diagram` under these limits.
    pub fn check(&self, diagram: &str) -> GrdResult<GrdGraph> {
        let graph = DiagramParser::new(self.parser.clone()).parse(diagram)?;
        match self.max_steps {
            Some(limit) if graph.node_count() > limit => Err(ValidationError::PlanTooLarge {
                nodes: graph.node_count(),
                limit,
            }
            .into()),
            _ => Ok(graph),
        }
    }
}

impl From<&OrchestratorConfig> for PlanLimits {
    fn from(config: &OrchestratorConfig) -> Self {
        Self {
            parser: config.parser.clone(),
            max_steps: config.max_steps,
        }
    }
}

/// One request for a plan. Per-request hints take precedence over whatever
/// the generator was built with.
#[derive(Debug, Clone)]
pub struct PlanRequest<'a> {
    pub problem: &'a str,
    pub examples: &'a [PlanExample],
    pub problem_type: Option<&'a str>,
    pub instructions: Option<&'a str>,
    pub limits: PlanLimits,
}

impl<'a> PlanRequest<'a> {
    pub fn new(problem: &'a str) -> Self {
        Self {
            problem,
            examples: &[],
            problem_type: None,
            instructions: None,
            limits: PlanLimits::default(),
        }
    }

    pub fn with_examples(mut self, examples: &'a [PlanExample]) -> Self {
        self.examples = examples;
        self
    }

    pub fn with_problem_type(mut self, problem_type: &'a str) -> Self {
        self.problem_type = Some(problem_type);
        self
    }

    pub fn with_instructions(mut self, instructions: &'a str) -> Self {
        self.instructions = Some(instructions);
        self
    }

    pub fn with_limits(mut self, limits: PlanLimits) -> Self {
        self.limits = limits;
        self
    }
}

/// Supplies diagram text for a problem. Implementations own their retry
/// policy and should only return plans that pass `request.limits`.
#[async_trait]
pub trait PlanGenerator: Send + Sync {
    async fn generate(&self, request: &PlanRequest<'_>) -> Result<String, PlanAcquisitionError>;
}

#[async_trait]
impl<T: PlanGenerator + ?Sized> PlanGenerator for Arc<T> {
    async fn generate(&self, request: &PlanRequest<'_>) -> Result<String, PlanAcquisitionError> {
        (**self).generate(request).await
    }
}

/// Text completion service behind [`GrdGenerator`].
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete(&self, prompt: &str) -> anyhow::Result<String>;
}

#[async_trait]
impl<T: LanguageModel + ?Sized> LanguageModel for Arc<T> {
    async fn complete(&self, prompt: &str) -> anyhow::Result<String> {
        (**self).complete(prompt).await
    }
}

const TRAIN_SPEED: &str = "```mermaid
flowchart TD
    Start[Problem Analysis] --> Identify[Identify given values:<br/>Distance = 120 km<br/>Time = 2 hours]
    Identify --> Formula[Recall speed formula:<br/>Speed = Distance / Time]
    Formula --> Calculate[Calculate:<br/>Speed = 120 / 2]
    Calculate --> Answer[Speed = 60 km/h]
```";

const LINEAR_EQUATION: &str = "```mermaid
flowchart TD
    Start[Problem Analysis] --> Identify[Identify equation:<br/>3x + 5 = 14]
    Identify --> Isolate[Isolate variable term:<br/>3x = 14 - 5]
    Isolate --> Simplify[Simplify:<br/>3x = 9]
    Simplify --> Solve[Solve for x:<br/>x = 9 / 3]
    Solve --> Answer[x = 3]
```";

const MATH_TEMPLATE: &str = "flowchart TD
    Start[Read Problem] --> Identify[Identify Given Values]
    Identify --> Formula[Recall Relevant Formula]
    Formula --> Substitute[Substitute Values]
    Substitute --> Calculate[Perform Calculation]
    Calculate --> Verify[Verify Answer]
    Verify --> Answer[Final Answer]";

const LOGIC_TEMPLATE: &str = "flowchart TD
    Start[Problem Analysis] --> Premises[Identify Premises]
    Premises --> Rules[Apply Logical Rules]
    Rules --> Deduce[Deduce Conclusion]
    Deduce --> Answer[Final Conclusion]";

const REASONING_TEMPLATE: &str = "flowchart TD
    Start[Understand Problem] --> Break[Break into Sub-problems]
    Break --> Solve[Solve Each Sub-problem]
    Solve --> Combine[Combine Solutions]
    Combine --> Answer[Final Answer]";

pub fn default_examples() -> Vec<PlanExample> {
    vec![
        PlanExample::new(
            "If a train travels 120 km in 2 hours, what is its speed?",
            TRAIN_SPEED,
        ),
        PlanExample::new("Solve: 3x + 5 = 14", LINEAR_EQUATION),
    ]
}

/// Few-shot planner: prompts a [`LanguageModel`] for a flowchart, extracts
/// it from the response and keeps asking until one validates.
pub struct GrdGenerator<M> {
    model: M,
    examples: Vec<PlanExample>,
    max_retries: u32,
    problem_type: Option<String>,
    instructions: Option<String>,
}

impl<M: LanguageModel> GrdGenerator<M> {
    pub fn new(model: M) -> Self {
        Self {
            model,
            examples: default_examples(),
            max_retries: 3,
            problem_type: None,
            instructions: None,
        }
    }

    /// Replaces the built-in examples.
    pub fn with_examples(mut self, examples: Vec<PlanExample>) -> Self {
        self.examples = examples;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_problem_type<S: Into<String>>(mut self, problem_type: S) -> Self {
        self.problem_type = Some(problem_type.into());
        self
    }

    pub fn with_instructions<S: Into<String>>(mut self, instructions: S) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    pub fn add_example<P: Into<String>, D: Into<String>>(&mut self, problem: P, diagram: D) {
        self.examples.push(PlanExample::new(problem, diagram));
    }

    pub fn examples(&self) -> &[PlanExample] {
        &self.examples
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    /// Canned diagram for `math`, `logic` or `reasoning` problems.
    pub fn template(problem_type: &str) -> Option<&'static str> {
        match problem_type.to_ascii_lowercase().as_str() {
            "math" => Some(MATH_TEMPLATE),
            "logic" => Some(LOGIC_TEMPLATE),
            "reasoning" => Some(REASONING_TEMPLATE),
            _ => None,
        }
    }

    /// Instructions, examples (own first, then the request's) and the problem.
    pub fn prompt(&self, request: &PlanRequest<'_>) -> String {
        let mut parts = vec![
            "You are an expert at creating structured reasoning diagrams.".to_string(),
            "Your task is to create a Guided Reasoning Diagram (GRD) in Mermaid flowchart format"
                .to_string(),
            "that maps out the solution steps for a given problem.".to_string(),
            String::new(),
            "The GRD should:".to_string(),
            "1. Start with problem analysis".to_string(),
            "2. Break down the solution into clear, sequential steps".to_string(),
            "3. Include decision points if the problem requires conditional logic".to_string(),
            "4. End with the final answer or conclusion".to_string(),
            String::new(),
            "Use Mermaid flowchart syntax with the following format:".to_string(),
            "```mermaid".to_string(),
            "flowchart TD".to_string(),
            "    Start[Problem Analysis] --> Step1[Step 1 Description]".to_string(),
            "    Step1 --> Step2[Step 2 Description]".to_string(),
            "    Step2 --> Answer[Final Answer]".to_string(),
            "```".to_string(),
        ];

        if let Some(problem_type) = request.problem_type.or(self.problem_type.as_deref()) {
            parts.push(format!("\nProblem Type: {}", problem_type));
        }
        if let Some(instructions) = request.instructions.or(self.instructions.as_deref()) {
            parts.push(format!("\nAdditional Instructions: {}", instructions));
        }

        parts.push("\nExamples:".to_string());
        for (i, example) in self.examples.iter().chain(request.examples).enumerate() {
            parts.push(format!("\nExample {}:", i + 1));
            parts.push(format!("Problem: {}", example.problem));
            parts.push(format!("GRD:\n{}", example.diagram));
        }

        parts.push("\n\nNow create a GRD for this problem:".to_string());
        parts.push(format!("Problem: {}", request.problem));
        parts.push("\nGenerate the Mermaid flowchart:".to_string());
        parts.join("\n")
    }
}

#[async_trait]
impl<M: LanguageModel> PlanGenerator for GrdGenerator<M> {
    async fn generate(&self, request: &PlanRequest<'_>) -> Result<String, PlanAcquisitionError> {
        let prompt = self.prompt(request);
        let attempts = self.max_retries.max(1);
        let mut last_error = PlanAcquisitionError::NoDiagram { attempts };

        for attempt in 1..=attempts {
            let response = match self.model.complete(&prompt).await {
                Ok(response) => response,
                Err(err) => {
                    warn!(attempt, error = %err, "plan generation call failed");
                    last_error = PlanAcquisitionError::Generation {
                        attempts,
                        source: err,
                    };
                    continue;
                }
            };

            let Some(diagram) = extract_diagram(&response) else {
                warn!(attempt, "no diagram found in planner response");
                last_error = PlanAcquisitionError::NoDiagram { attempts };
                continue;
            };

            match request.limits.check(&diagram) {
                Ok(_) => {
                    debug!(attempt, "planner produced a valid diagram");
                    return Ok(diagram);
                }
                Err(err) => {
                    warn!(attempt, error = %err, "planner produced an invalid diagram");
                    last_error = PlanAcquisitionError::InvalidDiagram {
                        attempts,
                        source: err,
                    };
                }
            }
        }

        Err(last_error)
    }
}
