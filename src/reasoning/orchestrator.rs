//! Runs a reasoning plan from problem text to final answer.
//!
//! A run moves through `Planning → Parsing → Executing → Finalizing → Done`.
//! Steps execute strictly one after another because every step sees the
//! results of all steps before it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, instrument, warn};

use super::cancel::CancelToken;
use super::context::{ExecutionContext, TraceEntry};
use super::events::{EventSink, LoggingEventSink, RunEmitter, RunEvent};
use super::planning::{PlanExample, PlanGenerator, PlanLimits, PlanRequest};
use super::step::{StepExecutor, StepRequest};
use crate::core::config::{FinalAnswerPolicy, OrchestratorConfig};
use crate::core::errors::{
    GrdResult, OrchestrationError, Phase, PlanAcquisitionError, StepExecutionError, StepFailure,
};
use crate::grd::GrdGraph;

/// Where a run is, including the states it can fail in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Planning,
    Parsing,
    Executing,
    Finalizing,
    Done,
    PlanFailed,
    ParseFailed,
    StepFailed,
    FinalizeFailed,
}

impl RunPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Done
                | Self::PlanFailed
                | Self::ParseFailed
                | Self::StepFailed
                | Self::FinalizeFailed
        )
    }

    fn failed(phase: Phase) -> Self {
        match phase {
            Phase::Planning => Self::PlanFailed,
            Phase::Parsing => Self::ParseFailed,
            Phase::Executing => Self::StepFailed,
            Phase::Finalizing => Self::FinalizeFailed,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRequest {
    pub problem: String,
    /// Plan to execute. When absent the plan generator is asked for one.
    pub diagram: Option<String>,
    /// Extra examples handed to the plan generator.
    pub examples: Vec<PlanExample>,
    /// Problem-type hint for the plan generator, such as `math`.
    pub problem_type: Option<String>,
    /// Extra planning instructions for this run only.
    pub instructions: Option<String>,
}

impl RunRequest {
    pub fn new<S: Into<String>>(problem: S) -> Self {
        Self {
            problem: problem.into(),
            ..Default::default()
        }
    }

    pub fn with_diagram<S: Into<String>>(mut self, diagram: S) -> Self {
        self.diagram = Some(diagram.into());
        self
    }

    pub fn with_examples(mut self, examples: Vec<PlanExample>) -> Self {
        self.examples = examples;
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
}

/// Outcome of a successful run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunResult {
    pub run_id: String,
    pub problem: String,
    /// Diagram text that was executed.
    pub diagram: String,
    pub answer: String,
    /// Node whose result became the answer.
    pub final_node: String,
    pub trace: Vec<TraceEntry>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunResult {
    pub fn result_of(&self, node_id: &str) -> Option<&str> {
        self.trace
            .iter()
            .find(|entry| entry.node_id == node_id)
            .map(|entry| entry.result.as_str())
    }

    pub fn duration_ms(&self) -> u64 {
        u64::try_from((self.finished_at - self.started_at).num_milliseconds()).unwrap_or_default()
    }
}

/// Drives runs. Holds only configuration and collaborators, so one instance
/// can serve many concurrent runs.
pub struct Orchestrator {
    config: OrchestratorConfig,
    limits: PlanLimits,
    executor: Arc<dyn StepExecutor>,
    generator: Option<Arc<dyn PlanGenerator>>,
    sink: Arc<dyn EventSink>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("config", &self.config)
            .field("has_generator", &self.generator.is_some())
            .finish_non_exhaustive()
    }
}

#[derive(Default)]
pub struct OrchestratorBuilder {
    config: OrchestratorConfig,
    executor: Option<Arc<dyn StepExecutor>>,
    generator: Option<Arc<dyn PlanGenerator>>,
    sink: Option<Arc<dyn EventSink>>,
}

impl OrchestratorBuilder {
    pub fn config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn step_executor<E: StepExecutor + 'static>(mut self, executor: E) -> Self {
        self.executor = Some(Arc::new(executor));
        self
    }

    pub fn plan_generator<G: PlanGenerator + 'static>(mut self, generator: G) -> Self {
        self.generator = Some(Arc::new(generator));
        self
    }

    pub fn event_sink<S: EventSink + 'static>(mut self, sink: S) -> Self {
        self.sink = Some(Arc::new(sink));
        self
    }

    pub fn build(self) -> anyhow::Result<Orchestrator> {
        self.config.validate()?;
        let executor = self
            .executor
            .ok_or_else(|| anyhow::anyhow!("orchestrator needs a step executor"))?;

        Ok(Orchestrator {
            limits: PlanLimits::from(&self.config),
            config: self.config,
            executor,
            generator: self.generator,
            sink: self.sink.unwrap_or_else(|| Arc::new(LoggingEventSink)),
        })
    }
}

enum Interrupted {
    Timeout(u64),
    Cancelled,
}

/// Awaits `fut` unless the deadline passes or the run is cancelled first.
async fn bounded<F: Future>(
    fut: F,
    timeout_ms: Option<u64>,
    cancel: &CancelToken,
) -> Result<F::Output, Interrupted> {
    let limited = async {
        match timeout_ms {
            Some(ms) => tokio::time::timeout(Duration::from_millis(ms), fut)
                .await
                .map_err(|_| Interrupted::Timeout(ms)),
            None => Ok(fut.await),
        }
    };

    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Interrupted::Cancelled),
        output = limited => output,
    }
}

impl Orchestrator {
    pub fn builder() -> OrchestratorBuilder {
        OrchestratorBuilder::default()
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Limits every plan must pass, also handed to the plan generator.
    pub fn limits(&self) -> &PlanLimits {
        &self.limits
    }

    /// Parses `diagram` and enforces the plan size limit.
    pub fn parse_plan(&self, diagram: &str) -> GrdResult<GrdGraph> {
        self.limits.check(diagram)
    }

    pub async fn run(&self, request: RunRequest) -> Result<RunResult, OrchestrationError> {
        self.run_with_cancel(request, &CancelToken::new()).await
    }

    #[instrument(skip_all, fields(run_id = tracing::field::Empty))]
    pub async fn run_with_cancel(
        &self,
        request: RunRequest,
        cancel: &CancelToken,
    ) -> Result<RunResult, OrchestrationError> {
        let run_id = cuid2::create_id();
        tracing::Span::current().record("run_id", run_id.as_str());

        let events = RunEmitter::new(run_id.clone(), self.sink.clone());
        events.emit(RunEvent::RunStarted {
            problem: request.problem.clone(),
            diagram_supplied: request.diagram.is_some(),
        });
        info!(diagram_supplied = request.diagram.is_some(), "Starting reasoning run");

        let outcome = self.drive(run_id, request, cancel, &events).await;

        match &outcome {
            Ok(result) => {
                info!(
                    steps = result.trace.len(),
                    final_node = %result.final_node,
                    "Reasoning run finished"
                );
                events.emit(RunEvent::RunFinished {
                    success: true,
                    steps: result.trace.len(),
                    error: None,
                });
            }
            Err(err) => {
                error!(phase = %err.phase(), error = %err, "Reasoning run failed");
                events.emit(RunEvent::PhaseChanged {
                    phase: RunPhase::failed(err.phase()),
                });
                events.emit(RunEvent::RunFinished {
                    success: false,
                    steps: err.partial_trace().len(),
                    error: Some(err.to_string()),
                });
            }
        }

        outcome
    }

    async fn drive(
        &self,
        run_id: String,
        request: RunRequest,
        cancel: &CancelToken,
        events: &RunEmitter,
    ) -> Result<RunResult, OrchestrationError> {
        let started_at = Utc::now();
        let RunRequest {
            problem,
            diagram,
            examples,
            problem_type,
            instructions,
        } = request;

        let diagram = match diagram {
            Some(diagram) => diagram,
            None => {
                events.emit(RunEvent::PhaseChanged {
                    phase: RunPhase::Planning,
                });
                let mut plan = PlanRequest::new(&problem)
                    .with_examples(&examples)
                    .with_limits(self.limits.clone());
                plan.problem_type = problem_type.as_deref();
                plan.instructions = instructions.as_deref();
                self.acquire_plan(&plan, cancel)
                    .await
                    .map_err(|source| OrchestrationError::PlanFailed { source })?
            }
        };

        events.emit(RunEvent::PhaseChanged {
            phase: RunPhase::Parsing,
        });
        let graph = match self.parse_plan(&diagram) {
            Ok(graph) => graph,
            Err(source) => return Err(OrchestrationError::ParseFailed { diagram, source }),
        };
        for diagnostic in graph.diagnostics() {
            warn!(%diagnostic, "Executing plan despite diagnostic");
        }
        debug!(order = ?graph.execution_order(), "Plan parsed");

        events.emit(RunEvent::PhaseChanged {
            phase: RunPhase::Executing,
        });
        let context = self.execute(&problem, &graph, cancel, events).await?;

        events.emit(RunEvent::PhaseChanged {
            phase: RunPhase::Finalizing,
        });
        let (final_node, answer) = self.final_answer(&graph, &context)?;

        events.emit(RunEvent::PhaseChanged {
            phase: RunPhase::Done,
        });
        Ok(RunResult {
            run_id,
            problem,
            diagram,
            answer,
            final_node,
            trace: context.into_trace(),
            started_at,
            finished_at: Utc::now(),
        })
    }

    async fn acquire_plan(
        &self,
        request: &PlanRequest<'_>,
        cancel: &CancelToken,
    ) -> Result<String, PlanAcquisitionError> {
        let generator = self
            .generator
            .as_ref()
            .ok_or(PlanAcquisitionError::NoGenerator)?;

        info!(problem_type = ?request.problem_type, "Requesting plan from generator");
        match bounded(
            generator.generate(request),
            self.config.plan_timeout_ms,
            cancel,
        )
        .await
        {
            Ok(result) => result,
            Err(Interrupted::Timeout(timeout_ms)) => {
                Err(PlanAcquisitionError::Timeout { timeout_ms })
            }
            Err(Interrupted::Cancelled) => Err(PlanAcquisitionError::Cancelled),
        }
    }

    async fn execute(
        &self,
        problem: &str,
        graph: &GrdGraph,
        cancel: &CancelToken,
        events: &RunEmitter,
    ) -> Result<ExecutionContext, OrchestrationError> {
        let total = graph.node_count();
        let mut context = ExecutionContext::new();

        for (position, node) in graph.ordered_nodes().enumerate() {
            events.emit(RunEvent::StepStarted {
                node_id: node.id.clone(),
                position,
                total,
            });
            info!(node_id = %node.id, step = position + 1, total, "Executing step");

            let request = StepRequest {
                problem,
                node,
                position,
                total,
                context: &context,
            };
            let started = Instant::now();
            let outcome = bounded(
                self.executor.execute(&request),
                self.config.step_timeout_ms,
                cancel,
            )
            .await;

            let failure = match outcome {
                Ok(Ok(result)) => {
                    let duration_ms = started.elapsed().as_millis() as u64;
                    events.emit(RunEvent::StepCompleted {
                        node_id: node.id.clone(),
                        duration_ms,
                    });
                    context.record(TraceEntry::new(node.id.clone(), result, duration_ms));
                    continue;
                }
                Ok(Err(err)) => StepFailure::Failed(err),
                Err(Interrupted::Timeout(timeout_ms)) => StepFailure::Timeout { timeout_ms },
                Err(Interrupted::Cancelled) => StepFailure::Cancelled,
            };

            warn!(node_id = %node.id, error = %failure, "Step failed");
            events.emit(RunEvent::StepFailed {
                node_id: node.id.clone(),
                error: failure.to_string(),
            });
            return Err(OrchestrationError::StepFailed {
                partial: context.into_trace(),
                source: StepExecutionError::new(node.id.clone(), failure),
            });
        }

        Ok(context)
    }

    /// With [`FinalAnswerPolicy::PreferSingleTerminal`] a plan with exactly
    /// one terminal node answers with that node's result. Everything else
    /// answers with the last executed step.
    fn final_answer(
        &self,
        graph: &GrdGraph,
        context: &ExecutionContext,
    ) -> Result<(String, String), OrchestrationError> {
        let terminals = graph.terminal_nodes();
        let chosen = match (self.config.final_answer, terminals.as_slice()) {
            (FinalAnswerPolicy::PreferSingleTerminal, [terminal]) => context
                .iter()
                .find(|entry| entry.node_id == terminal.id),
            _ => context.last(),
        };

        chosen
            .map(|entry| (entry.node_id.clone(), entry.result.clone()))
            .ok_or_else(|| OrchestrationError::Finalize {
                message: "no step produced a result".to_string(),
            })
    }
}
