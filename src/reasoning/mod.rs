//! Executing reasoning plans: plan acquisition, step execution and the run
//! state machine that ties them together.

pub mod cancel;
pub mod context;
pub mod events;
pub mod orchestrator;
pub mod planning;
pub mod step;

pub use cancel::CancelToken;
pub use context::{ExecutionContext, TraceEntry};
pub use events::{BufferingEventSink, EventSink, LoggingEventSink, RunEvent, RunEventEnvelope};
pub use orchestrator::{Orchestrator, OrchestratorBuilder, RunPhase, RunRequest, RunResult};
pub use planning::{
    default_examples, GrdGenerator, LanguageModel, PlanExample, PlanGenerator, PlanLimits,
    PlanRequest,
};
pub use step::{FnStepExecutor, StepExecutor, StepInput, StepRequest};
