//! End-to-end runs of the orchestration state machine.

mod common;

use anyhow::Result;
use braid::core::config::{FinalAnswerPolicy, OrchestratorConfig, ParserConfig};
use braid::core::errors::{OrchestrationError, Phase, PlanAcquisitionError, StepFailure};
use braid::reasoning::{
    BufferingEventSink, CancelToken, Orchestrator, RunEvent, RunPhase, RunRequest,
};
use common::{ScriptedExecutor, SlowExecutor};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;

const EARLY_EXIT: &str = "flowchart TD
    Start[Read the number] --> Check{Is it zero?}
    Check -->|yes| Zero[Answer zero]
    Check -->|no| Divide[Divide by itself]
    Divide --> One[Answer one]";

fn orchestrator_with(executor: Arc<ScriptedExecutor>) -> Result<Orchestrator> {
    Orchestrator::builder().step_executor(executor).build()
}

/// The train plan executes in chain order and answers with the final step
#[tokio::test]
async fn test_train_plan_runs_in_order() -> Result<()> {
    common::init_tracing();
    let executor = Arc::new(ScriptedExecutor::new());
    let orchestrator = orchestrator_with(executor.clone())?;

    let result = orchestrator
        .run(RunRequest::new("If a train travels 120 km in 2 hours, what is its speed?")
            .with_diagram(common::TRAIN))
        .await?;

    assert_eq!(
        executor.visited(),
        vec!["Start", "Identify", "Formula", "Calculate", "Answer"]
    );
    assert_eq!(result.final_node, "Answer");
    assert_eq!(result.answer, result.result_of("Answer").unwrap());
    assert_eq!(result.diagram, common::TRAIN);
    assert!(result.finished_at >= result.started_at);

    // every step sees the problem and all earlier results
    let prompts = executor.prompts();
    assert!(prompts[0].starts_with("Problem: If a train travels"));
    assert!(!prompts[0].contains("Previous Steps:"));
    assert!(prompts[3].contains(
        "Previous Steps:\nStep 1 (Start): Start done\nStep 2 (Identify): Identify done\nStep 3 (Formula): Formula done"
    ));
    Ok(())
}

/// A single node plan produces a one-entry trace
#[tokio::test]
async fn test_single_node_trace() -> Result<()> {
    let orchestrator = orchestrator_with(Arc::new(ScriptedExecutor::new()))?;
    let result = orchestrator
        .run(RunRequest::new("p").with_diagram("flowchart TD\n    Only[Just answer]"))
        .await?;
    assert_eq!(result.trace.len(), 1);
    assert_eq!(result.answer, "Only done");
    Ok(())
}

/// Diamond plans execute the fork first and the join last
#[tokio::test]
async fn test_diamond_plan() -> Result<()> {
    let executor = Arc::new(ScriptedExecutor::new());
    let orchestrator = orchestrator_with(executor.clone())?;
    let result = orchestrator
        .run(RunRequest::new("p").with_diagram(common::DIAMOND))
        .await?;

    let visited = executor.visited();
    assert_eq!(visited.first().map(String::as_str), Some("Start"));
    assert_eq!(visited.last().map(String::as_str), Some("End"));
    assert_eq!(result.final_node, "End");
    Ok(())
}

/// A failing third step keeps the two results before it
#[tokio::test]
async fn test_step_failure_keeps_partial_trace() -> Result<()> {
    let executor = Arc::new(ScriptedExecutor::failing_at(2));
    let orchestrator = orchestrator_with(executor.clone())?;

    let err = orchestrator
        .run(RunRequest::new("p").with_diagram("flowchart TD\n    A --> B --> C --> D --> E"))
        .await
        .unwrap_err();

    assert_eq!(err.phase(), Phase::Executing);
    let partial: Vec<_> = err.partial_trace().iter().map(|e| e.node_id.as_str()).collect();
    assert_eq!(partial, vec!["A", "B"]);
    match err {
        OrchestrationError::StepFailed { source, .. } => {
            assert_eq!(source.node_id, "C");
            assert!(matches!(source.failure, StepFailure::Failed(_)));
        }
        other => panic!("unexpected error: {}", other),
    }
    // nothing after the failing step ran
    assert_eq!(executor.visited(), vec!["A", "B", "C"]);
    Ok(())
}

/// With several terminals the last executed step answers
#[tokio::test]
async fn test_multiple_terminals_answer_with_last_step() -> Result<()> {
    let orchestrator = orchestrator_with(Arc::new(ScriptedExecutor::new()))?;
    let result = orchestrator
        .run(RunRequest::new("p").with_diagram(EARLY_EXIT))
        .await?;

    let order: Vec<_> = result.trace.iter().map(|e| e.node_id.as_str()).collect();
    assert_eq!(order, vec!["Start", "Check", "Zero", "Divide", "One"]);
    assert_eq!(result.final_node, "One");
    Ok(())
}

/// A single terminal answers even when it does not run last
#[tokio::test]
async fn test_single_terminal_policy() -> Result<()> {
    // leniently accepted stray node runs after the terminal
    let diagram = "flowchart TD
    Start[Start] --> Answer[Answer]
    Stray[Stray note]";
    let config = |final_answer| OrchestratorConfig {
        parser: ParserConfig::lenient(),
        final_answer,
        ..Default::default()
    };

    let preferring = Orchestrator::builder()
        .config(config(FinalAnswerPolicy::PreferSingleTerminal))
        .step_executor(ScriptedExecutor::new())
        .build()?;
    let result = preferring
        .run(RunRequest::new("p").with_diagram(diagram))
        .await?;
    assert_eq!(result.trace.last().map(|e| e.node_id.as_str()), Some("Stray"));
    assert_eq!(result.final_node, "Answer");
    assert_eq!(result.answer, "Answer done");

    let last = Orchestrator::builder()
        .config(config(FinalAnswerPolicy::LastExecuted))
        .step_executor(ScriptedExecutor::new())
        .build()?;
    let result = last
        .run(RunRequest::new("p").with_diagram(diagram))
        .await?;
    assert_eq!(result.final_node, "Stray");
    Ok(())
}

/// Slow steps are cut off by the step timeout
#[tokio::test]
async fn test_step_timeout() -> Result<()> {
    let config = OrchestratorConfig {
        step_timeout_ms: Some(20),
        ..Default::default()
    };
    let orchestrator = Orchestrator::builder()
        .config(config)
        .step_executor(SlowExecutor {
            delay: Duration::from_secs(5),
        })
        .build()?;

    let err = orchestrator
        .run(RunRequest::new("p").with_diagram("flowchart TD\n    A --> B"))
        .await
        .unwrap_err();
    match err {
        OrchestrationError::StepFailed { partial, source } => {
            assert!(partial.is_empty());
            assert_eq!(source.node_id, "A");
            assert!(matches!(source.failure, StepFailure::Timeout { timeout_ms: 20 }));
        }
        other => panic!("unexpected error: {}", other),
    }
    Ok(())
}

/// Cancelling mid-run stops before the next step completes
#[tokio::test]
async fn test_cancel_during_execution() -> Result<()> {
    let orchestrator = Arc::new(
        Orchestrator::builder()
            .step_executor(SlowExecutor {
                delay: Duration::from_millis(50),
            })
            .build()?,
    );
    let cancel = CancelToken::new();

    let run = {
        let orchestrator = orchestrator.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            orchestrator
                .run_with_cancel(
                    RunRequest::new("p").with_diagram("flowchart TD\n    A --> B --> C --> D"),
                    &cancel,
                )
                .await
        })
    };

    tokio::time::sleep(Duration::from_millis(75)).await;
    cancel.cancel();

    let err = run.await?.unwrap_err();
    assert_eq!(err.phase(), Phase::Executing);
    assert!(err.partial_trace().len() < 4);
    match err {
        OrchestrationError::StepFailed { source, .. } => {
            assert!(matches!(source.failure, StepFailure::Cancelled));
        }
        other => panic!("unexpected error: {}", other),
    }
    Ok(())
}

/// Invalid plans fail in the parsing phase with the diagram attached
#[tokio::test]
async fn test_parse_failure() -> Result<()> {
    let executor = Arc::new(ScriptedExecutor::new());
    let orchestrator = orchestrator_with(executor.clone())?;
    let err = orchestrator
        .run(RunRequest::new("p").with_diagram("flowchart TD\n    A --> B\n    B --> A"))
        .await
        .unwrap_err();

    assert_eq!(err.phase(), Phase::Parsing);
    assert!(err.to_string().contains("cycle detected"));
    assert!(executor.visited().is_empty());
    Ok(())
}

/// Without a diagram or a generator the run fails while planning
#[tokio::test]
async fn test_missing_generator() -> Result<()> {
    let orchestrator = orchestrator_with(Arc::new(ScriptedExecutor::new()))?;
    let err = orchestrator.run(RunRequest::new("p")).await.unwrap_err();
    assert!(matches!(
        err,
        OrchestrationError::PlanFailed {
            source: PlanAcquisitionError::NoGenerator
        }
    ));
    Ok(())
}

/// Events trace the phases and steps of a run in sequence
#[tokio::test]
async fn test_run_events() -> Result<()> {
    let sink = BufferingEventSink::new();
    let orchestrator = Orchestrator::builder()
        .step_executor(ScriptedExecutor::new())
        .event_sink(sink.clone())
        .build()?;

    let result = orchestrator
        .run(RunRequest::new("p").with_diagram("flowchart TD\n    A --> B"))
        .await?;

    let envelopes = sink.get_events();
    let sequences: Vec<u64> = envelopes.iter().map(|e| e.sequence).collect();
    assert_eq!(sequences, (0..envelopes.len() as u64).collect::<Vec<_>>());
    assert!(envelopes.iter().all(|e| e.run_id == result.run_id));

    let events = sink.events_for(&result.run_id);
    assert_eq!(
        events,
        vec![
            RunEvent::RunStarted {
                problem: "p".into(),
                diagram_supplied: true
            },
            RunEvent::PhaseChanged {
                phase: RunPhase::Parsing
            },
            RunEvent::PhaseChanged {
                phase: RunPhase::Executing
            },
            RunEvent::StepStarted {
                node_id: "A".into(),
                position: 0,
                total: 2
            },
            RunEvent::StepCompleted {
                node_id: "A".into(),
                duration_ms: result.trace[0].duration_ms
            },
            RunEvent::StepStarted {
                node_id: "B".into(),
                position: 1,
                total: 2
            },
            RunEvent::StepCompleted {
                node_id: "B".into(),
                duration_ms: result.trace[1].duration_ms
            },
            RunEvent::PhaseChanged {
                phase: RunPhase::Finalizing
            },
            RunEvent::PhaseChanged {
                phase: RunPhase::Done
            },
            RunEvent::RunFinished {
                success: true,
                steps: 2,
                error: None
            },
        ]
    );
    Ok(())
}

/// One orchestrator serves concurrent runs with independent state
#[tokio::test]
async fn test_concurrent_runs_are_independent() -> Result<()> {
    let orchestrator = orchestrator_with(Arc::new(ScriptedExecutor::new()))?;

    let (first, second) = tokio::join!(
        orchestrator.run(RunRequest::new("one").with_diagram(common::TRAIN)),
        orchestrator.run(RunRequest::new("two").with_diagram(common::DIAMOND)),
    );
    let (first, second) = (first?, second?);

    assert_ne!(first.run_id, second.run_id);
    assert_eq!(first.trace.len(), 5);
    assert_eq!(second.trace.len(), 4);
    assert_eq!(second.problem, "two");
    Ok(())
}

/// Run results serialize for storage or transport
#[tokio::test]
async fn test_result_serializes() -> Result<()> {
    let orchestrator = orchestrator_with(Arc::new(ScriptedExecutor::new()))?;
    let result = orchestrator
        .run(RunRequest::new("p").with_diagram(common::DIAMOND))
        .await?;

    let json = serde_json::to_string(&result)?;
    let back: braid::RunResult = serde_json::from_str(&json)?;
    assert_eq!(back, result);
    Ok(())
}
