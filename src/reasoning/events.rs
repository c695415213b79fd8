//! Progress events emitted while a run advances.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::orchestrator::RunPhase;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum RunEvent {
    RunStarted {
        problem: String,
        diagram_supplied: bool,
    },
    PhaseChanged {
        phase: RunPhase,
    },
    StepStarted {
        node_id: String,
        position: usize,
        total: usize,
    },
    StepCompleted {
        node_id: String,
        duration_ms: u64,
    },
    StepFailed {
        node_id: String,
        error: String,
    },
    RunFinished {
        success: bool,
        steps: usize,
        error: Option<String>,
    },
}

/// Event with the run it belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunEventEnvelope {
    pub run_id: String,
    /// Starts at 0 for every run.
    pub sequence: u64,
    pub timestamp: u64,
    pub event: RunEvent,
}

/// Receives run events. Called inline, so implementations should not block.
pub trait EventSink: Send + Sync {
    fn emit(&self, envelope: &RunEventEnvelope);
}

/// Forwards events to `tracing` at debug level.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingEventSink;

impl EventSink for LoggingEventSink {
    fn emit(&self, envelope: &RunEventEnvelope) {
        tracing::debug!(
            run_id = %envelope.run_id,
            sequence = envelope.sequence,
            "Event: {:?}",
            envelope.event
        );
    }
}

/// Keeps every event in memory.
#[derive(Debug, Default, Clone)]
pub struct BufferingEventSink {
    events: Arc<parking_lot::RwLock<Vec<RunEventEnvelope>>>,
}

impl BufferingEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_events(&self) -> Vec<RunEventEnvelope> {
        self.events.read().clone()
    }

    /// Events of one run, in emission order.
    pub fn events_for(&self, run_id: &str) -> Vec<RunEvent> {
        self.events
            .read()
            .iter()
            .filter(|envelope| envelope.run_id == run_id)
            .map(|envelope| envelope.event.clone())
            .collect()
    }

    pub fn clear(&self) {
        self.events.write().clear();
    }
}

impl EventSink for BufferingEventSink {
    fn emit(&self, envelope: &RunEventEnvelope) {
        self.events.write().push(envelope.clone());
    }
}

pub(crate) fn now_ms() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or_default()
}

/// Stamps events of a single run with its id and sequence.
pub(crate) struct RunEmitter {
    run_id: String,
    sequence: AtomicU64,
    sink: Arc<dyn EventSink>,
}

impl RunEmitter {
    pub(crate) fn new(run_id: String, sink: Arc<dyn EventSink>) -> Self {
        Self {
            run_id,
            sequence: AtomicU64::new(0),
            sink,
        }
    }

    pub(crate) fn emit(&self, event: RunEvent) {
        let envelope = RunEventEnvelope {
            run_id: self.run_id.clone(),
            sequence: self.sequence.fetch_add(1, Ordering::SeqCst),
            timestamp: now_ms(),
            event,
        };
        self.sink.emit(&envelope);
    }
}
