use serde::{Deserialize, Serialize};
use std::fmt::Write as _;

/// Result produced by one executed node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceEntry {
    pub node_id: String,
    pub result: String,
    pub duration_ms: u64,
}

impl TraceEntry {
    pub fn new<I: Into<String>, R: Into<String>>(node_id: I, result: R, duration_ms: u64) -> Self {
        Self {
            node_id: node_id.into(),
            result: result.into(),
            duration_ms,
        }
    }
}

/// Results accumulated during one run, in execution order.
///
/// Append-only: entries already recorded are never changed, and each node
/// appears at most once.
#[derive(Debug, Clone, Default)]
pub struct ExecutionContext {
    entries: Vec<TraceEntry>,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record(&mut self, entry: TraceEntry) {
        debug_assert!(
            self.get(&entry.node_id).is_none(),
            "node '{}' recorded twice",
            entry.node_id
        );
        self.entries.push(entry);
    }

    /// Result of `node_id`, if it has run.
    pub fn get(&self, node_id: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|entry| entry.node_id == node_id)
            .map(|entry| entry.result.as_str())
    }

    pub fn entries(&self) -> &[TraceEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TraceEntry> {
        self.entries.iter()
    }

    pub fn last(&self) -> Option<&TraceEntry> {
        self.entries.last()
    }

    /// `Step 1 (Identify): ...` lines, one per recorded result.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for (i, entry) in self.entries.iter().enumerate() {
            if i > 0 {
                out.push('\n');
            }
            let _ = write!(out, "Step {} ({}): {}", i + 1, entry.node_id, entry.result);
        }
        out
    }

    pub fn into_trace(self) -> Vec<TraceEntry> {
        self.entries
    }
}
