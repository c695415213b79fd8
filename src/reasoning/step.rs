//! The per-node reasoning call.

use async_trait::async_trait;
use futures::future::BoxFuture;
use std::sync::Arc;

use super::context::ExecutionContext;
use crate::grd::Node;

/// Everything a step executor sees for one node. Borrowed from the run, so
/// executors cannot alter earlier results.
#[derive(Debug, Clone, Copy)]
pub struct StepRequest<'a> {
    pub problem: &'a str,
    pub node: &'a Node,
    /// Zero-based index in the execution order.
    pub position: usize,
    pub total: usize,
    pub context: &'a ExecutionContext,
}

impl StepRequest<'_> {
    /// Plain-text rendering of the problem, prior results and the current step.
    pub fn prompt(&self) -> String {
        let mut prompt = format!("Problem: {}\n\n", self.problem);
        if !self.context.is_empty() {
            prompt.push_str("Previous Steps:\n");
            prompt.push_str(&self.context.render());
            prompt.push_str("\n\n");
        }
        prompt.push_str(&format!(
            "Current Step ({} of {}, {}): {}",
            self.position + 1,
            self.total,
            self.node.id,
            self.node.plain_label()
        ));
        prompt
    }

    pub(crate) fn to_input(self) -> StepInput {
        StepInput {
            problem: self.problem.to_string(),
            node: self.node.clone(),
            position: self.position,
            total: self.total,
            previous: self.context.entries().to_vec(),
            prompt: self.prompt(),
        }
    }
}

/// Owned copy of a [`StepRequest`], for executors built from closures.
#[derive(Debug, Clone)]
pub struct StepInput {
    pub problem: String,
    pub node: Node,
    pub position: usize,
    pub total: usize,
    pub previous: Vec<super::context::TraceEntry>,
    pub prompt: String,
}

/// Performs the reasoning for a single node.
#[async_trait]
pub trait StepExecutor: Send + Sync {
    async fn execute(&self, request: &StepRequest<'_>) -> anyhow::Result<String>;
}

type StepFn = dyn Fn(StepInput) -> BoxFuture<'static, anyhow::Result<String>> + Send + Sync;

/// Adapts an async closure into a [`StepExecutor`].
#[derive(Clone)]
pub struct FnStepExecutor {
    func: Arc<StepFn>,
}

impl FnStepExecutor {
    pub fn new<F>(func: F) -> Self
    where
        F: Fn(StepInput) -> BoxFuture<'static, anyhow::Result<String>> + Send + Sync + 'static,
    {
        Self {
            func: Arc::new(func),
        }
    }
}

impl std::fmt::Debug for FnStepExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnStepExecutor").finish_non_exhaustive()
    }
}

#[async_trait]
impl StepExecutor for FnStepExecutor {
    async fn execute(&self, request: &StepRequest<'_>) -> anyhow::Result<String> {
        (self.func)(request.to_input()).await
    }
}

#[async_trait]
impl<T: StepExecutor + ?Sized> StepExecutor for Arc<T> {
    async fn execute(&self, request: &StepRequest<'_>) -> anyhow::Result<String> {
        (**self).execute(request).await
    }
}
