//! Shared doubles for the integration suites.
#![allow(dead_code)]

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use braid::reasoning::{LanguageModel, StepExecutor, StepRequest};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::Duration;

pub const TRAIN: &str = "```mermaid
flowchart TD
    Start[Problem Analysis] --> Identify[Identify given values:<br/>Distance = 120 km<br/>Time = 2 hours]
    Identify --> Formula[Recall speed formula:<br/>Speed = Distance / Time]
    Formula --> Calculate[Calculate:<br/>Speed = 120 / 2]
    Calculate --> Answer[Speed = 60 km/h]
```";

pub const DIAMOND: &str = "flowchart TD
    Start[Start] --> Left[Left branch]
    Start --> Right[Right branch]
    Left --> End[End]
    Right --> End";

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

/// Answers `<node id> done` and remembers every prompt it was given.
/// Fails on the zero-based call index `fail_at`, if set.
#[derive(Default)]
pub struct ScriptedExecutor {
    fail_at: Option<usize>,
    calls: Mutex<Vec<(String, String)>>,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_at(index: usize) -> Self {
        Self {
            fail_at: Some(index),
            ..Self::default()
        }
    }

    pub fn visited(&self) -> Vec<String> {
        self.calls.lock().iter().map(|(id, _)| id.clone()).collect()
    }

    pub fn prompts(&self) -> Vec<String> {
        self.calls.lock().iter().map(|(_, p)| p.clone()).collect()
    }
}

#[async_trait]
impl StepExecutor for ScriptedExecutor {
    async fn execute(&self, request: &StepRequest<'_>) -> Result<String> {
        let index = {
            let mut calls = self.calls.lock();
            calls.push((request.node.id.clone(), request.prompt()));
            calls.len() - 1
        };
        if self.fail_at == Some(index) {
            return Err(anyhow!("model refused step {}", request.node.id));
        }
        Ok(format!("{} done", request.node.id))
    }
}

/// Takes `delay` per step before answering.
pub struct SlowExecutor {
    pub delay: Duration,
}

#[async_trait]
impl StepExecutor for SlowExecutor {
    async fn execute(&self, request: &StepRequest<'_>) -> Result<String> {
        tokio::time::sleep(self.delay).await;
        Ok(request.node.id.clone())
    }
}

/// Replays canned completions, erroring once they run out.
#[derive(Default)]
pub struct ScriptedModel {
    responses: Mutex<VecDeque<Result<String>>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedModel {
    pub fn new<I: IntoIterator<Item = Result<String>>>(responses: I) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().collect()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().len()
    }

    pub fn last_prompt(&self) -> Option<String> {
        self.prompts.lock().last().cloned()
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn complete(&self, prompt: &str) -> Result<String> {
        self.prompts.lock().push(prompt.to_string());
        self.responses
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(anyhow!("no scripted response left")))
    }
}
