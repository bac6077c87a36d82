//! Test utility functions for ci-engine
#![allow(dead_code)]

use async_trait::async_trait;
use ci_engine::action::{ActionError, ResolvedStep, StepExecutor, StepOutcome};
use ci_engine::core::{evaluate, PipelineDefinition, SecretProvider, StaticSecrets};
use ci_engine::core::trigger::{EventKind, TriggerEvent};
use ci_engine::execution::CancellationFlag;
use ci_engine::JobInstance;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Mock executor that records resolved steps and replays scripted outcomes
///
/// Steps are matched by id. Unscripted steps succeed with no outputs.
#[derive(Default)]
pub struct MockExecutor {
    calls: Mutex<Vec<ResolvedStep>>,
    failing: HashSet<String>,
    failing_instances: HashSet<String>,
    outputs: HashMap<String, Vec<(String, String)>>,
    delays: HashMap<String, Duration>,
    cancel_on: Option<(String, CancellationFlag)>,
}

impl MockExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report failure for every step with this id
    pub fn failing(mut self, step_id: &str) -> Self {
        self.failing.insert(step_id.to_string());
        self
    }

    /// Report failure for `step_id` only inside the instance with this label
    pub fn failing_in(mut self, instance: &str, step_id: &str) -> Self {
        self.failing_instances.insert(format!("{}/{}", instance, step_id));
        self
    }

    pub fn with_output(mut self, step_id: &str, name: &str, value: &str) -> Self {
        self.outputs
            .entry(step_id.to_string())
            .or_default()
            .push((name.to_string(), value.to_string()));
        self
    }

    pub fn with_delay(mut self, step_id: &str, delay: Duration) -> Self {
        self.delays.insert(step_id.to_string(), delay);
        self
    }

    /// Cancel the run while executing `step_id`
    pub fn cancelling(mut self, step_id: &str, flag: CancellationFlag) -> Self {
        self.cancel_on = Some((step_id.to_string(), flag));
        self
    }

    pub fn calls(&self) -> Vec<ResolvedStep> {
        self.calls.lock().unwrap().clone()
    }

    /// Step ids executed inside one instance, in order
    pub fn executed(&self, instance: &str) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|call| call.instance == instance)
            .map(|call| call.id.clone())
            .collect()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl StepExecutor for MockExecutor {
    async fn execute(&self, step: &ResolvedStep) -> Result<StepOutcome, ActionError> {
        self.calls.lock().unwrap().push(step.clone());

        if let Some((id, flag)) = &self.cancel_on {
            if id == &step.id {
                flag.cancel();
            }
        }
        if let Some(delay) = self.delays.get(&step.id) {
            tokio::time::sleep(*delay).await;
        }

        let scoped = format!("{}/{}", step.instance, step.id);
        if self.failing.contains(&step.id) || self.failing_instances.contains(&scoped) {
            return Ok(StepOutcome::failure(format!("{} exited with code 1", step.id)));
        }

        let mut outcome = StepOutcome::success();
        for (name, value) in self.outputs.get(&step.id).into_iter().flatten() {
            outcome = outcome.with_output(name.clone(), value.clone());
        }
        Ok(outcome)
    }
}

pub fn push() -> TriggerEvent {
    TriggerEvent::new(EventKind::Push).with_branch("master")
}

/// Load a pipeline and evaluate it for a push to master
pub fn instances(yaml: &str, secrets: Arc<dyn SecretProvider>) -> Vec<JobInstance> {
    let pipeline = PipelineDefinition::from_yaml(yaml).expect("pipeline should load");
    evaluate(&pipeline, &push(), secrets)
}

pub fn no_secrets() -> Arc<dyn SecretProvider> {
    Arc::new(StaticSecrets::new())
}

/// The three-job CI pipeline used across scenarios
pub const CI_PIPELINE: &str = r#"
name: CI
on:
  push:
    branches: [master]
  pull_request:
env:
  CARGO_TERM_COLOR: always
jobs:
  lint:
    name: "Lint (${{ matrix.features.name }})"
    strategy:
      matrix:
        features:
          - name: all features
            value: --all-features
            check_formatting: true
          - name: no_std
            value: --no-default-features
    steps:
      - id: checkout
        uses: actions/checkout@v2
      - id: clippy
        run: cargo clippy ${{ matrix.features.value }} -- -D warnings
      - id: fmt
        if: matrix.features.check_formatting
        run: cargo fmt --all -- --check
  test:
    name: "Test (${{ matrix.rust }}, ${{ matrix.os }})"
    strategy:
      matrix:
        os: [ubuntu-latest, windows-latest]
        rust: [stable, beta, nightly]
    steps:
      - id: checkout
        uses: actions/checkout@v2
      - id: toolchain
        uses: actions-rs/toolchain@v1
        with:
          toolchain: ${{ matrix.rust }}
          override: true
      - id: test
        run: cargo test --verbose
  coverage:
    steps:
      - id: checkout
        uses: actions/checkout@v2
      - id: tarpaulin
        run: cargo tarpaulin --out Xml
      - id: upload
        if: isSet(CODECOV_TOKEN)
        uses: codecov/codecov-action@v1
        with:
          token: ${{ secrets.CODECOV_TOKEN }}
"#;
