//! External cancellation of a run

use crate::helpers::*;
use ci_engine::core::{ExecutionStatus, JobStatus, StepState};
use ci_engine::execution::{CancellationFlag, ExecutionEngine, SchedulingStrategy};
use std::sync::Arc;

const PIPELINE: &str = r#"
name: CI
jobs:
  build:
    steps:
      - id: fetch
        run: cargo fetch
      - id: compile
        run: cargo build
  test:
    needs: build
    steps:
      - id: unit
        run: cargo test
  deploy:
    needs: build
    steps:
      - id: ship
        run: ./deploy.sh
"#;

#[tokio::test]
async fn test_no_new_steps_after_cancel() {
    let flag = CancellationFlag::new();
    let executor = Arc::new(MockExecutor::new().cancelling("fetch", flag.clone()));
    let engine = ExecutionEngine::new(executor.clone(), SchedulingStrategy::Sequential).with_cancellation(flag);

    let result = engine.execute("CI", instances(PIPELINE, no_secrets())).await;

    assert_eq!(result.status, ExecutionStatus::Cancelled);
    assert_eq!(executor.calls().len(), 1);

    let build = result.job("build").unwrap();
    assert_eq!(build.status, JobStatus::Cancelled);
    assert!(build.step("fetch").unwrap().state.was_executed());
    assert_eq!(build.step("compile").unwrap().state, StepState::Cancelled);

    assert_eq!(result.job("test").unwrap().status, JobStatus::Cancelled);
    assert_eq!(result.job("deploy").unwrap().status, JobStatus::Cancelled);
}

#[tokio::test]
async fn test_cancel_before_start() {
    let executor = Arc::new(MockExecutor::new());
    let engine = ExecutionEngine::new(executor.clone(), SchedulingStrategy::Parallel);
    engine.cancellation().cancel();

    let result = engine.execute("CI", instances(PIPELINE, no_secrets())).await;

    assert_eq!(result.status, ExecutionStatus::Cancelled);
    assert_eq!(executor.call_count(), 0);
    assert_eq!(result.count(JobStatus::Cancelled), 3);
}
