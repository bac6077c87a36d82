//! `needs` edges and job guards across instances

use crate::helpers::*;
use ci_engine::core::{ExecutionStatus, JobStatus};
use ci_engine::execution::{ExecutionEngine, SchedulingStrategy};
use ci_engine::execution::ExecutionEvent;
use std::sync::{Arc, Mutex};
use std::time::Duration;

const DEPLOY: &str = r#"
name: Release
jobs:
  deploy:
    needs: [build, lint]
    steps:
      - id: ship
        run: ./deploy.sh
  build:
    strategy:
      matrix:
        target: [linux, macos]
    steps:
      - id: compile
        run: cargo build --release
  lint:
    steps:
      - id: clippy
        run: cargo clippy
"#;

#[tokio::test]
async fn test_dependents_run_after_every_instance() {
    let instances = instances(DEPLOY, no_secrets());
    assert_eq!(instances[0].job_id(), "deploy");

    let executor = Arc::new(MockExecutor::new().with_delay("compile", Duration::from_millis(30)));
    let result = ExecutionEngine::new(executor.clone(), SchedulingStrategy::Parallel)
        .execute("Release", instances)
        .await;

    assert!(result.is_success());
    let order: Vec<String> = executor.calls().into_iter().map(|c| c.id).collect();
    assert_eq!(order.len(), 4);
    assert_eq!(order.last().map(String::as_str), Some("ship"));
}

#[tokio::test]
async fn test_failed_dependency_skips_dependent() {
    let instances = instances(DEPLOY, no_secrets());
    let executor = Arc::new(MockExecutor::new().failing_in("build (target=macos)", "compile"));
    let result = ExecutionEngine::new(executor.clone(), SchedulingStrategy::Parallel)
        .execute("Release", instances)
        .await;

    assert_eq!(result.status, ExecutionStatus::Failed);
    let deploy = result.job("deploy").unwrap();
    assert_eq!(deploy.status, JobStatus::Skipped);
    assert_eq!(deploy.reason.as_deref(), Some("dependency 'build' did not succeed"));
    assert_eq!(result.job("build (target=linux)").unwrap().status, JobStatus::Success);
    assert!(executor.calls().iter().all(|c| c.id != "ship"));
}

#[tokio::test]
async fn test_job_guard_and_skipped_entirely_dependency() {
    let yaml = r#"
name: CI
jobs:
  docs:
    if: event.branch == 'gh-pages'
    steps:
      - run: mdbook build
  bench:
    steps:
      - if: "false"
        run: cargo bench
  report:
    needs: bench
    steps:
      - id: summarize
        run: ./report.sh
  publish-docs:
    needs: docs
    steps:
      - run: ./publish.sh
"#;
    let executor = Arc::new(MockExecutor::new());
    let result = ExecutionEngine::new(executor.clone(), SchedulingStrategy::Sequential)
        .execute("CI", instances(yaml, no_secrets()))
        .await;

    assert_eq!(result.job("docs").unwrap().status, JobStatus::Skipped);
    assert_eq!(result.job("bench").unwrap().status, JobStatus::SkippedEntirely);
    assert_eq!(result.job("report").unwrap().status, JobStatus::Success);
    assert_eq!(result.job("publish-docs").unwrap().status, JobStatus::Skipped);

    assert!(result.is_success());
    assert_eq!(executor.executed("report"), vec!["summarize"]);
    assert_eq!(executor.call_count(), 1);
}

#[tokio::test]
async fn test_skips_cascade_without_waiting_for_other_jobs() {
    let yaml = r#"
name: CI
jobs:
  a:
    steps:
      - id: fail
        run: "false"
  b:
    needs: a
    steps:
      - run: "true"
  c:
    needs: b
    steps:
      - run: "true"
  d:
    steps:
      - id: slow
        run: sleep 1
"#;
    let executor = Arc::new(
        MockExecutor::new()
            .failing("fail")
            .with_delay("slow", Duration::from_millis(500)),
    );
    let finished = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&finished);
    let engine = ExecutionEngine::new(executor, SchedulingStrategy::Parallel).with_event_handler(move |event| {
        if let ExecutionEvent::InstanceFinished { label, .. } = event {
            sink.lock().unwrap().push(label);
        }
    });

    let result = engine.execute("CI", instances(yaml, no_secrets())).await;

    assert_eq!(result.job("c").unwrap().status, JobStatus::Skipped);
    assert_eq!(
        result.job("c").unwrap().reason.as_deref(),
        Some("dependency 'b' did not succeed")
    );
    let order = finished.lock().unwrap().clone();
    assert_eq!(order, vec!["a", "b", "c", "d"]);
}
