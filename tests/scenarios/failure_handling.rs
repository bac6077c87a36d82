//! Fail-fast within an instance, isolation across instances

use crate::helpers::*;
use ci_engine::core::{ExecutionStatus, InstanceError, JobStatus, StepState};
use ci_engine::execution::{run, ExecutionEngine, SchedulingStrategy};
use std::sync::Arc;

const THREE_STEPS: &str = r#"
name: CI
jobs:
  build:
    steps:
      - id: a
        run: "true"
      - id: b
        run: "false"
      - id: c
        run: "true"
"#;

#[tokio::test]
async fn test_failed_step_aborts_remaining_steps() {
    let instance = &instances(THREE_STEPS, no_secrets())[0];
    let executor = MockExecutor::new().failing("b");

    let result = run(instance, &executor).await;

    assert_eq!(result.status, JobStatus::Failure);
    assert_eq!(executor.executed("build"), vec!["a", "b"]);
    assert!(matches!(result.step("b").unwrap().state, StepState::Failed { .. }));
    assert_eq!(result.step("c").unwrap().state, StepState::NotRun);
    match result.error {
        Some(InstanceError::Step(failure)) => {
            assert_eq!(failure.step, "b");
            assert_eq!(failure.reason, "b exited with code 1");
        }
        other => panic!("Expected step failure, got {:?}", other),
    }
}

#[tokio::test]
async fn test_failing_variant_does_not_affect_siblings() {
    let instances = instances(CI_PIPELINE, no_secrets());
    let executor = Arc::new(
        MockExecutor::new()
            .failing_in("test (os=windows-latest, rust=nightly)", "test")
            .with_output("tarpaulin", "report", "cobertura.xml"),
    );
    let engine = ExecutionEngine::new(executor.clone(), SchedulingStrategy::Parallel);

    let result = engine.execute("CI", instances).await;

    assert_eq!(result.status, ExecutionStatus::Failed);
    assert_eq!(result.jobs.len(), 9);

    let failures = result.failures();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].label, "test (os=windows-latest, rust=nightly)");
    assert_eq!(failures[0].display_name, "Test (nightly, windows-latest)");

    assert_eq!(result.count(JobStatus::Success), 8);
    let coverage = result.job("coverage").unwrap();
    assert_eq!(coverage.outputs["tarpaulin"]["report"], "cobertura.xml");
    assert_eq!(
        executor.executed("test (os=windows-latest, rust=beta)"),
        vec!["checkout", "toolchain", "test"]
    );
}

#[tokio::test]
async fn test_results_follow_evaluation_order() {
    let instances = instances(CI_PIPELINE, no_secrets());
    let expected: Vec<String> = instances.iter().map(|i| i.label()).collect();
    let executor = Arc::new(MockExecutor::new().with_delay("clippy", std::time::Duration::from_millis(50)));

    let result = ExecutionEngine::new(executor, SchedulingStrategy::LimitedParallel(3))
        .execute("CI", instances)
        .await;

    let labels: Vec<String> = result.jobs.iter().map(|j| j.label.clone()).collect();
    assert_eq!(labels, expected);
}

#[tokio::test]
async fn test_unresolved_env_fails_only_its_instance() {
    let yaml = r#"
name: CI
jobs:
  build:
    strategy:
      matrix:
        target: [x86_64, wasm32]
    steps:
      - id: compile
        run: cargo build --target ${{ matrix.target }}
      - id: publish
        env:
          CHANNEL: ${{ env.PUBLISH_CHANNEL }}
        run: ./publish.sh
  docs:
    steps:
      - id: render
        run: cargo doc --no-deps
"#;
    let instances = instances(yaml, no_secrets());
    let executor = Arc::new(MockExecutor::new().with_output("render", "path", "target/doc"));
    let result = ExecutionEngine::new(executor.clone(), SchedulingStrategy::Parallel)
        .execute("CI", instances)
        .await;

    assert_eq!(result.status, ExecutionStatus::Failed);
    for label in ["build (target=x86_64)", "build (target=wasm32)"] {
        let job = result.job(label).unwrap();
        assert_eq!(job.status, JobStatus::Failure);
        assert!(matches!(
            job.error,
            Some(InstanceError::Resolution(ref e)) if e.step == "publish" && e.reference == "env.PUBLISH_CHANNEL"
        ));
    }

    let docs = result.job("docs").unwrap();
    assert_eq!(docs.status, JobStatus::Success);
    assert!(docs.error.is_none());
    assert_eq!(docs.outputs["render"]["path"], "target/doc");
    assert_eq!(executor.executed("docs"), vec!["render"]);
    assert!(executor
        .calls()
        .iter()
        .filter(|c| c.instance.starts_with("build"))
        .all(|c| c.id == "compile"));
}

#[tokio::test]
async fn test_all_steps_guarded_off() {
    let yaml = r#"
name: CI
jobs:
  release:
    steps:
      - if: ${{ event.branch == 'release' }}
        run: ./release.sh
      - if: "false"
        run: ./announce.sh
"#;
    let instance = &instances(yaml, no_secrets())[0];
    let executor = MockExecutor::new();
    let result = run(instance, &executor).await;

    assert_eq!(result.status, JobStatus::SkippedEntirely);
    assert_eq!(executor.call_count(), 0);
}

#[tokio::test]
async fn test_step_timeout_is_a_failure() {
    let yaml = r#"
name: CI
jobs:
  build:
    steps:
      - id: hang
        run: sleep 100
        timeout_secs: 1
"#;
    let instance = &instances(yaml, no_secrets())[0];
    let executor = MockExecutor::new().with_delay("hang", std::time::Duration::from_secs(5));
    let result = run(instance, &executor).await;

    assert_eq!(result.status, JobStatus::Failure);
    match result.error {
        Some(InstanceError::Step(failure)) => assert_eq!(failure.reason, "Timeout after 1 seconds"),
        other => panic!("Expected timeout failure, got {:?}", other),
    }
}
