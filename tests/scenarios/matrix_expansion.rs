//! Matrix expansion and per-variant step guards

use crate::helpers::*;
use ci_engine::core::{JobStatus, StepState};
use ci_engine::execution::{run, ExecutionEngine, SchedulingStrategy};
use std::collections::HashSet;
use std::sync::Arc;

#[tokio::test]
async fn test_lint_variant_without_field_skips_format_check() {
    let instances = instances(CI_PIPELINE, no_secrets());
    let lint: Vec<_> = instances.iter().filter(|i| i.job_id() == "lint").collect();
    assert_eq!(lint.len(), 2);
    assert_eq!(lint[0].display_name(), "Lint (all features)");
    assert_eq!(lint[1].display_name(), "Lint (no_std)");

    let executor = MockExecutor::new();
    let all_features = run(lint[0], &executor).await;
    let no_std = run(lint[1], &executor).await;

    assert_eq!(all_features.status, JobStatus::Success);
    assert_eq!(all_features.executed_steps(), vec!["checkout", "clippy", "fmt"]);

    assert_eq!(no_std.status, JobStatus::Success);
    assert_eq!(no_std.executed_steps(), vec!["checkout", "clippy"]);
    assert!(matches!(no_std.step("fmt").unwrap().state, StepState::Skipped { .. }));

    let clippy = executor
        .calls()
        .into_iter()
        .find(|c| c.instance == "lint (features=no_std)" && c.id == "clippy")
        .unwrap();
    assert_eq!(
        clippy.param("script"),
        Some("cargo clippy --no-default-features -- -D warnings")
    );
}

#[test]
fn test_cartesian_product_first_axis_slowest() {
    let instances = instances(CI_PIPELINE, no_secrets());
    let labels: Vec<String> = instances
        .iter()
        .filter(|i| i.job_id() == "test")
        .map(|i| i.label())
        .collect();

    assert_eq!(
        labels,
        vec![
            "test (os=ubuntu-latest, rust=stable)",
            "test (os=ubuntu-latest, rust=beta)",
            "test (os=ubuntu-latest, rust=nightly)",
            "test (os=windows-latest, rust=stable)",
            "test (os=windows-latest, rust=beta)",
            "test (os=windows-latest, rust=nightly)",
        ]
    );
    let distinct: HashSet<&String> = labels.iter().collect();
    assert_eq!(distinct.len(), 6);
}

#[test]
fn test_duplicate_variants_are_kept() {
    let yaml = r#"
name: CI
jobs:
  flaky:
    strategy:
      matrix:
        attempt: [1, 1, 2]
    steps:
      - run: cargo test
"#;
    let instances = instances(yaml, no_secrets());
    assert_eq!(instances.len(), 3);
    assert_eq!(instances[0].label(), instances[1].label());
    assert_ne!(instances[0].index(), instances[1].index());
}

#[test]
fn test_evaluation_is_reproducible() {
    let secrets = no_secrets();
    let first = instances(CI_PIPELINE, Arc::clone(&secrets));
    let second = instances(CI_PIPELINE, secrets);
    assert_eq!(first, second);
    assert_eq!(first.len(), 2 + 6 + 1);
}

#[tokio::test]
async fn test_matrix_value_reaches_step_params() {
    let instances = instances(CI_PIPELINE, no_secrets());
    let executor = Arc::new(MockExecutor::new());
    let engine = ExecutionEngine::new(executor.clone(), SchedulingStrategy::Parallel);

    let result = engine.execute("CI", instances).await;
    assert!(result.is_success());

    let toolchains: Vec<String> = executor
        .calls()
        .into_iter()
        .filter(|c| c.id == "toolchain")
        .filter_map(|c| c.param("toolchain").map(str::to_string))
        .collect();
    assert_eq!(toolchains.len(), 6);
    for rust in ["stable", "beta", "nightly"] {
        assert_eq!(toolchains.iter().filter(|t| *t == rust).count(), 2);
    }
}
