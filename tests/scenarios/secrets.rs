//! Secret presence guards and secret redaction

use crate::helpers::*;
use ci_engine::core::{JobStatus, SecretProvider, StaticSecrets, StepState};
use ci_engine::execution::{run, ExecutionEngine, ExecutionEvent, SchedulingStrategy};
use std::sync::{Arc, Mutex};

fn coverage(secrets: Arc<dyn SecretProvider>) -> ci_engine::JobInstance {
    instances(CI_PIPELINE, secrets)
        .into_iter()
        .find(|i| i.job_id() == "coverage")
        .unwrap()
}

#[tokio::test]
async fn test_absent_token_skips_upload() {
    let executor = MockExecutor::new();
    let result = run(&coverage(no_secrets()), &executor).await;

    assert_eq!(result.status, JobStatus::Success);
    assert_eq!(result.executed_steps(), vec!["checkout", "tarpaulin"]);
    assert!(matches!(result.step("upload").unwrap().state, StepState::Skipped { .. }));
    assert!(executor.calls().iter().all(|c| c.action != "codecov/codecov-action@v1"));
}

#[tokio::test]
async fn test_empty_token_counts_as_unset() {
    let secrets = Arc::new(StaticSecrets::new().with("CODECOV_TOKEN", ""));
    let executor = MockExecutor::new();
    let result = run(&coverage(secrets), &executor).await;

    assert_eq!(result.executed_steps(), vec!["checkout", "tarpaulin"]);
}

#[tokio::test]
async fn test_present_token_is_passed_but_never_shown() {
    let secrets = Arc::new(StaticSecrets::new().with("CODECOV_TOKEN", "s3cr3t-token"));
    let executor = Arc::new(MockExecutor::new());
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);

    let engine = ExecutionEngine::new(executor.clone(), SchedulingStrategy::Sequential)
        .with_event_handler(move |event: ExecutionEvent| sink.lock().unwrap().push(format!("{:?}", event)));
    let result = engine.execute("CI", vec![coverage(secrets)]).await;

    assert!(result.is_success());
    let upload = executor.calls().into_iter().find(|c| c.id == "upload").unwrap();
    assert_eq!(upload.param("token"), Some("s3cr3t-token"));
    assert!(upload.params["token"].is_secret());

    assert!(!format!("{:?}", upload).contains("s3cr3t-token"));
    assert!(!serde_json::to_string(&result).unwrap().contains("s3cr3t-token"));
    assert!(seen.lock().unwrap().iter().all(|line| !line.contains("s3cr3t-token")));
}
