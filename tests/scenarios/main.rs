//! Scenario-based tests for ci-engine

#[path = "../helpers.rs"]
mod helpers;

mod cancellation;
mod dependencies;
mod failure_handling;
mod matrix_expansion;
mod schema_errors;
mod secrets;
