//! ci-engine - Evaluate and run declarative CI pipelines
//!
//! A pipeline definition is loaded and validated once, expanded into job
//! instances for a triggering event, and then executed through a
//! [`StepExecutor`] under a scheduling strategy.

pub mod action;
pub mod cli;
pub mod core;
pub mod execution;

// Re-export commonly used types
pub use action::{ActionError, DryRunExecutor, ResolvedStep, ShellExecutor, StepExecutor, StepOutcome, StepStatus};
pub use core::{
    evaluate, evaluate_with_env, EnvSecrets, EventKind, ExecutionStatus, InstanceError, JobDefinition, JobInstance,
    JobResult, JobStatus, NoSecrets, ParamValue, PipelineDefinition, PipelineResult, ResolutionError, SchemaError,
    SecretProvider, StaticSecrets, StepFailure, StepState, TriggerEvent,
};
pub use execution::{run, CancellationFlag, ExecutionEngine, ExecutionEvent, InstanceRunner, SchedulingStrategy};
