//! Step executor interface
//!
//! The engine never performs a step's action itself. It hands a fully
//! resolved step to a [`StepExecutor`] and waits for the outcome.

pub mod dry_run;
pub mod shell;

use crate::core::template::ParamValue;
use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeMap;
use thiserror::Error;

pub use dry_run::DryRunExecutor;
pub use shell::ShellExecutor;

/// Errors raised by a collaborator instead of a step outcome
#[derive(Debug, Error)]
pub enum ActionError {
    #[error("unsupported action '{0}'")]
    Unsupported(String),

    #[error("Timeout after {0} seconds")]
    Timeout(u64),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// A step with its guard already evaluated true and every template rendered
#[derive(Debug, Clone)]
pub struct ResolvedStep {
    /// Label of the owning instance
    pub instance: String,
    pub id: String,
    pub name: String,
    /// Action reference, `run` for inline scripts
    pub action: String,
    pub params: BTreeMap<String, ParamValue>,
    /// Environment visible to the step (instance, job and step layers merged)
    pub env: BTreeMap<String, ParamValue>,
    pub timeout_secs: u64,
}

impl ResolvedStep {
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(ParamValue::expose)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Success,
    Failure,
}

/// What the collaborator reports back for one step
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepOutcome {
    pub status: StepStatus,
    /// Named outputs, visible to later steps of the same instance
    pub outputs: BTreeMap<String, String>,
    /// Failure detail
    pub message: Option<String>,
}

impl StepOutcome {
    pub fn success() -> Self {
        Self {
            status: StepStatus::Success,
            outputs: BTreeMap::new(),
            message: None,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            status: StepStatus::Failure,
            outputs: BTreeMap::new(),
            message: Some(message.into()),
        }
    }

    pub fn with_output(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.outputs.insert(name.into(), value.into());
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == StepStatus::Success
    }
}

/// Trait for step execution - allows for different implementations
#[async_trait]
pub trait StepExecutor: Send + Sync {
    /// Execute the referenced action and report its outcome
    async fn execute(&self, step: &ResolvedStep) -> Result<StepOutcome, ActionError>;
}
