//! Error taxonomy for loading and running pipelines

use serde::Serialize;
use thiserror::Error;

/// A malformed pipeline definition. Fatal at load time.
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("failed to read pipeline file: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid pipeline document: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("{location}: missing required field '{field}'")]
    MissingField {
        location: String,
        field: &'static str,
    },

    #[error("duplicate job id '{0}'")]
    DuplicateJob(String),

    #[error("job '{job}': duplicate step id '{step}'")]
    DuplicateStep { job: String, step: String },

    #[error("job '{job}': duplicate matrix axis '{axis}'")]
    DuplicateAxis { job: String, axis: String },

    #[error("job '{job}': matrix axis '{axis}' {reason}")]
    MalformedMatrix {
        job: String,
        axis: String,
        reason: String,
    },

    #[error("{location}: step declares both 'uses' and 'run'")]
    AmbiguousAction { location: String },

    #[error("job '{job}' needs non-existent job '{dependency}'")]
    UnknownDependency { job: String, dependency: String },

    #[error("cycle detected in job dependencies involving '{0}'")]
    DependencyCycle(String),

    #[error("{location}: invalid expression '{expression}': {reason}")]
    InvalidExpression {
        location: String,
        expression: String,
        reason: String,
    },

    #[error("{location}: unresolved reference '{reference}': {reason}")]
    UnresolvedReference {
        location: String,
        reference: String,
        reason: String,
    },

    #[error("invalid trigger '{trigger}': {reason}")]
    InvalidTrigger { trigger: String, reason: String },
}

/// A required non-secret reference could not be resolved while running an instance
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[error("step '{step}': cannot resolve '{reference}'")]
pub struct ResolutionError {
    /// Step (or `job` for job-level environment) being resolved
    pub step: String,
    /// The reference as written in the definition
    pub reference: String,
}

/// The collaborator reported failure for a step
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[error("step '{step}' failed: {reason}")]
pub struct StepFailure {
    pub step: String,
    pub reason: String,
}

/// Errors that end a single instance without touching its siblings
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InstanceError {
    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    #[error(transparent)]
    Step(#[from] StepFailure),
}
