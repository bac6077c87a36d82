//! Job instances: one job bound to one matrix combination

use crate::core::{
    context::InstanceContext,
    error::ResolutionError,
    matrix::MatrixBinding,
    pipeline::{JobDefinition, PipelineDefinition},
    secrets::SecretProvider,
    trigger::TriggerEvent,
};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Label used for job-level resolution errors
pub const JOB_SCOPE: &str = "job";

/// A job bound to exactly one matrix combination, derived fresh for each run
#[derive(Clone)]
pub struct JobInstance {
    job: Arc<JobDefinition>,
    index: usize,
    matrix: MatrixBinding,
    display_name: String,
    env: BTreeMap<String, String>,
    event: TriggerEvent,
    secrets: Arc<dyn SecretProvider>,
}

impl JobInstance {
    pub fn job(&self) -> &JobDefinition {
        &self.job
    }

    pub fn job_id(&self) -> &str {
        &self.job.id
    }

    /// Position within the job's expansion
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn matrix(&self) -> &MatrixBinding {
        &self.matrix
    }

    /// Rendered name template
    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    /// Identifies the instance in reports: job id plus its matrix binding
    pub fn label(&self) -> String {
        if self.matrix.is_empty() {
            self.job.id.clone()
        } else {
            format!("{} ({})", self.job.id, self.matrix)
        }
    }

    /// Pipeline env merged with invocation overrides
    pub fn env(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    pub fn event(&self) -> &TriggerEvent {
        &self.event
    }

    /// Fresh resolution context, before job env is applied
    pub fn context(&self) -> InstanceContext {
        InstanceContext::new(
            self.job.id.clone(),
            self.display_name.clone(),
            self.matrix.clone(),
            self.env.clone(),
            self.event.clone(),
            Arc::clone(&self.secrets),
        )
    }

    /// Context with the job env rendered over the instance env
    pub fn prepare_context(&self) -> Result<InstanceContext, ResolutionError> {
        let mut ctx = self.context();
        for (key, template) in &self.job.env {
            let value = template.render(&ctx).map_err(|reference| ResolutionError {
                step: JOB_SCOPE.to_string(),
                reference: reference.to_string(),
            })?;
            ctx.extend_env([(key.clone(), value.expose().to_string())]);
        }
        Ok(ctx)
    }

    /// Evaluate the job guard; no guard means the job runs
    pub fn guard_allows(&self, ctx: &InstanceContext) -> bool {
        self.job.guard.as_ref().map_or(true, |guard| guard.evaluate(ctx))
    }
}

impl fmt::Debug for JobInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobInstance")
            .field("job", &self.job.id)
            .field("index", &self.index)
            .field("matrix", &self.matrix)
            .field("display_name", &self.display_name)
            .field("env", &self.env)
            .field("event", &self.event)
            .finish_non_exhaustive()
    }
}

/// Equality ignores the secret provider, which is shared and opaque
impl PartialEq for JobInstance {
    fn eq(&self, other: &Self) -> bool {
        self.job.id == other.job.id
            && self.index == other.index
            && self.matrix == other.matrix
            && self.display_name == other.display_name
            && self.env == other.env
            && self.event == other.event
    }
}

/// Expand every job of a triggered pipeline into its instances
pub fn evaluate(
    definition: &PipelineDefinition,
    event: &TriggerEvent,
    secrets: Arc<dyn SecretProvider>,
) -> Vec<JobInstance> {
    evaluate_with_env(definition, event, secrets, &BTreeMap::new())
}

/// As [`evaluate`], with invocation env overrides layered over the pipeline env
pub fn evaluate_with_env(
    definition: &PipelineDefinition,
    event: &TriggerEvent,
    secrets: Arc<dyn SecretProvider>,
    overrides: &BTreeMap<String, String>,
) -> Vec<JobInstance> {
    if !definition.is_triggered_by(event) {
        debug!("Pipeline '{}' not triggered by {}", definition.name, event.kind);
        return Vec::new();
    }

    let mut env = definition.env.clone();
    env.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));

    definition
        .jobs
        .values()
        .flat_map(|job| expand(job, &env, event, &secrets))
        .collect()
}

/// Matrix expansion of a single job, in declared axis order
pub fn expand(
    job: &Arc<JobDefinition>,
    env: &BTreeMap<String, String>,
    event: &TriggerEvent,
    secrets: &Arc<dyn SecretProvider>,
) -> Vec<JobInstance> {
    let combinations = match &job.matrix {
        Some(matrix) => matrix.combinations(),
        None => vec![MatrixBinding::default()],
    };

    combinations
        .into_iter()
        .enumerate()
        .map(|(index, matrix)| {
            let display_name = match &job.name {
                Some(template) => {
                    let ctx = InstanceContext::new(
                        job.id.clone(),
                        job.id.clone(),
                        matrix.clone(),
                        env.clone(),
                        event.clone(),
                        Arc::clone(secrets),
                    );
                    template.render_lossy(&ctx)
                }
                None if matrix.is_empty() => job.id.clone(),
                None => {
                    let labels: Vec<String> = matrix.iter().map(|(_, v)| v.label()).collect();
                    format!("{} ({})", job.id, labels.join(", "))
                }
            };

            JobInstance {
                job: Arc::clone(job),
                index,
                matrix,
                display_name,
                env: env.clone(),
                event: event.clone(),
                secrets: Arc::clone(secrets),
            }
        })
        .collect()
}
