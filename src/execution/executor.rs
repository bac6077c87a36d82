//! Instance runner - drives the steps of one job instance

use crate::{
    action::{ActionError, ResolvedStep, StepExecutor},
    core::{
        context::InstanceContext,
        error::{InstanceError, ResolutionError, StepFailure},
        instance::JobInstance,
        state::{JobResult, JobStatus, StepReport, StepState},
        step::StepDefinition,
        template::{ParamValue, Template},
    },
    execution::engine::{CancellationFlag, EventHandler, ExecutionEvent},
};
use chrono::Utc;
use indexmap::IndexMap;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::time::{timeout, Duration};
use tracing::{debug, error, info, warn};

/// Runs the steps of an instance strictly in order
///
/// A false guard skips a step; a failing step aborts the rest of its
/// instance and nothing else.
#[derive(Clone)]
pub struct InstanceRunner {
    executor: Arc<dyn StepExecutor>,
    cancellation: CancellationFlag,
    event_handlers: Vec<EventHandler>,
}

impl InstanceRunner {
    pub fn new(executor: Arc<dyn StepExecutor>) -> Self {
        Self {
            executor,
            cancellation: CancellationFlag::default(),
            event_handlers: Vec::new(),
        }
    }

    pub fn with_cancellation(mut self, cancellation: CancellationFlag) -> Self {
        self.cancellation = cancellation;
        self
    }

    pub fn with_event_handler(mut self, handler: EventHandler) -> Self {
        self.event_handlers.push(handler);
        self
    }

    /// Run one instance to completion
    pub async fn run(&self, instance: &JobInstance) -> JobResult {
        run_instance(
            instance,
            self.executor.as_ref(),
            &self.cancellation,
            &self.event_handlers,
        )
        .await
    }
}

/// Run one instance with no cancellation and no event reporting
pub async fn run(instance: &JobInstance, executor: &dyn StepExecutor) -> JobResult {
    run_instance(instance, executor, &CancellationFlag::default(), &[]).await
}

fn emit(handlers: &[EventHandler], event: ExecutionEvent) {
    for handler in handlers {
        handler(event.clone());
    }
}

/// Everything that can stop a step from succeeding
enum StepError {
    Resolution(ResolutionError),
    Failure(String),
}

async fn run_instance(
    instance: &JobInstance,
    executor: &dyn StepExecutor,
    cancellation: &CancellationFlag,
    handlers: &[EventHandler],
) -> JobResult {
    let label = instance.label();

    if cancellation.is_cancelled() {
        debug!("Run cancelled before {} started", label);
        return JobResult::not_run(instance, JobStatus::Cancelled, "run cancelled");
    }

    let started_at = Utc::now();
    info!("Starting {}", label);
    emit(handlers, ExecutionEvent::InstanceStarted { label: label.clone() });

    let mut ctx = match instance.prepare_context() {
        Ok(ctx) => ctx,
        Err(e) => {
            error!("{}: {}", label, e);
            let steps = instance
                .job()
                .steps
                .iter()
                .map(|step| report(step, StepState::NotRun))
                .collect();
            return JobResult {
                status: JobStatus::Failure,
                steps,
                error: Some(InstanceError::Resolution(e)),
                reason: None,
                started_at,
                ..JobResult::not_run(instance, JobStatus::Failure, "")
            };
        }
    };

    if !instance.guard_allows(&ctx) {
        info!("Skipping {}: job guard evaluated false", label);
        return JobResult::not_run(instance, JobStatus::Skipped, "job guard evaluated false");
    }

    let mut steps = Vec::with_capacity(instance.job().steps.len());
    let mut outputs = BTreeMap::new();
    let mut instance_error: Option<InstanceError> = None;
    let mut cancelled = false;

    for step in &instance.job().steps {
        if instance_error.is_some() {
            steps.push(report(step, StepState::NotRun));
            continue;
        }
        if cancelled || cancellation.is_cancelled() {
            cancelled = true;
            steps.push(report(step, StepState::Cancelled));
            continue;
        }

        if let Some(guard) = &step.guard {
            if !guard.evaluate(&ctx) {
                debug!("{}: step '{}' skipped by its guard", label, step.id);
                let reason = "guard evaluated false".to_string();
                emit(
                    handlers,
                    ExecutionEvent::StepSkipped {
                        instance: label.clone(),
                        step_id: step.id.clone(),
                        reason: reason.clone(),
                    },
                );
                steps.push(report(step, StepState::Skipped { reason }));
                continue;
            }
        }

        let step_started = Utc::now();
        emit(
            handlers,
            ExecutionEvent::StepStarted {
                instance: label.clone(),
                step_id: step.id.clone(),
                name: step.display_name().to_string(),
            },
        );

        match execute_step(instance, step, &mut ctx, executor).await {
            Ok(step_outputs) => {
                debug!("{}: step '{}' succeeded", label, step.id);
                ctx.set_step_outputs(&step.id, step_outputs.clone());
                outputs.insert(step.id.clone(), step_outputs);
                emit(
                    handlers,
                    ExecutionEvent::StepCompleted {
                        instance: label.clone(),
                        step_id: step.id.clone(),
                    },
                );
                steps.push(report(
                    step,
                    StepState::Succeeded {
                        started_at: step_started,
                        completed_at: Utc::now(),
                    },
                ));
            }
            Err(err) => {
                let (message, err) = match err {
                    StepError::Resolution(e) => (e.to_string(), InstanceError::Resolution(e)),
                    StepError::Failure(reason) => {
                        let failure = StepFailure {
                            step: step.id.clone(),
                            reason,
                        };
                        (failure.reason.clone(), InstanceError::Step(failure))
                    }
                };
                warn!("{}: step '{}' failed: {}", label, step.id, message);
                emit(
                    handlers,
                    ExecutionEvent::StepFailed {
                        instance: label.clone(),
                        step_id: step.id.clone(),
                        error: message.clone(),
                    },
                );
                steps.push(report(
                    step,
                    StepState::Failed {
                        error: message,
                        started_at: step_started,
                        failed_at: Utc::now(),
                    },
                ));
                instance_error = Some(err);
            }
        }
        ctx.leave_step();
    }

    let status = if instance_error.is_some() {
        JobStatus::Failure
    } else if cancelled {
        JobStatus::Cancelled
    } else if steps.iter().all(|s| matches!(s.state, StepState::Skipped { .. })) {
        JobStatus::SkippedEntirely
    } else {
        JobStatus::Success
    };

    info!("Finished {}: {:?}", label, status);

    JobResult {
        label,
        job_id: instance.job_id().to_string(),
        display_name: instance.display_name().to_string(),
        matrix: instance.matrix().clone(),
        status,
        steps,
        outputs,
        error: instance_error,
        reason: cancelled.then(|| "run cancelled".to_string()),
        started_at,
        completed_at: Utc::now(),
    }
}

/// Resolve a step, hand it to the executor and wait for the outcome
async fn execute_step(
    instance: &JobInstance,
    step: &StepDefinition,
    ctx: &mut InstanceContext,
    executor: &dyn StepExecutor,
) -> Result<BTreeMap<String, String>, StepError> {
    let step_env = render_all(&step.id, &step.env, ctx).map_err(StepError::Resolution)?;
    ctx.enter_step(
        step_env
            .iter()
            .filter(|(_, value)| !value.is_secret())
            .map(|(key, value)| (key.clone(), value.expose().to_string()))
            .collect(),
    );
    let params = render_all(&step.id, &step.params, ctx).map_err(StepError::Resolution)?;

    let mut env: BTreeMap<String, ParamValue> = ctx
        .effective_env()
        .into_iter()
        .map(|(key, value)| (key, ParamValue::Plain(value)))
        .collect();
    env.extend(step_env);

    let timeout_secs = instance.job().step_timeout_secs(step);
    let resolved = ResolvedStep {
        instance: instance.label(),
        id: step.id.clone(),
        name: step.display_name().to_string(),
        action: step.action.clone(),
        params: params.into_iter().collect(),
        env,
        timeout_secs,
    };

    info!("Executing step: {} ({})", resolved.name, resolved.action);

    match timeout(Duration::from_secs(timeout_secs), executor.execute(&resolved)).await {
        Ok(Ok(outcome)) if outcome.is_success() => Ok(outcome.outputs),
        Ok(Ok(outcome)) => Err(StepError::Failure(
            outcome
                .message
                .unwrap_or_else(|| "step reported failure".to_string()),
        )),
        Ok(Err(e)) => {
            error!("Executor error for step {}: {}", step.id, e);
            Err(StepError::Failure(e.to_string()))
        }
        Err(_) => {
            error!("Timeout for step {} after {}s", step.id, timeout_secs);
            Err(StepError::Failure(ActionError::Timeout(timeout_secs).to_string()))
        }
    }
}

fn render_all(
    step_id: &str,
    templates: &IndexMap<String, Template>,
    ctx: &InstanceContext,
) -> Result<IndexMap<String, ParamValue>, ResolutionError> {
    templates
        .iter()
        .map(|(key, template)| {
            let value = template.render(ctx).map_err(|reference| ResolutionError {
                step: step_id.to_string(),
                reference: reference.to_string(),
            })?;
            Ok((key.clone(), value))
        })
        .collect()
}

fn report(step: &StepDefinition, state: StepState) -> StepReport {
    StepReport {
        id: step.id.clone(),
        name: step.display_name().to_string(),
        action: step.action.clone(),
        state,
    }
}
