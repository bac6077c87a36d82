//! Main execution engine - orchestrates a whole pipeline run

use crate::{
    action::StepExecutor,
    core::{
        instance::JobInstance,
        state::{ExecutionStatus, JobResult, JobStatus, PipelineResult, PipelineState},
    },
    execution::{Dispatch, ExecutionScheduler, InstanceRunner, SchedulingStrategy},
};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Events that can occur during pipeline execution
#[derive(Debug, Clone)]
pub enum ExecutionEvent {
    PipelineStarted {
        execution_id: Uuid,
        pipeline_name: String,
        instances: usize,
    },
    InstanceStarted {
        label: String,
    },
    StepStarted {
        instance: String,
        step_id: String,
        name: String,
    },
    StepCompleted {
        instance: String,
        step_id: String,
    },
    StepSkipped {
        instance: String,
        step_id: String,
        reason: String,
    },
    StepFailed {
        instance: String,
        step_id: String,
        error: String,
    },
    InstanceFinished {
        label: String,
        status: JobStatus,
    },
    PipelineCompleted {
        execution_id: Uuid,
        status: ExecutionStatus,
    },
}

/// Type for event handlers
pub type EventHandler = Arc<dyn Fn(ExecutionEvent) + Send + Sync>;

/// Shared flag that stops new steps and instances from being issued
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Main pipeline execution engine
pub struct ExecutionEngine {
    executor: Arc<dyn StepExecutor>,
    strategy: SchedulingStrategy,
    cancellation: CancellationFlag,
    event_handlers: Vec<EventHandler>,
}

impl ExecutionEngine {
    pub fn new(executor: Arc<dyn StepExecutor>, strategy: SchedulingStrategy) -> Self {
        Self {
            executor,
            strategy,
            cancellation: CancellationFlag::default(),
            event_handlers: Vec::new(),
        }
    }

    /// Add an event handler
    pub fn with_event_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(ExecutionEvent) + Send + Sync + 'static,
    {
        self.event_handlers.push(Arc::new(handler));
        self
    }

    /// Share an existing cancellation flag
    pub fn with_cancellation(mut self, cancellation: CancellationFlag) -> Self {
        self.cancellation = cancellation;
        self
    }

    /// Handle for cancelling a run in progress
    pub fn cancellation(&self) -> CancellationFlag {
        self.cancellation.clone()
    }

    /// Emit an event to all handlers
    fn emit_event(&self, event: ExecutionEvent) {
        for handler in &self.event_handlers {
            handler(event.clone());
        }
    }

    fn runner(&self) -> InstanceRunner {
        self.event_handlers.iter().fold(
            InstanceRunner::new(Arc::clone(&self.executor)).with_cancellation(self.cancellation.clone()),
            |runner, handler| runner.with_event_handler(Arc::clone(handler)),
        )
    }

    /// Execute every instance under the scheduling strategy
    ///
    /// Results come back in evaluation order, whatever order instances
    /// finished in.
    pub async fn execute(&self, pipeline_name: &str, instances: Vec<JobInstance>) -> PipelineResult {
        let mut state = PipelineState::new();
        let execution_id = state.execution_id;
        state.start(instances.len());

        info!(
            "Starting pipeline execution: {} ({}, {} instances)",
            pipeline_name,
            execution_id,
            instances.len()
        );
        self.emit_event(ExecutionEvent::PipelineStarted {
            execution_id,
            pipeline_name: pipeline_name.to_string(),
            instances: instances.len(),
        });

        let mut scheduler = ExecutionScheduler::new(self.strategy, &instances);
        let permits = Arc::new(Semaphore::new(scheduler.strategy().max_concurrent()));
        let runner = self.runner();

        let mut results: Vec<Option<JobResult>> = vec![None; instances.len()];
        let mut running: HashSet<usize> = HashSet::new();
        let mut tasks: JoinSet<(usize, JobResult)> = JoinSet::new();

        loop {
            let mut progressed = false;
            // Skips finish at once and may release further dependents
            loop {
                let dispatches = scheduler.next_dispatches(&instances);
                if dispatches.is_empty() {
                    break;
                }
                progressed = true;
                for dispatch in dispatches {
                    match dispatch {
                        Dispatch::Run(index) => {
                            running.insert(index);
                            state.instance_started();

                            let instance = instances[index].clone();
                            let runner = runner.clone();
                            let permits = Arc::clone(&permits);
                            tasks.spawn(async move {
                                let result = match permits.acquire_owned().await {
                                    Ok(_permit) => runner.run(&instance).await,
                                    Err(_) => JobResult::not_run(&instance, JobStatus::Cancelled, "run cancelled"),
                                };
                                (index, result)
                            });
                        }
                        Dispatch::Skip { index, reason } => {
                            let result = if self.cancellation.is_cancelled() {
                                JobResult::not_run(&instances[index], JobStatus::Cancelled, "run cancelled")
                            } else {
                                info!("Skipping {}: {}", instances[index].label(), reason);
                                JobResult::not_run(&instances[index], JobStatus::Skipped, reason)
                            };
                            self.record(&mut scheduler, &mut state, &mut results, index, result, false);
                        }
                    }
                }
            }

            match tasks.join_next().await {
                Some(Ok((index, result))) => {
                    running.remove(&index);
                    self.record(&mut scheduler, &mut state, &mut results, index, result, true);
                }
                Some(Err(e)) => {
                    error!("Instance task failed: {}", e);
                }
                None => {
                    // Tasks that died without reporting back
                    let lost: Vec<usize> = running.drain().collect();
                    for &index in &lost {
                        let result =
                            JobResult::not_run(&instances[index], JobStatus::Failure, "instance task panicked");
                        self.record(&mut scheduler, &mut state, &mut results, index, result, true);
                    }
                    if progressed || !lost.is_empty() {
                        continue;
                    }
                    if !scheduler.has_more() {
                        break;
                    }

                    for index in scheduler.drain_pending() {
                        warn!("{} can never become ready", instances[index].label());
                        let result = JobResult::not_run(
                            &instances[index],
                            JobStatus::Skipped,
                            "dependencies never finished",
                        );
                        self.record(&mut scheduler, &mut state, &mut results, index, result, false);
                    }
                    break;
                }
            }
        }

        let jobs: Vec<JobResult> = results.into_iter().flatten().collect();
        state.finish(&jobs);

        info!("Pipeline execution finished: {} - {:?}", pipeline_name, state.status);
        self.emit_event(ExecutionEvent::PipelineCompleted {
            execution_id,
            status: state.status,
        });

        PipelineResult {
            run_id: execution_id,
            pipeline: pipeline_name.to_string(),
            status: state.status,
            started_at: state.started_at.unwrap_or_else(chrono::Utc::now),
            completed_at: state.completed_at.unwrap_or_else(chrono::Utc::now),
            jobs,
        }
    }

    fn record(
        &self,
        scheduler: &mut ExecutionScheduler,
        state: &mut PipelineState,
        results: &mut [Option<JobResult>],
        index: usize,
        result: JobResult,
        was_running: bool,
    ) {
        scheduler.finished(&result.job_id, result.status);
        state.instance_finished(result.status, was_running);
        debug!(
            "{} finished ({:?}); {:.0}% done, {} running, {} failed",
            result.label,
            result.status,
            state.progress() * 100.0,
            state.running_instances,
            state.failed_instances
        );
        self.emit_event(ExecutionEvent::InstanceFinished {
            label: result.label.clone(),
            status: result.status,
        });
        results[index] = Some(result);
    }
}
