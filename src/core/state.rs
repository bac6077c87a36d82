//! Execution state and result models

use crate::core::{error::InstanceError, instance::JobInstance, matrix::MatrixBinding};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use uuid::Uuid;

/// Overall pipeline execution status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// Pipeline has not started
    Pending,
    /// Pipeline is currently running
    Running,
    /// Every instance that ran succeeded
    Succeeded,
    /// At least one instance failed
    Failed,
    /// Pipeline was cancelled
    Cancelled,
}

/// Outcome of one job instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobStatus {
    /// Every step that ran succeeded
    Success,
    /// A step failed or a reference could not be resolved
    Failure,
    /// Every step was guarded off
    SkippedEntirely,
    /// Not run: the job guard was false or a dependency did not succeed
    Skipped,
    /// Interrupted or never started because the run was cancelled
    Cancelled,
}

impl JobStatus {
    /// Whether dependents of this instance may run
    pub fn satisfies_dependents(&self) -> bool {
        matches!(self, JobStatus::Success | JobStatus::SkippedEntirely)
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, JobStatus::Failure)
    }
}

/// State of a single step once the instance is done
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum StepState {
    /// Step completed successfully
    Succeeded {
        started_at: DateTime<Utc>,
        completed_at: DateTime<Utc>,
    },
    /// Step failed; remaining steps were not run
    Failed {
        error: String,
        started_at: DateTime<Utc>,
        failed_at: DateTime<Utc>,
    },
    /// Guard evaluated false
    Skipped { reason: String },
    /// An earlier step of the instance failed
    NotRun,
    /// The run was cancelled before this step was issued
    Cancelled,
}

impl StepState {
    /// Whether the step was handed to the executor
    pub fn was_executed(&self) -> bool {
        matches!(self, StepState::Succeeded { .. } | StepState::Failed { .. })
    }
}

/// Per-step entry of a job result
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepReport {
    pub id: String,
    pub name: String,
    pub action: String,
    #[serde(flatten)]
    pub state: StepState,
}

/// Result of running one job instance
#[derive(Debug, Clone, Serialize)]
pub struct JobResult {
    /// Job id plus matrix binding, e.g. `lint (features=no_std)`
    pub label: String,
    pub job_id: String,
    pub display_name: String,
    pub matrix: MatrixBinding,
    pub status: JobStatus,
    pub steps: Vec<StepReport>,
    /// Outputs by step id
    pub outputs: BTreeMap<String, BTreeMap<String, String>>,
    /// Why the instance failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<InstanceError>,
    /// Why the instance was skipped or cancelled
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

impl JobResult {
    /// A result for an instance that never ran any step
    pub fn not_run(instance: &JobInstance, status: JobStatus, reason: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            label: instance.label(),
            job_id: instance.job_id().to_string(),
            display_name: instance.display_name().to_string(),
            matrix: instance.matrix().clone(),
            status,
            steps: Vec::new(),
            outputs: BTreeMap::new(),
            error: None,
            reason: Some(reason.into()),
            started_at: now,
            completed_at: now,
        }
    }

    /// Steps actually handed to the executor
    pub fn executed_steps(&self) -> Vec<&str> {
        self.steps
            .iter()
            .filter(|step| step.state.was_executed())
            .map(|step| step.id.as_str())
            .collect()
    }

    pub fn step(&self, id: &str) -> Option<&StepReport> {
        self.steps.iter().find(|step| step.id == id)
    }
}

/// Progress of a running pipeline
#[derive(Debug, Clone, Serialize)]
pub struct PipelineState {
    /// Unique execution ID
    pub execution_id: Uuid,

    /// Current execution status
    pub status: ExecutionStatus,

    /// When execution started
    pub started_at: Option<DateTime<Utc>>,

    /// When execution finished
    pub completed_at: Option<DateTime<Utc>>,

    /// Total number of instances
    pub total_instances: usize,

    /// Number of finished instances, whatever their status
    pub finished_instances: usize,

    /// Number of failed instances
    pub failed_instances: usize,

    /// Number of currently running instances
    pub running_instances: usize,
}

impl PipelineState {
    /// Create a new pipeline state
    pub fn new() -> Self {
        Self {
            execution_id: Uuid::new_v4(),
            status: ExecutionStatus::Pending,
            started_at: None,
            completed_at: None,
            total_instances: 0,
            finished_instances: 0,
            failed_instances: 0,
            running_instances: 0,
        }
    }

    /// Mark pipeline as started
    pub fn start(&mut self, total_instances: usize) {
        self.status = ExecutionStatus::Running;
        self.started_at = Some(Utc::now());
        self.total_instances = total_instances;
    }

    pub fn instance_started(&mut self) {
        self.running_instances += 1;
    }

    /// Record a finished instance; `was_running` is false for instances skipped without a task
    pub fn instance_finished(&mut self, status: JobStatus, was_running: bool) {
        if was_running {
            self.running_instances = self.running_instances.saturating_sub(1);
        }
        self.finished_instances += 1;
        if status.is_failure() {
            self.failed_instances += 1;
        }
    }

    /// Settle the final status from the collected results
    pub fn finish(&mut self, results: &[JobResult]) {
        self.status = overall_status(results);
        self.completed_at = Some(Utc::now());
    }

    /// Calculate progress percentage (0.0 to 1.0)
    pub fn progress(&self) -> f64 {
        if self.total_instances == 0 {
            return 0.0;
        }
        self.finished_instances as f64 / self.total_instances as f64
    }
}

impl Default for PipelineState {
    fn default() -> Self {
        Self::new()
    }
}

/// Success iff every instance that was not skipped succeeded
pub fn overall_status(results: &[JobResult]) -> ExecutionStatus {
    if results.iter().any(|r| r.status == JobStatus::Cancelled) {
        ExecutionStatus::Cancelled
    } else if results.iter().any(|r| r.status.is_failure()) {
        ExecutionStatus::Failed
    } else {
        ExecutionStatus::Succeeded
    }
}

/// Result of running a whole pipeline
#[derive(Debug, Clone, Serialize)]
pub struct PipelineResult {
    pub run_id: Uuid,
    pub pipeline: String,
    pub status: ExecutionStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    /// In evaluation order, whatever order the instances finished in
    pub jobs: Vec<JobResult>,
}

impl PipelineResult {
    pub fn is_success(&self) -> bool {
        self.status == ExecutionStatus::Succeeded
    }

    /// Instances that failed, for attribution
    pub fn failures(&self) -> Vec<&JobResult> {
        self.jobs.iter().filter(|job| job.status.is_failure()).collect()
    }

    pub fn job(&self, label: &str) -> Option<&JobResult> {
        self.jobs.iter().find(|job| job.label == label)
    }

    pub fn count(&self, status: JobStatus) -> usize {
        self.jobs.iter().filter(|job| job.status == status).count()
    }
}
