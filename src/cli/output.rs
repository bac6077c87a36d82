//! CLI output formatting

use crate::{
    core::{ExecutionStatus, JobInstance, JobResult, JobStatus, PipelineResult, StepState},
    execution::ExecutionEvent,
};
use console::Emoji;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

// Re-export style
pub use console::style;

// Emojis for output
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "✓ ");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "✗ ");
pub static SPINNER: Emoji<'_, '_> = Emoji("⏳ ", "~ ");
pub static INFO: Emoji<'_, '_> = Emoji("ℹ️  ", "i ");
pub static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "!");
pub static ROCKET: Emoji<'_, '_> = Emoji("🚀 ", "> ");
pub static SKIP: Emoji<'_, '_> = Emoji("⏭️  ", "- ");

/// Create a progress bar counting finished instances
pub fn create_progress_bar(total: usize) -> ProgressBar {
    let progress = ProgressBar::new(total as u64);
    let style = ProgressStyle::with_template(
        "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}",
    )
    .unwrap_or_else(|_| ProgressStyle::default_bar())
    .progress_chars("#>-");
    progress.set_style(style);
    progress.enable_steady_tick(Duration::from_millis(100));
    progress
}

/// Format a step state for display
pub fn format_step_state(state: &StepState) -> String {
    match state {
        StepState::Succeeded { .. } => style("SUCCEEDED").green().to_string(),
        StepState::Failed { .. } => style("FAILED").red().to_string(),
        StepState::Skipped { .. } => style("SKIPPED").dim().to_string(),
        StepState::NotRun => style("NOT RUN").dim().to_string(),
        StepState::Cancelled => style("CANCELLED").yellow().to_string(),
    }
}

/// Format a pipeline status for display
pub fn format_status(status: ExecutionStatus) -> String {
    match status {
        ExecutionStatus::Pending => style("PENDING").dim().to_string(),
        ExecutionStatus::Running => style("RUNNING").yellow().to_string(),
        ExecutionStatus::Succeeded => style("SUCCEEDED").green().to_string(),
        ExecutionStatus::Failed => style("FAILED").red().to_string(),
        ExecutionStatus::Cancelled => style("CANCELLED").yellow().to_string(),
    }
}

/// Format an instance status for display
pub fn format_job_status(status: JobStatus) -> String {
    match status {
        JobStatus::Success => style("SUCCESS").green().to_string(),
        JobStatus::Failure => style("FAILURE").red().to_string(),
        JobStatus::SkippedEntirely => style("SKIPPED ENTIRELY").dim().to_string(),
        JobStatus::Skipped => style("SKIPPED").dim().to_string(),
        JobStatus::Cancelled => style("CANCELLED").yellow().to_string(),
    }
}

fn job_icon(status: JobStatus) -> Emoji<'static, 'static> {
    match status {
        JobStatus::Success => CHECK,
        JobStatus::Failure => CROSS,
        JobStatus::SkippedEntirely | JobStatus::Skipped => SKIP,
        JobStatus::Cancelled => WARN,
    }
}

/// Format an execution event for display
pub fn format_execution_event(event: &ExecutionEvent) -> String {
    match event {
        ExecutionEvent::PipelineStarted {
            execution_id,
            pipeline_name,
            instances,
        } => format!(
            "{} Starting pipeline {} ({}, {} instances)",
            ROCKET,
            style(pipeline_name).bold(),
            style(&execution_id.to_string()[..8]).dim(),
            instances
        ),
        ExecutionEvent::InstanceStarted { label } => {
            format!("{} {}", SPINNER, style(label).bold())
        }
        ExecutionEvent::StepStarted { instance, name, .. } => {
            format!("{} {} {}", SPINNER, style(instance).dim(), style(name).cyan())
        }
        ExecutionEvent::StepCompleted { instance, step_id } => {
            format!("{} {} {}", CHECK, style(instance).dim(), style(step_id).green())
        }
        ExecutionEvent::StepSkipped {
            instance,
            step_id,
            reason,
        } => format!(
            "{} {} {} ({})",
            SKIP,
            style(instance).dim(),
            style(step_id).dim(),
            reason
        ),
        ExecutionEvent::StepFailed {
            instance,
            step_id,
            error,
        } => format!(
            "{} {} {}: {}",
            CROSS,
            style(instance).dim(),
            style(step_id).red(),
            style(error).dim()
        ),
        ExecutionEvent::InstanceFinished { label, status } => format!(
            "{} {} {}",
            job_icon(*status),
            style(label).bold(),
            format_job_status(*status)
        ),
        ExecutionEvent::PipelineCompleted {
            execution_id,
            status,
        } => format!(
            "{} Pipeline ({}) {}",
            INFO,
            style(&execution_id.to_string()[..8]).dim(),
            format_status(*status)
        ),
    }
}

/// One line per planned instance
pub fn format_planned_instance(instance: &JobInstance, guard: Result<bool, String>) -> String {
    let state = match guard {
        Ok(true) => style("will run").green().to_string(),
        Ok(false) => style("guard is false").dim().to_string(),
        Err(reason) => style(format!("unresolved: {}", reason)).red().to_string(),
    };
    format!(
        "  {} {} [{}]",
        style(instance.label()).bold(),
        style(format!("\"{}\"", instance.display_name())).dim(),
        state
    )
}

/// Format one instance result with its steps
pub fn format_job_result(result: &JobResult) -> String {
    let mut lines = vec![format!(
        "{} {} {}",
        job_icon(result.status),
        style(&result.label).bold(),
        format_job_status(result.status)
    )];

    if let Some(reason) = &result.reason {
        lines.push(format!("    {}", style(reason).dim()));
    }
    if let Some(error) = &result.error {
        lines.push(format!("    {}", style(error).red()));
    }
    for step in &result.steps {
        lines.push(format!("    {} {}", format_step_state(&step.state), step.name));
    }

    lines.join("\n")
}

/// Format the final summary of a run
pub fn format_pipeline_summary(result: &PipelineResult) -> String {
    let mut lines = vec![format!(
        "{} {} {} ({} succeeded, {} failed, {} skipped, {} cancelled)",
        if result.is_success() { CHECK } else { CROSS },
        style(&result.pipeline).bold(),
        format_status(result.status),
        style(result.count(JobStatus::Success)).green(),
        style(result.count(JobStatus::Failure)).red(),
        result.count(JobStatus::Skipped) + result.count(JobStatus::SkippedEntirely),
        result.count(JobStatus::Cancelled),
    )];

    for failure in result.failures() {
        let detail = failure
            .error
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_default();
        lines.push(format!("  {} {} {}", CROSS, style(&failure.label).red(), style(detail).dim()));
    }

    lines.join("\n")
}
