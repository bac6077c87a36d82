//! Executor that only reports what would run

use crate::action::{ActionError, ResolvedStep, StepExecutor, StepOutcome};
use async_trait::async_trait;
use tracing::info;

/// Logs each step and reports success without running anything
#[derive(Debug, Clone, Copy, Default)]
pub struct DryRunExecutor;

#[async_trait]
impl StepExecutor for DryRunExecutor {
    async fn execute(&self, step: &ResolvedStep) -> Result<StepOutcome, ActionError> {
        let params: Vec<String> = step
            .params
            .iter()
            .map(|(name, value)| format!("{}={}", name, value))
            .collect();
        info!(
            "[dry-run] {} / {}: {} {}",
            step.instance,
            step.name,
            step.action,
            params.join(" ")
        );
        Ok(StepOutcome::success())
    }
}
