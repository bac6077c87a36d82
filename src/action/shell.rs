//! Runs inline `run:` scripts as local subprocesses

use crate::action::{ActionError, ResolvedStep, StepExecutor, StepOutcome};
use crate::core::step::{RUN_ACTION, SCRIPT_PARAM};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tokio::process::Command;
use tracing::{debug, warn};

const SET_OUTPUT_PREFIX: &str = "::set-output name=";

/// Executor for `run` steps backed by a shell
///
/// `uses:` actions have no local implementation and are reported as
/// unsupported. Lines of the form `::set-output name=<name>::<value>` on
/// stdout become step outputs.
#[derive(Debug, Clone)]
pub struct ShellExecutor {
    /// Shell executable, invoked as `<shell> -c <script>`
    shell: String,

    /// Working directory for every script
    working_dir: Option<PathBuf>,
}

impl Default for ShellExecutor {
    fn default() -> Self {
        Self::new("sh")
    }
}

impl ShellExecutor {
    pub fn new(shell: impl Into<String>) -> Self {
        Self {
            shell: shell.into(),
            working_dir: None,
        }
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }
}

#[async_trait]
impl StepExecutor for ShellExecutor {
    async fn execute(&self, step: &ResolvedStep) -> Result<StepOutcome, ActionError> {
        if step.action != RUN_ACTION {
            return Err(ActionError::Unsupported(step.action.clone()));
        }
        let script = step
            .param(SCRIPT_PARAM)
            .ok_or_else(|| ActionError::Internal(format!("step '{}' has no script", step.id)))?;

        debug!("Spawning {} for step '{}' ({} bytes of script)", self.shell, step.id, script.len());

        let mut command = Command::new(&self.shell);
        command
            .arg("-c")
            .arg(script)
            .envs(step.env.iter().map(|(k, v)| (k, v.expose())))
            .kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }

        let output = command
            .output()
            .await
            .map_err(|e| ActionError::Internal(format!("Failed to spawn {}: {}", self.shell, e)))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let outputs = parse_outputs(&stdout);
        debug!(
            "Step '{}' wrote {} bytes of output, {} named outputs",
            step.id,
            output.stdout.len(),
            outputs.len()
        );

        if !output.status.success() {
            let exit_code = output.status.code().unwrap_or(-1);
            warn!("Step '{}' of {} exited with code {}", step.id, step.instance, exit_code);
            let stderr = String::from_utf8_lossy(&output.stderr);
            let message = match stderr.trim().lines().last() {
                Some(line) => format!("exited with code {}: {}", exit_code, line),
                None => format!("exited with code {}", exit_code),
            };
            return Ok(StepOutcome {
                outputs,
                ..StepOutcome::failure(message)
            });
        }

        Ok(StepOutcome {
            outputs,
            ..StepOutcome::success()
        })
    }
}

/// Collect `::set-output name=<name>::<value>` lines; later lines win
fn parse_outputs(stdout: &str) -> BTreeMap<String, String> {
    stdout
        .lines()
        .filter_map(|line| line.trim().strip_prefix(SET_OUTPUT_PREFIX))
        .filter_map(|rest| rest.split_once("::"))
        .map(|(name, value)| (name.to_string(), value.to_string()))
        .collect()
}
