//! CLI command definitions

use crate::action::ShellExecutor;
use crate::core::trigger::{EventKind, TriggerEvent};
use crate::execution::SchedulingStrategy;
use clap::Args;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Load a pipeline and report its structure
#[derive(Debug, Args, Clone)]
pub struct ValidateCommand {
    /// Path to pipeline YAML file
    #[arg(short, long)]
    pub file: String,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Arguments shared by every command that evaluates a pipeline
#[derive(Debug, Args, Clone)]
pub struct EvaluationArgs {
    /// Path to pipeline YAML file
    #[arg(short, long)]
    pub file: String,

    /// Triggering event kind
    #[arg(long, default_value = "push")]
    pub event: String,

    /// Branch of the triggering event
    #[arg(long)]
    pub branch: Option<String>,

    /// Environment overrides (KEY=VALUE)
    #[arg(long, value_parser = parse_key_value)]
    pub env: Vec<(String, String)>,

    /// Secret names to read from the process environment
    #[arg(long)]
    pub secret: Vec<String>,
}

impl EvaluationArgs {
    pub fn trigger_event(&self) -> TriggerEvent {
        let kind = match self.event.parse::<EventKind>() {
            Ok(kind) => kind,
            Err(never) => match never {},
        };
        let event = TriggerEvent::new(kind);
        match &self.branch {
            Some(branch) => event.with_branch(branch.clone()),
            None => event,
        }
    }

    pub fn env_overrides(&self) -> BTreeMap<String, String> {
        self.env.iter().cloned().collect()
    }
}

/// List the instances an event would produce
#[derive(Debug, Args, Clone)]
pub struct PlanCommand {
    #[command(flatten)]
    pub eval: EvaluationArgs,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Evaluate a pipeline and execute its instances
#[derive(Debug, Args, Clone)]
pub struct RunCommand {
    #[command(flatten)]
    pub eval: EvaluationArgs,

    /// Scheduling strategy
    #[arg(long, value_enum, default_value_t = SchedulingStrategyArg::Parallel)]
    pub strategy: SchedulingStrategyArg,

    /// Concurrency limit for the parallel-limited strategy
    #[arg(long, default_value_t = 4)]
    pub max_parallel: usize,

    /// Log each step instead of executing it
    #[arg(long)]
    pub dry_run: bool,

    /// Shell used for `run:` steps
    #[arg(long, default_value = "sh")]
    pub shell: String,

    /// Directory `run:` steps execute in
    #[arg(long)]
    pub working_dir: Option<PathBuf>,

    /// Print the pipeline result as JSON
    #[arg(long)]
    pub json: bool,
}

impl RunCommand {
    pub fn shell_executor(&self) -> ShellExecutor {
        let executor = ShellExecutor::new(self.shell.clone());
        match &self.working_dir {
            Some(dir) => executor.with_working_dir(dir.clone()),
            None => executor,
        }
    }

    pub fn scheduling_strategy(&self) -> SchedulingStrategy {
        match self.strategy {
            SchedulingStrategyArg::Sequential => SchedulingStrategy::Sequential,
            SchedulingStrategyArg::Parallel => SchedulingStrategy::Parallel,
            SchedulingStrategyArg::ParallelLimited => SchedulingStrategy::LimitedParallel(self.max_parallel),
        }
    }
}

/// Scheduling strategy argument
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum SchedulingStrategyArg {
    Sequential,
    Parallel,
    #[clap(name = "parallel-limited")]
    ParallelLimited,
}

/// Parse key=value pairs
pub fn parse_key_value(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("Invalid key=value pair: {}", s)),
    }
}
