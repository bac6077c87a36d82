use anyhow::{Context, Result};
use ci_engine::{
    action::{DryRunExecutor, StepExecutor},
    cli::{
        commands::{EvaluationArgs, PlanCommand, RunCommand, ValidateCommand},
        output::*,
        Cli, Command,
    },
    core::{evaluate_with_env, EnvSecrets, JobInstance, PipelineDefinition, SecretProvider},
    execution::{ExecutionEngine, ExecutionEvent},
};
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::from_args();

    // RUST_LOG wins over the verbosity flag
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow::anyhow!(e))
        .context("Failed to set logging subscriber")?;

    let success = match &cli.command {
        Command::Validate(cmd) => validate_pipeline(cmd)?,
        Command::Plan(cmd) => plan_pipeline(cmd)?,
        Command::Run(cmd) => run_pipeline(cmd).await?,
    };

    if !success {
        std::process::exit(1);
    }
    Ok(())
}

fn load(file: &str) -> Result<PipelineDefinition> {
    PipelineDefinition::from_file(file).with_context(|| format!("Failed to load pipeline '{}'", file))
}

fn evaluate_args(definition: &PipelineDefinition, args: &EvaluationArgs) -> Vec<JobInstance> {
    let secrets: Arc<dyn SecretProvider> = Arc::new(EnvSecrets::new(args.secret.iter().cloned()));
    evaluate_with_env(definition, &args.trigger_event(), secrets, &args.env_overrides())
}

fn validate_pipeline(cmd: &ValidateCommand) -> Result<bool> {
    let definition = match PipelineDefinition::from_file(&cmd.file) {
        Ok(definition) => definition,
        Err(e) => {
            println!("{} Validation failed:", CROSS);
            println!("  {}", style(e).red());
            return Ok(false);
        }
    };

    if cmd.json {
        let jobs: Vec<_> = definition
            .jobs
            .values()
            .map(|job| {
                json!({
                    "id": job.id,
                    "needs": job.needs,
                    "steps": job.steps.iter().map(|step| step.id.as_str()).collect::<Vec<_>>(),
                    "instances": job.instance_count(),
                    "timeout_secs": job.timeout_secs,
                })
            })
            .collect();
        let data = json!({
            "name": definition.name,
            "triggers": definition.triggers.iter().map(ToString::to_string).collect::<Vec<_>>(),
            "jobs": jobs,
        });
        println!("{}", serde_json::to_string_pretty(&data)?);
        return Ok(true);
    }

    println!("{} Pipeline configuration is valid!", CHECK);
    println!("  Name: {}", style(&definition.name).bold());
    println!("  Jobs: {}", style(definition.jobs.len()).cyan());
    println!("  Instances: {}", style(definition.instance_count()).cyan());
    for job in definition.jobs.values() {
        let needs = if job.needs.is_empty() {
            String::new()
        } else {
            format!(" (needs {})", job.needs.join(", "))
        };
        println!(
            "    {} {} steps, {} instances{}",
            style(&job.id).bold(),
            job.steps.len(),
            job.instance_count(),
            style(needs).dim()
        );
    }
    Ok(true)
}

fn plan_pipeline(cmd: &PlanCommand) -> Result<bool> {
    let definition = load(&cmd.eval.file)?;
    let instances = evaluate_args(&definition, &cmd.eval);

    let planned: Vec<(JobInstance, Result<bool, String>)> = instances
        .into_iter()
        .map(|instance| {
            let guard = instance
                .prepare_context()
                .map(|ctx| instance.guard_allows(&ctx))
                .map_err(|e| e.to_string());
            (instance, guard)
        })
        .collect();

    if cmd.json {
        let data: Vec<_> = planned
            .iter()
            .map(|(instance, guard)| {
                json!({
                    "label": instance.label(),
                    "job": instance.job_id(),
                    "name": instance.display_name(),
                    "matrix": instance.matrix(),
                    "guard": match guard {
                        Ok(allowed) => json!(allowed),
                        Err(reason) => json!({ "error": reason }),
                    },
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&json!({ "instances": data }))?);
        return Ok(true);
    }

    if planned.is_empty() {
        println!(
            "{} Pipeline {} is not triggered by {}",
            INFO,
            style(&definition.name).bold(),
            cmd.eval.event
        );
        return Ok(true);
    }

    println!("{} {} instances of {}:", INFO, planned.len(), style(&definition.name).bold());
    for (instance, guard) in planned {
        println!("{}", format_planned_instance(&instance, guard));
    }
    Ok(true)
}

async fn run_pipeline(cmd: &RunCommand) -> Result<bool> {
    let definition = load(&cmd.eval.file)?;
    let instances = evaluate_args(&definition, &cmd.eval);
    info!("Loaded pipeline '{}' ({} instances)", definition.name, instances.len());

    let executor: Arc<dyn StepExecutor> = if cmd.dry_run {
        Arc::new(DryRunExecutor)
    } else {
        Arc::new(cmd.shell_executor())
    };

    let progress = create_progress_bar(instances.len());
    let handler_progress = progress.clone();
    let quiet = cmd.json;
    let engine = ExecutionEngine::new(executor, cmd.scheduling_strategy()).with_event_handler(move |event| {
        if let ExecutionEvent::InstanceFinished { label, .. } = &event {
            handler_progress.inc(1);
            handler_progress.set_message(label.clone());
        }
        if !quiet {
            handler_progress.println(format_execution_event(&event));
        }
    });

    let cancellation = engine.cancellation();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling remaining steps");
            cancellation.cancel();
        }
    });

    let result = engine.execute(&definition.name, instances).await;
    progress.finish_and_clear();

    if cmd.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        println!();
        for job in &result.jobs {
            println!("{}", format_job_result(job));
        }
        println!("\n{}", format_pipeline_summary(&result));
    }

    Ok(result.is_success())
}
