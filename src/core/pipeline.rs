//! Pipeline domain model

use crate::core::{
    condition::{Expr, Reference},
    config::{scalar_to_string, JobConfig, PipelineConfig, TriggersConfig},
    error::SchemaError,
    matrix::{MatrixSpec, Variant},
    step::{parse_guard, parse_template, templates_from_yaml, StepDefinition},
    template::Template,
    trigger::{EventKind, Trigger, TriggerEvent},
};
use indexmap::IndexMap;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

/// Step timeout when neither step, job nor pipeline sets one
pub const DEFAULT_TIMEOUT_SECS: u64 = 3600;

/// A validated pipeline definition
#[derive(Debug, Clone)]
pub struct PipelineDefinition {
    /// Pipeline name
    pub name: String,

    /// Triggers; empty means every event starts the pipeline
    pub triggers: Vec<Trigger>,

    /// Environment defaults merged into every instance
    pub env: BTreeMap<String, String>,

    /// Jobs by id, in document order (listing only, never an ordering)
    pub jobs: IndexMap<String, Arc<JobDefinition>>,
}

/// A job as declared, before matrix expansion
#[derive(Debug, Clone)]
pub struct JobDefinition {
    pub id: String,

    /// Display name template
    pub name: Option<Template>,

    /// Jobs whose instances must all succeed first
    pub needs: Vec<String>,

    /// Job-level guard
    pub guard: Option<Expr>,

    /// Job environment templates, layered over the pipeline env
    pub env: IndexMap<String, Template>,

    pub matrix: Option<MatrixSpec>,

    pub steps: Vec<StepDefinition>,

    /// Effective default step timeout for this job
    pub timeout_secs: u64,
}

impl JobDefinition {
    /// Timeout for one of this job's steps
    pub fn step_timeout_secs(&self, step: &StepDefinition) -> u64 {
        step.timeout_secs.unwrap_or(self.timeout_secs)
    }

    /// Number of instances the matrix expands to
    pub fn instance_count(&self) -> usize {
        self.matrix.as_ref().map_or(1, MatrixSpec::len)
    }
}

impl PipelineDefinition {
    /// Load and validate a pipeline definition from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, SchemaError> {
        let config = PipelineConfig::from_file(path)?;
        Self::from_config(&config)
    }

    /// Parse and validate a pipeline definition from a YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self, SchemaError> {
        let config = PipelineConfig::from_yaml(yaml)?;
        Self::from_config(&config)
    }

    /// Build the domain model from an already structurally valid config
    pub fn from_config(config: &PipelineConfig) -> Result<Self, SchemaError> {
        let triggers = build_triggers(config.triggers.as_ref())?;

        let mut env = BTreeMap::new();
        for (key, value) in &config.env {
            let value = scalar_to_string(value).ok_or_else(|| SchemaError::InvalidExpression {
                location: format!("pipeline '{}' env", config.name),
                expression: key.clone(),
                reason: "value must be a scalar".to_string(),
            })?;
            env.insert(key.clone(), value);
        }

        let default_timeout = config.defaults.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS);

        let mut jobs = IndexMap::new();
        for (job_id, job_config) in config.jobs.iter() {
            let job = build_job(job_id, job_config, default_timeout)?;
            check_job_references(&job, &env)?;
            jobs.insert(job_id.clone(), Arc::new(job));
        }

        Ok(PipelineDefinition {
            name: config.name.clone(),
            triggers,
            env,
            jobs,
        })
    }

    /// Whether `event` starts this pipeline
    pub fn is_triggered_by(&self, event: &TriggerEvent) -> bool {
        self.triggers.is_empty() || self.triggers.iter().any(|t| t.matches(event))
    }

    /// Get a job by ID
    pub fn job(&self, id: &str) -> Option<&Arc<JobDefinition>> {
        self.jobs.get(id)
    }

    /// Total number of instances across all jobs
    pub fn instance_count(&self) -> usize {
        self.jobs.values().map(|job| job.instance_count()).sum()
    }
}

fn build_triggers(config: Option<&TriggersConfig>) -> Result<Vec<Trigger>, SchemaError> {
    let parse_kind = |name: &str| -> Result<EventKind, SchemaError> {
        if name.trim().is_empty() {
            return Err(SchemaError::InvalidTrigger {
                trigger: name.to_string(),
                reason: "event name is empty".to_string(),
            });
        }
        match name.parse::<EventKind>() {
            Ok(kind) => Ok(kind),
            Err(never) => match never {},
        }
    };

    match config {
        None => Ok(Vec::new()),
        Some(TriggersConfig::Single(name)) => Ok(vec![Trigger::new(parse_kind(name)?)]),
        Some(TriggersConfig::List(names)) => names
            .iter()
            .map(|name| parse_kind(name).map(Trigger::new))
            .collect(),
        Some(TriggersConfig::Filtered(map)) => map
            .iter()
            .map(|(name, filter)| {
                let kind = parse_kind(name)?;
                match filter {
                    Some(filter) => {
                        Trigger::with_filters(kind, &filter.branches, &filter.branches_ignore)
                    }
                    None => Ok(Trigger::new(kind)),
                }
            })
            .collect(),
    }
}

fn build_job(id: &str, config: &JobConfig, default_timeout: u64) -> Result<JobDefinition, SchemaError> {
    let location = format!("job '{}'", id);

    let matrix = match config.strategy.as_ref().and_then(|s| s.matrix.as_ref()) {
        Some(axes) => {
            let mut parsed = Vec::with_capacity(axes.len());
            for (axis, value) in axes.iter() {
                if axis == "include" || axis == "exclude" {
                    return Err(SchemaError::MalformedMatrix {
                        job: id.to_string(),
                        axis: axis.clone(),
                        reason: "is not supported".to_string(),
                    });
                }
                let variants = match value {
                    serde_yaml::Value::Sequence(items) => items
                        .iter()
                        .map(|item| Variant::from_yaml(id, axis, item))
                        .collect::<Result<Vec<_>, _>>()?,
                    _ => {
                        return Err(SchemaError::MalformedMatrix {
                            job: id.to_string(),
                            axis: axis.clone(),
                            reason: "must be a list of variants".to_string(),
                        })
                    }
                };
                parsed.push((axis.clone(), variants));
            }
            Some(MatrixSpec::new(id, parsed)?)
        }
        None => None,
    };

    let steps = config
        .steps
        .iter()
        .enumerate()
        .map(|(index, step)| StepDefinition::from_config(id, index, step))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(JobDefinition {
        id: id.to_string(),
        name: config
            .name
            .as_ref()
            .map(|name| parse_template(&location, name))
            .transpose()?,
        needs: config.needs.to_vec(),
        guard: config
            .condition
            .as_ref()
            .map(|condition| parse_guard(&location, &condition.source()))
            .transpose()?,
        env: templates_from_yaml(&location, &config.env)?,
        matrix,
        steps,
        timeout_secs: config.timeout_secs.unwrap_or(default_timeout),
    })
}

/// Where a reference appears, which decides what it may name
struct Scope<'a> {
    location: String,
    /// Steps of the job that run before this point
    earlier_steps: &'a [StepDefinition],
    /// Env keys declared at this point
    env_keys: Vec<&'a str>,
    /// Name templates are rendered before the job exists
    name_template: bool,
}

fn check_job_references(job: &JobDefinition, pipeline_env: &BTreeMap<String, String>) -> Result<(), SchemaError> {
    let mut job_env_keys: Vec<&str> = pipeline_env.keys().map(String::as_str).collect();

    let name_scope = Scope {
        location: format!("job '{}' name", job.id),
        earlier_steps: &[],
        env_keys: job_env_keys.clone(),
        name_template: true,
    };
    if let Some(name) = &job.name {
        check_template(job, &name_scope, name, false)?;
    }

    job_env_keys.extend(job.env.keys().map(String::as_str));
    let job_scope = Scope {
        location: format!("job '{}'", job.id),
        earlier_steps: &[],
        env_keys: job_env_keys.clone(),
        name_template: false,
    };
    for template in job.env.values() {
        check_template(job, &job_scope, template, false)?;
    }
    if let Some(guard) = &job.guard {
        check_guard(job, &job_scope, guard)?;
    }

    for (index, step) in job.steps.iter().enumerate() {
        // The guard runs before the step env is rendered
        let mut scope = Scope {
            location: format!("job '{}' step '{}'", job.id, step.id),
            earlier_steps: &job.steps[..index],
            env_keys: job_env_keys.clone(),
            name_template: false,
        };
        if let Some(guard) = &step.guard {
            check_guard(job, &scope, guard)?;
        }
        for template in step.env.values() {
            check_template(job, &scope, template, true)?;
        }
        scope.env_keys.extend(step.env.keys().map(String::as_str));
        for template in step.params.values() {
            check_template(job, &scope, template, true)?;
        }
    }

    Ok(())
}

fn check_guard(job: &JobDefinition, scope: &Scope, guard: &Expr) -> Result<(), SchemaError> {
    for reference in guard.references() {
        if let Reference::Secret(name) = reference {
            return Err(unresolved(
                scope,
                reference,
                format!("secret values cannot be read in a guard, use isSet({})", name),
            ));
        }
        check_reference(job, scope, reference)?;
    }
    Ok(())
}

fn check_template(
    job: &JobDefinition,
    scope: &Scope,
    template: &Template,
    secrets_allowed: bool,
) -> Result<(), SchemaError> {
    for (reference, standalone) in template.references() {
        if let Reference::Secret(_) = reference {
            if !secrets_allowed {
                return Err(unresolved(
                    scope,
                    reference,
                    "secrets may only be passed to step parameters and step env".to_string(),
                ));
            }
            if !standalone {
                return Err(unresolved(
                    scope,
                    reference,
                    "a secret must be the whole placeholder".to_string(),
                ));
            }
            continue;
        }
        check_reference(job, scope, reference)?;
    }
    Ok(())
}

fn check_reference(job: &JobDefinition, scope: &Scope, reference: &Reference) -> Result<(), SchemaError> {
    match reference {
        Reference::Matrix { axis, field } => {
            let declared = job.matrix.as_ref().and_then(|m| m.axis(axis)).ok_or_else(|| {
                unresolved(scope, reference, format!("job has no matrix axis '{}'", axis))
            })?;
            if let Some(field) = field {
                if !declared.declares_field(field) {
                    return Err(unresolved(
                        scope,
                        reference,
                        format!("no variant of axis '{}' has field '{}'", axis, field),
                    ));
                }
            }
            Ok(())
        }
        Reference::Bare(name) => {
            let in_matrix = job.matrix.as_ref().is_some_and(|m| {
                m.axis(name).is_some() || m.axes().iter().any(|axis| axis.declares_field(name))
            });
            if in_matrix || scope.env_keys.contains(&name.as_str()) {
                Ok(())
            } else {
                Err(unresolved(
                    scope,
                    reference,
                    "not a matrix axis, a variant field or a declared env variable".to_string(),
                ))
            }
        }
        Reference::StepOutput { step, .. } => {
            if scope.earlier_steps.iter().any(|s| &s.id == step) {
                Ok(())
            } else {
                Err(unresolved(
                    scope,
                    reference,
                    format!("'{}' is not an earlier step of this job", step),
                ))
            }
        }
        Reference::Job(_) if scope.name_template => Err(unresolved(
            scope,
            reference,
            "the job name cannot refer to itself".to_string(),
        )),
        Reference::Env(_) | Reference::Event(_) | Reference::Job(_) | Reference::Secret(_) => Ok(()),
    }
}

fn unresolved(scope: &Scope, reference: &Reference, reason: String) -> SchemaError {
    SchemaError::UnresolvedReference {
        location: scope.location.clone(),
        reference: reference.to_string(),
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LINT: &str = r#"
name: CI
on: [push, pull_request]
env:
  CARGO_TERM_COLOR: always
jobs:
  lint:
    name: "Lint (${{ matrix.features.name }})"
    strategy:
      matrix:
        features:
          - name: all features
            value: --all-features
            check_formatting: true
          - name: no_std
            value: --no-default-features
    steps:
      - uses: actions/checkout@v2
      - id: clippy
        run: cargo clippy ${{ matrix.features.value }}
      - name: Check formatting
        if: check_formatting
        run: cargo fmt --all -- --check
"#;

    #[test]
    fn test_load_lint_job() {
        let pipeline = PipelineDefinition::from_yaml(LINT).unwrap();
        assert_eq!(pipeline.name, "CI");
        assert_eq!(pipeline.triggers.len(), 2);
        assert_eq!(pipeline.env["CARGO_TERM_COLOR"], "always");

        let lint = pipeline.job("lint").unwrap();
        assert_eq!(lint.steps.len(), 3);
        assert_eq!(lint.instance_count(), 2);
        assert_eq!(lint.timeout_secs, DEFAULT_TIMEOUT_SECS);
        assert_eq!(pipeline.instance_count(), 2);
    }

    #[test]
    fn test_timeout_precedence() {
        let yaml = r#"
name: CI
defaults:
  timeout_secs: 600
jobs:
  a:
    steps:
      - run: "true"
      - run: "true"
        timeout_secs: 5
  b:
    timeout_secs: 60
    steps:
      - run: "true"
"#;
        let pipeline = PipelineDefinition::from_yaml(yaml).unwrap();
        let a = pipeline.job("a").unwrap();
        assert_eq!(a.step_timeout_secs(&a.steps[0]), 600);
        assert_eq!(a.step_timeout_secs(&a.steps[1]), 5);
        let b = pipeline.job("b").unwrap();
        assert_eq!(b.step_timeout_secs(&b.steps[0]), 60);
    }

    #[test]
    fn test_no_triggers_matches_everything() {
        let pipeline =
            PipelineDefinition::from_yaml("name: x\njobs:\n  a:\n    steps: [{ run: 'true' }]\n").unwrap();
        assert!(pipeline.is_triggered_by(&TriggerEvent::new(EventKind::Schedule)));
    }

    fn expect_unresolved(yaml: &str) -> String {
        match PipelineDefinition::from_yaml(yaml) {
            Err(SchemaError::UnresolvedReference { reference, .. }) => reference,
            other => panic!("Expected an unresolved reference, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_axis_is_load_error() {
        let yaml = r#"
name: CI
jobs:
  test:
    strategy:
      matrix:
        rust: [stable, beta]
    steps:
      - run: cargo +${{ matrix.toolchain }} test
"#;
        assert_eq!(expect_unresolved(yaml), "matrix.toolchain");
    }

    #[test]
    fn test_field_absent_on_some_variants_is_allowed() {
        // Declared on one variant is enough; the other sees undefined
        assert!(PipelineDefinition::from_yaml(LINT).is_ok());

        let yaml = LINT.replace("if: check_formatting", "if: check_format");
        assert_eq!(expect_unresolved(&yaml), "check_format");
    }

    #[test]
    fn test_secret_value_in_guard_rejected() {
        let yaml = r#"
name: CI
jobs:
  coverage:
    steps:
      - uses: codecov/codecov-action@v1
        if: secrets.CODECOV_TOKEN
"#;
        assert_eq!(expect_unresolved(yaml), "secrets.CODECOV_TOKEN");
    }

    #[test]
    fn test_secret_in_job_env_rejected() {
        let yaml = r#"
name: CI
jobs:
  coverage:
    env:
      TOKEN: ${{ secrets.CODECOV_TOKEN }}
    steps:
      - run: "true"
"#;
        assert_eq!(expect_unresolved(yaml), "secrets.CODECOV_TOKEN");
    }

    #[test]
    fn test_secret_must_be_whole_placeholder() {
        let yaml = r#"
name: CI
jobs:
  coverage:
    steps:
      - uses: codecov/codecov-action@v1
        with:
          token: "Bearer ${{ secrets.CODECOV_TOKEN }}"
          plain: ${{ secrets.CODECOV_TOKEN || 'none' }}
"#;
        assert_eq!(expect_unresolved(yaml), "secrets.CODECOV_TOKEN");

        let ok = r#"
name: CI
jobs:
  coverage:
    steps:
      - uses: codecov/codecov-action@v1
        with:
          token: ${{ secrets.CODECOV_TOKEN }}
"#;
        assert!(PipelineDefinition::from_yaml(ok).is_ok());
    }

    #[test]
    fn test_step_output_must_come_from_earlier_step() {
        let yaml = r#"
name: CI
jobs:
  build:
    steps:
      - run: echo ${{ steps.version.outputs.value }}
      - id: version
        run: echo "::set-output name=value::1.0"
"#;
        assert_eq!(expect_unresolved(yaml), "steps.version.outputs.value");

        let ok = r#"
name: CI
jobs:
  build:
    steps:
      - id: version
        run: echo "::set-output name=value::1.0"
      - run: echo ${{ steps.version.outputs.value }}
"#;
        assert!(PipelineDefinition::from_yaml(ok).is_ok());
    }

    #[test]
    fn test_name_template_cannot_use_job() {
        let yaml = r#"
name: CI
jobs:
  build:
    name: "${{ job.name }}"
    steps:
      - run: "true"
"#;
        assert_eq!(expect_unresolved(yaml), "job.name");
    }

    #[test]
    fn test_malformed_matrix() {
        let yaml = r#"
name: CI
jobs:
  test:
    strategy:
      matrix:
        rust: stable
    steps:
      - run: "true"
"#;
        assert!(matches!(
            PipelineDefinition::from_yaml(yaml),
            Err(SchemaError::MalformedMatrix { .. })
        ));

        let duplicate = r#"
name: CI
jobs:
  test:
    strategy:
      matrix:
        rust: [stable]
        rust: [beta]
    steps:
      - run: "true"
"#;
        assert!(matches!(
            PipelineDefinition::from_yaml(duplicate),
            Err(SchemaError::DuplicateAxis { .. })
        ));

        let include = r#"
name: CI
jobs:
  test:
    strategy:
      matrix:
        rust: [stable]
        include:
          - rust: nightly
    steps:
      - run: "true"
"#;
        assert!(matches!(
            PipelineDefinition::from_yaml(include),
            Err(SchemaError::MalformedMatrix { .. })
        ));
    }

    #[test]
    fn test_empty_event_name_is_trigger_error() {
        let yaml = r#"
name: CI
on: [push, ""]
jobs:
  a:
    steps: [{ run: "true" }]
"#;
        assert!(matches!(
            PipelineDefinition::from_yaml(yaml),
            Err(SchemaError::InvalidTrigger { .. })
        ));
    }
}
