//! Step domain model

use crate::core::{
    condition::Expr,
    config::{scalar_to_string, StepConfig},
    error::SchemaError,
    template::Template,
};
use indexmap::IndexMap;

/// Action name used for inline `run:` scripts
pub const RUN_ACTION: &str = "run";

/// Parameter carrying the script of a `run:` step
pub const SCRIPT_PARAM: &str = "script";

/// A single step of a job
#[derive(Debug, Clone)]
pub struct StepDefinition {
    /// Unique step identifier within its job
    pub id: String,

    /// Human-readable name
    pub name: Option<String>,

    /// Action reference (`run` for inline scripts)
    pub action: String,

    /// Parameter templates, in declared order
    pub params: IndexMap<String, Template>,

    /// Step-scoped environment templates
    pub env: IndexMap<String, Template>,

    /// Optional guard
    pub guard: Option<Expr>,

    /// Timeout in seconds, when set on the step itself
    pub timeout_secs: Option<u64>,
}

impl StepDefinition {
    /// Create a step from its config; `index` is the 0-based position in the job
    pub fn from_config(job: &str, index: usize, config: &StepConfig) -> Result<Self, SchemaError> {
        let id = config.effective_id(index);
        let location = format!("job '{}' step '{}'", job, id);

        let mut params = IndexMap::new();
        let action = match (&config.uses, &config.run) {
            (Some(uses), None) => uses.clone(),
            (None, Some(script)) => {
                params.insert(SCRIPT_PARAM.to_string(), parse_template(&location, script)?);
                RUN_ACTION.to_string()
            }
            (Some(_), Some(_)) => return Err(SchemaError::AmbiguousAction { location }),
            (None, None) => {
                return Err(SchemaError::MissingField {
                    location,
                    field: "uses",
                })
            }
        };

        for (key, value) in &config.with {
            params.insert(key.clone(), template_from_yaml(&location, key, value)?);
        }

        let env = templates_from_yaml(&location, &config.env)?;

        let guard = config
            .condition
            .as_ref()
            .map(|condition| parse_guard(&location, &condition.source()))
            .transpose()?;

        Ok(StepDefinition {
            id,
            name: config.name.clone(),
            action,
            params,
            env,
            guard,
            timeout_secs: config.timeout_secs,
        })
    }

    /// Label used in logs and reports
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }

    pub fn is_inline_script(&self) -> bool {
        self.action == RUN_ACTION
    }
}

pub(crate) fn parse_template(location: &str, source: &str) -> Result<Template, SchemaError> {
    Template::parse(source).map_err(|reason| SchemaError::InvalidExpression {
        location: location.to_string(),
        expression: source.to_string(),
        reason,
    })
}

pub(crate) fn parse_guard(location: &str, source: &str) -> Result<Expr, SchemaError> {
    Expr::parse(source).map_err(|reason| SchemaError::InvalidExpression {
        location: location.to_string(),
        expression: source.to_string(),
        reason,
    })
}

pub(crate) fn template_from_yaml(
    location: &str,
    key: &str,
    value: &serde_yaml::Value,
) -> Result<Template, SchemaError> {
    let text = scalar_to_string(value).ok_or_else(|| SchemaError::InvalidExpression {
        location: location.to_string(),
        expression: key.to_string(),
        reason: "value must be a scalar".to_string(),
    })?;
    parse_template(location, &text)
}

pub(crate) fn templates_from_yaml(
    location: &str,
    values: &IndexMap<String, serde_yaml::Value>,
) -> Result<IndexMap<String, Template>, SchemaError> {
    values
        .iter()
        .map(|(key, value)| Ok((key.clone(), template_from_yaml(location, key, value)?)))
        .collect()
}
