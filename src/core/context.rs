//! Resolution context - what references see while an instance runs

use crate::core::{
    condition::{EventField, JobField, Reference},
    matrix::MatrixBinding,
    secrets::{SecretProvider, SecretString},
    trigger::TriggerEvent,
};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

/// A scalar value from a matrix variant or an expression literal
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
}

impl Value {
    /// Convert a YAML scalar. Sequences, mappings and tagged values yield `None`.
    pub fn from_yaml(value: &serde_yaml::Value) -> Option<Self> {
        match value {
            serde_yaml::Value::Null => Some(Value::Null),
            serde_yaml::Value::Bool(b) => Some(Value::Bool(*b)),
            serde_yaml::Value::Number(n) => match n.as_i64() {
                Some(i) => Some(Value::Integer(i)),
                None => n.as_f64().map(Value::Float),
            },
            serde_yaml::Value::String(s) => Some(Value::String(s.clone())),
            serde_yaml::Value::Sequence(_)
            | serde_yaml::Value::Mapping(_)
            | serde_yaml::Value::Tagged(_) => None,
        }
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Integer(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::String(s) => !s.is_empty(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::String(s) => f.write_str(s),
        }
    }
}

/// Truthiness of a possibly undefined value. Undefined is falsy.
pub fn is_truthy(value: Option<&Value>) -> bool {
    value.is_some_and(Value::is_truthy)
}

/// Per-instance resolution context
///
/// Holds the matrix binding, the merged environment, the triggering event and
/// the outputs of steps that already ran. Private to one instance.
#[derive(Clone)]
pub struct InstanceContext {
    job_id: String,
    job_name: String,
    matrix: MatrixBinding,
    env: BTreeMap<String, String>,
    step_env: BTreeMap<String, String>,
    event: TriggerEvent,
    step_outputs: HashMap<String, BTreeMap<String, String>>,
    secrets: Arc<dyn SecretProvider>,
}

impl InstanceContext {
    pub fn new(
        job_id: impl Into<String>,
        job_name: impl Into<String>,
        matrix: MatrixBinding,
        env: BTreeMap<String, String>,
        event: TriggerEvent,
        secrets: Arc<dyn SecretProvider>,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            job_name: job_name.into(),
            matrix,
            env,
            step_env: BTreeMap::new(),
            event,
            step_outputs: HashMap::new(),
            secrets,
        }
    }

    /// Resolve a reference. Secret references never resolve here.
    pub fn lookup(&self, reference: &Reference) -> Option<Value> {
        match reference {
            Reference::Matrix { axis, field: None } => {
                self.matrix.get(axis).map(|variant| variant.as_value())
            }
            Reference::Matrix {
                axis,
                field: Some(field),
            } => self.matrix.get(axis)?.field(field).cloned(),
            Reference::Bare(name) => self
                .matrix
                .get(name)
                .map(|variant| variant.as_value())
                .or_else(|| self.matrix.find_field(name).cloned())
                .or_else(|| self.env_var(name).map(|v| Value::String(v.to_string()))),
            Reference::Env(name) => self.env_var(name).map(|v| Value::String(v.to_string())),
            Reference::Secret(_) => None,
            Reference::StepOutput { step, output } => self
                .step_outputs
                .get(step)?
                .get(output)
                .map(|v| Value::String(v.clone())),
            Reference::Event(EventField::Kind) => Some(Value::String(self.event.kind.to_string())),
            Reference::Event(EventField::Branch) => {
                self.event.branch.clone().map(Value::String)
            }
            Reference::Job(JobField::Id) => Some(Value::String(self.job_id.clone())),
            Reference::Job(JobField::Name) => Some(Value::String(self.job_name.clone())),
        }
    }

    /// Look up an environment variable, step scope first
    pub fn env_var(&self, name: &str) -> Option<&str> {
        self.step_env
            .get(name)
            .or_else(|| self.env.get(name))
            .map(String::as_str)
    }

    /// The environment visible to the current step
    pub fn effective_env(&self) -> BTreeMap<String, String> {
        let mut env = self.env.clone();
        env.extend(self.step_env.clone());
        env
    }

    /// Layer job-level variables over the instance environment
    pub fn extend_env(&mut self, vars: impl IntoIterator<Item = (String, String)>) {
        self.env.extend(vars);
    }

    /// Install step-scoped variables, replacing those of the previous step
    pub fn enter_step(&mut self, vars: BTreeMap<String, String>) {
        self.step_env = vars;
    }

    pub fn leave_step(&mut self) {
        self.step_env.clear();
    }

    /// Whether the provider has a non-empty value for `name`
    pub fn is_secret_set(&self, name: &str) -> bool {
        self.secrets.is_set(name)
    }

    pub fn secret(&self, name: &str) -> Option<SecretString> {
        self.secrets.get(name)
    }

    pub fn set_step_outputs(&mut self, step_id: &str, outputs: BTreeMap<String, String>) {
        self.step_outputs.insert(step_id.to_string(), outputs);
    }

    pub fn step_outputs(&self, step_id: &str) -> Option<&BTreeMap<String, String>> {
        self.step_outputs.get(step_id)
    }

    pub fn matrix(&self) -> &MatrixBinding {
        &self.matrix
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn job_name(&self) -> &str {
        &self.job_name
    }
}

impl fmt::Debug for InstanceContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstanceContext")
            .field("job_id", &self.job_id)
            .field("job_name", &self.job_name)
            .field("matrix", &self.matrix)
            .field("env", &self.env)
            .field("step_env", &self.step_env)
            .field("event", &self.event)
            .field("step_outputs", &self.step_outputs)
            .finish_non_exhaustive()
    }
}
