//! Pipeline document as written in YAML

use crate::core::error::SchemaError;
use indexmap::IndexMap;
use serde::de::{Deserializer, MapAccess, Visitor};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use std::collections::HashSet;
use std::fmt;
use std::marker::PhantomData;
use std::path::Path;

/// A YAML mapping kept as ordered pairs, duplicates included
///
/// Duplicate keys are a schema error for jobs and matrix axes, so they must
/// survive deserialization to be reported.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderedMap<V>(pub Vec<(String, V)>);

impl<V> Default for OrderedMap<V> {
    fn default() -> Self {
        Self(Vec::new())
    }
}

impl<V> OrderedMap<V> {
    pub fn iter(&self) -> impl Iterator<Item = &(String, V)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<'de, V: Deserialize<'de>> Deserialize<'de> for OrderedMap<V> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct PairsVisitor<V>(PhantomData<V>);

        impl<'de, V: Deserialize<'de>> Visitor<'de> for PairsVisitor<V> {
            type Value = OrderedMap<V>;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a mapping")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
                let mut pairs = Vec::with_capacity(map.size_hint().unwrap_or(0));
                while let Some((key, value)) = map.next_entry::<String, V>()? {
                    pairs.push((key, value));
                }
                Ok(OrderedMap(pairs))
            }
        }

        deserializer.deserialize_map(PairsVisitor(PhantomData))
    }
}

impl<V: Serialize> Serialize for OrderedMap<V> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (key, value) in &self.0 {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

/// Top-level pipeline document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Pipeline name
    pub name: String,

    /// Events that start the pipeline (absent: every event)
    #[serde(default, rename = "on")]
    pub triggers: Option<TriggersConfig>,

    /// Environment defaults merged into every instance
    #[serde(default)]
    pub env: IndexMap<String, Value>,

    /// Pipeline-wide defaults
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// Jobs by id
    pub jobs: OrderedMap<JobConfig>,
}

/// `on:` as a single event, a list of events, or events with filters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TriggersConfig {
    Single(String),
    List(Vec<String>),
    Filtered(IndexMap<String, Option<TriggerFilterConfig>>),
}

/// Branch filters of one trigger
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TriggerFilterConfig {
    #[serde(default)]
    pub branches: Vec<String>,

    #[serde(default, rename = "branches-ignore", alias = "branches_ignore")]
    pub branches_ignore: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Default step timeout (in seconds)
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

/// A guard written either as a YAML boolean or as an expression string
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConditionConfig {
    Bool(bool),
    Expr(String),
}

impl ConditionConfig {
    pub fn source(&self) -> String {
        match self {
            ConditionConfig::Bool(b) => b.to_string(),
            ConditionConfig::Expr(s) => s.clone(),
        }
    }
}

/// `needs:` as one job id or a list
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NeedsConfig {
    One(String),
    Many(Vec<String>),
}

impl Default for NeedsConfig {
    fn default() -> Self {
        NeedsConfig::Many(Vec::new())
    }
}

impl NeedsConfig {
    pub fn to_vec(&self) -> Vec<String> {
        match self {
            NeedsConfig::One(job) => vec![job.clone()],
            NeedsConfig::Many(jobs) => jobs.clone(),
        }
    }
}

/// Job as defined in YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    /// Display name template
    #[serde(default)]
    pub name: Option<String>,

    /// Jobs that must finish first
    #[serde(default)]
    pub needs: NeedsConfig,

    /// Job-level guard
    #[serde(default, rename = "if")]
    pub condition: Option<ConditionConfig>,

    /// Job-level environment (templates)
    #[serde(default)]
    pub env: IndexMap<String, Value>,

    #[serde(default)]
    pub strategy: Option<StrategyConfig>,

    /// Step timeout for this job (overrides the pipeline default)
    #[serde(default)]
    pub timeout_secs: Option<u64>,

    #[serde(default)]
    pub steps: Vec<StepConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StrategyConfig {
    /// Axis name to list of variants, in declared order
    #[serde(default)]
    pub matrix: Option<OrderedMap<Value>>,
}

/// Step as defined in YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepConfig {
    /// Step identifier (defaults to `step-<n>`)
    #[serde(default)]
    pub id: Option<String>,

    /// Human-readable step name
    #[serde(default)]
    pub name: Option<String>,

    /// Action reference
    #[serde(default)]
    pub uses: Option<String>,

    /// Inline script, shorthand for the `run` action
    #[serde(default)]
    pub run: Option<String>,

    /// Action parameters (templates)
    #[serde(default, rename = "with")]
    pub with: IndexMap<String, Value>,

    /// Step environment (templates)
    #[serde(default)]
    pub env: IndexMap<String, Value>,

    /// Step guard
    #[serde(default, rename = "if")]
    pub condition: Option<ConditionConfig>,

    /// Timeout for this step (in seconds)
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl StepConfig {
    /// Identifier of the step at `index` (0-based) within its job
    pub fn effective_id(&self, index: usize) -> String {
        self.id
            .clone()
            .unwrap_or_else(|| format!("step-{}", index + 1))
    }
}

/// Render a YAML scalar used as an environment or parameter value
pub fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::Null => Some(String::new()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) => Some(s.clone()),
        Value::Sequence(_) | Value::Mapping(_) | Value::Tagged(_) => None,
    }
}

impl PipelineConfig {
    /// Load pipeline configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, SchemaError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse pipeline configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self, SchemaError> {
        let config: PipelineConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Structural checks that need no expression parsing
    pub fn validate(&self) -> Result<(), SchemaError> {
        if self.jobs.is_empty() {
            return Err(SchemaError::MissingField {
                location: format!("pipeline '{}'", self.name),
                field: "jobs",
            });
        }

        let mut seen_jobs = HashSet::new();
        for (job_id, job) in self.jobs.iter() {
            if job_id.trim().is_empty() {
                return Err(SchemaError::MissingField {
                    location: format!("pipeline '{}'", self.name),
                    field: "job name",
                });
            }
            if !seen_jobs.insert(job_id.as_str()) {
                return Err(SchemaError::DuplicateJob(job_id.clone()));
            }
            if job.steps.is_empty() {
                return Err(SchemaError::MissingField {
                    location: format!("job '{}'", job_id),
                    field: "steps",
                });
            }

            let mut seen_steps = HashSet::new();
            for (index, step) in job.steps.iter().enumerate() {
                let step_id = step.effective_id(index);
                let location = format!("job '{}' step '{}'", job_id, step_id);

                match (&step.uses, &step.run) {
                    (Some(_), Some(_)) => return Err(SchemaError::AmbiguousAction { location }),
                    (None, None) => {
                        return Err(SchemaError::MissingField {
                            location,
                            field: "uses",
                        })
                    }
                    (Some(uses), None) if uses.trim().is_empty() => {
                        return Err(SchemaError::MissingField {
                            location,
                            field: "uses",
                        })
                    }
                    _ => {}
                }

                if !seen_steps.insert(step_id.clone()) {
                    return Err(SchemaError::DuplicateStep {
                        job: job_id.clone(),
                        step: step_id,
                    });
                }
            }
        }

        for (job_id, job) in self.jobs.iter() {
            for dependency in job.needs.to_vec() {
                if !seen_jobs.contains(dependency.as_str()) {
                    return Err(SchemaError::UnknownDependency {
                        job: job_id.clone(),
                        dependency,
                    });
                }
            }
        }

        self.check_cycles()
    }

    /// Check for cycles in the `needs` graph
    fn check_cycles(&self) -> Result<(), SchemaError> {
        let mut visited = HashSet::new();
        let mut recursion_stack = HashSet::new();

        for (job_id, _) in self.jobs.iter() {
            if !visited.contains(job_id) {
                self.dfs_check(job_id, &mut visited, &mut recursion_stack)?;
            }
        }

        Ok(())
    }

    fn dfs_check(
        &self,
        job_id: &str,
        visited: &mut HashSet<String>,
        recursion_stack: &mut HashSet<String>,
    ) -> Result<(), SchemaError> {
        visited.insert(job_id.to_string());
        recursion_stack.insert(job_id.to_string());

        if let Some((_, job)) = self.jobs.iter().find(|(id, _)| id == job_id) {
            for dep in job.needs.to_vec() {
                if recursion_stack.contains(&dep) {
                    return Err(SchemaError::DependencyCycle(dep));
                }
                if !visited.contains(&dep) {
                    self.dfs_check(&dep, visited, recursion_stack)?;
                }
            }
        }

        recursion_stack.remove(job_id);
        Ok(())
    }
}
