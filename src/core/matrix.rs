//! Matrix axes, variants and their Cartesian expansion

use crate::core::{context::Value, error::SchemaError};
use indexmap::IndexMap;
use serde::Serialize;
use std::fmt;

/// One concrete value for a matrix axis
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Variant {
    /// A bare value, e.g. `stable`
    Scalar(Value),
    /// A record of named fields; fields may be absent on sibling variants
    Record(IndexMap<String, Value>),
}

impl Variant {
    /// Convert a YAML node into a variant. Nested values are rejected.
    pub fn from_yaml(job: &str, axis: &str, value: &serde_yaml::Value) -> Result<Self, SchemaError> {
        let malformed = |reason: String| SchemaError::MalformedMatrix {
            job: job.to_string(),
            axis: axis.to_string(),
            reason,
        };

        match value {
            serde_yaml::Value::Mapping(map) => {
                let mut fields = IndexMap::new();
                for (key, field_value) in map {
                    let key = key
                        .as_str()
                        .ok_or_else(|| malformed("has a variant with a non-string field name".to_string()))?;
                    let field_value = Value::from_yaml(field_value).ok_or_else(|| {
                        malformed(format!("field '{}' must be a scalar value", key))
                    })?;
                    fields.insert(key.to_string(), field_value);
                }
                Ok(Variant::Record(fields))
            }
            serde_yaml::Value::Null => Err(malformed("has an empty variant".to_string())),
            other => Value::from_yaml(other)
                .map(Variant::Scalar)
                .ok_or_else(|| malformed("variants must be scalars or records".to_string())),
        }
    }

    pub fn is_record(&self) -> bool {
        matches!(self, Variant::Record(_))
    }

    /// A field of a record variant
    pub fn field(&self, name: &str) -> Option<&Value> {
        match self {
            Variant::Record(fields) => fields.get(name),
            Variant::Scalar(_) => None,
        }
    }

    /// Value seen by `matrix.<axis>` references
    pub fn as_value(&self) -> Value {
        match self {
            Variant::Scalar(value) => value.clone(),
            Variant::Record(_) => Value::String(self.label()),
        }
    }

    /// Short human-readable label: the `name` field of a record, otherwise its fields
    pub fn label(&self) -> String {
        match self {
            Variant::Scalar(value) => value.to_string(),
            Variant::Record(fields) => match fields.get("name") {
                Some(name) => name.to_string(),
                None => fields
                    .iter()
                    .map(|(k, v)| format!("{}: {}", k, v))
                    .collect::<Vec<_>>()
                    .join(", "),
            },
        }
    }
}

/// A named dimension of variation
#[derive(Debug, Clone, PartialEq)]
pub struct MatrixAxis {
    pub name: String,
    pub variants: Vec<Variant>,
}

impl MatrixAxis {
    /// Whether any variant of this axis carries `field`
    pub fn declares_field(&self, field: &str) -> bool {
        self.variants.iter().any(|v| v.field(field).is_some())
    }
}

/// Ordered matrix axes of one job
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MatrixSpec {
    axes: Vec<MatrixAxis>,
}

impl MatrixSpec {
    /// Validate and build a matrix from axes in declared order
    pub fn new(job: &str, axes: Vec<(String, Vec<Variant>)>) -> Result<Self, SchemaError> {
        let mut validated: Vec<MatrixAxis> = Vec::with_capacity(axes.len());

        for (name, variants) in axes {
            if validated.iter().any(|axis| axis.name == name) {
                return Err(SchemaError::DuplicateAxis {
                    job: job.to_string(),
                    axis: name,
                });
            }
            if variants.is_empty() {
                return Err(SchemaError::MalformedMatrix {
                    job: job.to_string(),
                    axis: name,
                    reason: "has no variants".to_string(),
                });
            }
            let records = variants.iter().filter(|v| v.is_record()).count();
            if records != 0 && records != variants.len() {
                return Err(SchemaError::MalformedMatrix {
                    job: job.to_string(),
                    axis: name,
                    reason: "mixes records and scalar variants".to_string(),
                });
            }
            validated.push(MatrixAxis { name, variants });
        }

        Ok(Self { axes: validated })
    }

    pub fn axes(&self) -> &[MatrixAxis] {
        &self.axes
    }

    pub fn axis(&self, name: &str) -> Option<&MatrixAxis> {
        self.axes.iter().find(|axis| axis.name == name)
    }

    /// Number of combinations (product of axis sizes)
    pub fn len(&self) -> usize {
        self.axes.iter().map(|axis| axis.variants.len()).product()
    }

    pub fn is_empty(&self) -> bool {
        self.axes.is_empty()
    }

    /// Cartesian product in declared axis order, first axis varying slowest
    pub fn combinations(&self) -> Vec<MatrixBinding> {
        let total = self.len();
        let mut combinations = Vec::with_capacity(total);
        let mut indices = vec![0usize; self.axes.len()];

        for _ in 0..total {
            let mut binding = MatrixBinding::default();
            for (axis, &i) in self.axes.iter().zip(&indices) {
                binding.insert(axis.name.clone(), axis.variants[i].clone());
            }
            combinations.push(binding);

            for pos in (0..self.axes.len()).rev() {
                indices[pos] += 1;
                if indices[pos] < self.axes[pos].variants.len() {
                    break;
                }
                indices[pos] = 0;
            }
        }

        combinations
    }
}

/// Axis name to chosen variant, in declared axis order
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(transparent)]
pub struct MatrixBinding(IndexMap<String, Variant>);

impl MatrixBinding {
    pub fn insert(&mut self, axis: impl Into<String>, variant: Variant) {
        self.0.insert(axis.into(), variant);
    }

    pub fn get(&self, axis: &str) -> Option<&Variant> {
        self.0.get(axis)
    }

    /// First bound record variant (in axis order) carrying `field`
    pub fn find_field(&self, field: &str) -> Option<&Value> {
        self.0.values().find_map(|variant| variant.field(field))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Variant)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for MatrixBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (axis, variant)) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}={}", axis, variant.label())?;
        }
        Ok(())
    }
}
