//! Secret provider abstraction
//!
//! Secret values are opaque to the engine. Guards only ever observe whether a
//! secret is set; the value itself flows nowhere except into a step parameter
//! that references it explicitly.

use std::collections::HashMap;
use std::fmt;

/// A secret value whose `Debug` and `Display` never print the content
#[derive(Clone, PartialEq, Eq)]
pub struct SecretString(String);

impl SecretString {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Borrow the underlying value. Only collaborators that need the value should call this.
    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretString(***)")
    }
}

impl fmt::Display for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("***")
    }
}

/// Read-only source of secrets shared by every instance of a run
pub trait SecretProvider: Send + Sync {
    /// Look up a secret by name
    fn get(&self, name: &str) -> Option<SecretString>;

    /// Whether a non-empty value exists for `name`
    ///
    /// An empty value counts as unset. Backends that distinguish the two can override this.
    fn is_set(&self, name: &str) -> bool {
        self.get(name).is_some_and(|value| !value.is_empty())
    }
}

/// Provider with no secrets at all
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSecrets;

impl SecretProvider for NoSecrets {
    fn get(&self, _name: &str) -> Option<SecretString> {
        None
    }
}

/// In-memory secrets, mostly for tests and embedding
#[derive(Debug, Clone, Default)]
pub struct StaticSecrets {
    values: HashMap<String, SecretString>,
}

impl StaticSecrets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(name.into(), SecretString::new(value));
        self
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for StaticSecrets {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            values: iter
                .into_iter()
                .map(|(k, v)| (k.into(), SecretString::new(v)))
                .collect(),
        }
    }
}

impl SecretProvider for StaticSecrets {
    fn get(&self, name: &str) -> Option<SecretString> {
        self.values.get(name).cloned()
    }
}

/// Secrets read from the process environment, restricted to an allow-list of names
#[derive(Debug, Clone, Default)]
pub struct EnvSecrets {
    names: Vec<String>,
}

impl EnvSecrets {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
        }
    }
}

impl SecretProvider for EnvSecrets {
    fn get(&self, name: &str) -> Option<SecretString> {
        if !self.names.iter().any(|allowed| allowed == name) {
            return None;
        }
        std::env::var(name).ok().map(SecretString::new)
    }
}
