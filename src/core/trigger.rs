//! Triggers and triggering events

use crate::core::error::SchemaError;
use glob_match::glob_match;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

/// Kind of event that starts a pipeline run
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Push,
    PullRequest,
    Schedule,
    WorkflowDispatch,
    #[serde(untagged)]
    Other(String),
}

impl FromStr for EventKind {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "push" => EventKind::Push,
            "pull_request" => EventKind::PullRequest,
            "schedule" => EventKind::Schedule,
            "workflow_dispatch" => EventKind::WorkflowDispatch,
            other => EventKind::Other(other.to_string()),
        })
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventKind::Push => f.write_str("push"),
            EventKind::PullRequest => f.write_str("pull_request"),
            EventKind::Schedule => f.write_str("schedule"),
            EventKind::WorkflowDispatch => f.write_str("workflow_dispatch"),
            EventKind::Other(s) => f.write_str(s),
        }
    }
}

/// The event a run is evaluated against
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TriggerEvent {
    pub kind: EventKind,
    pub branch: Option<String>,
}

impl TriggerEvent {
    pub fn new(kind: EventKind) -> Self {
        Self { kind, branch: None }
    }

    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = Some(branch.into());
        self
    }
}

/// A branch glob: `*` stops at `/`, `**` does not, `?` matches one character
#[derive(Debug, Clone)]
pub struct BranchPattern {
    source: String,
}

impl BranchPattern {
    pub fn new(glob: &str) -> Result<Self, String> {
        if glob.trim().is_empty() {
            return Err("empty pattern".to_string());
        }
        Ok(Self {
            source: glob.to_string(),
        })
    }

    pub fn matches(&self, branch: &str) -> bool {
        glob_match(&self.source, branch)
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }
}

/// An event kind plus its branch filters
#[derive(Debug, Clone)]
pub struct Trigger {
    pub kind: EventKind,
    pub branches: Vec<BranchPattern>,
    pub branches_ignore: Vec<BranchPattern>,
}

impl Trigger {
    pub fn new(kind: EventKind) -> Self {
        Self {
            kind,
            branches: Vec::new(),
            branches_ignore: Vec::new(),
        }
    }

    /// Build a trigger from glob lists, rejecting invalid globs
    pub fn with_filters(
        kind: EventKind,
        branches: &[String],
        branches_ignore: &[String],
    ) -> Result<Self, SchemaError> {
        let compile = |globs: &[String]| -> Result<Vec<BranchPattern>, SchemaError> {
            globs
                .iter()
                .map(|glob| {
                    BranchPattern::new(glob).map_err(|e| SchemaError::InvalidTrigger {
                        trigger: kind.to_string(),
                        reason: format!("bad branch pattern '{}': {}", glob, e),
                    })
                })
                .collect()
        };

        Ok(Self {
            branches: compile(branches)?,
            branches_ignore: compile(branches_ignore)?,
            kind,
        })
    }

    pub fn matches(&self, event: &TriggerEvent) -> bool {
        if self.kind != event.kind {
            return false;
        }

        match &event.branch {
            Some(branch) => {
                if self.branches_ignore.iter().any(|p| p.matches(branch)) {
                    return false;
                }
                self.branches.is_empty() || self.branches.iter().any(|p| p.matches(branch))
            }
            None => self.branches.is_empty(),
        }
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        let globs: Vec<String> = self
            .branches
            .iter()
            .map(|p| p.as_str().to_string())
            .chain(self.branches_ignore.iter().map(|p| format!("!{}", p.as_str())))
            .collect();
        if !globs.is_empty() {
            write!(f, " [{}]", globs.join(", "))?;
        }
        Ok(())
    }
}
