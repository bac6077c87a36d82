//! Execution scheduler - decides which instances may start

use crate::core::{instance::JobInstance, state::JobStatus};
use std::collections::HashMap;

/// Strategy for scheduling instance execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SchedulingStrategy {
    /// Run instances one at a time, in evaluation order
    Sequential,

    /// Run every ready instance at once
    #[default]
    Parallel,

    /// Limited parallelism (max N concurrent instances)
    LimitedParallel(usize),
}

impl SchedulingStrategy {
    /// Maximum number of instances running at the same time
    pub fn max_concurrent(&self) -> usize {
        match self {
            SchedulingStrategy::Sequential => 1,
            SchedulingStrategy::Parallel => tokio::sync::Semaphore::MAX_PERMITS,
            SchedulingStrategy::LimitedParallel(max) => (*max).max(1),
        }
    }
}

/// What to do with a ready instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// Start the instance at this index
    Run(usize),
    /// Report the instance as skipped without running it
    Skip { index: usize, reason: String },
}

/// Tracks `needs` between jobs and hands out instances whose dependencies finished
///
/// Instances of different jobs are independent unless a `needs` edge links
/// them; document order plays no part.
pub struct ExecutionScheduler {
    strategy: SchedulingStrategy,
    /// Indices of instances not yet dispatched, in evaluation order
    pending: Vec<usize>,
    /// Instances per job still to finish
    remaining: HashMap<String, usize>,
    /// Statuses of finished instances per job
    finished: HashMap<String, Vec<JobStatus>>,
}

impl ExecutionScheduler {
    pub fn new(strategy: SchedulingStrategy, instances: &[JobInstance]) -> Self {
        let mut remaining = HashMap::new();
        for instance in instances {
            *remaining.entry(instance.job_id().to_string()).or_insert(0) += 1;
        }

        Self {
            strategy,
            pending: (0..instances.len()).collect(),
            remaining,
            finished: HashMap::new(),
        }
    }

    pub fn strategy(&self) -> SchedulingStrategy {
        self.strategy
    }

    /// Take every pending instance whose dependencies are all finished
    pub fn next_dispatches(&mut self, instances: &[JobInstance]) -> Vec<Dispatch> {
        let mut dispatches = Vec::new();

        self.pending.retain(|&index| {
            let job = instances[index].job();
            let mut waiting = false;
            let mut failed_dependency = None;

            for dependency in &job.needs {
                if self.remaining.get(dependency).copied().unwrap_or(0) > 0 {
                    waiting = true;
                    break;
                }
                let succeeded = self
                    .finished
                    .get(dependency)
                    .map_or(true, |statuses| statuses.iter().all(JobStatus::satisfies_dependents));
                if !succeeded && failed_dependency.is_none() {
                    failed_dependency = Some(dependency.clone());
                }
            }

            if waiting {
                return true;
            }
            dispatches.push(match failed_dependency {
                Some(dependency) => Dispatch::Skip {
                    index,
                    reason: format!("dependency '{}' did not succeed", dependency),
                },
                None => Dispatch::Run(index),
            });
            false
        });

        dispatches
    }

    /// Record a finished instance so its dependents can be released
    pub fn finished(&mut self, job_id: &str, status: JobStatus) {
        if let Some(count) = self.remaining.get_mut(job_id) {
            *count = count.saturating_sub(1);
        }
        self.finished.entry(job_id.to_string()).or_default().push(status);
    }

    /// Pending instances that can never become ready
    pub fn drain_pending(&mut self) -> Vec<usize> {
        std::mem::take(&mut self.pending)
    }

    /// Check if there are instances left to dispatch
    pub fn has_more(&self) -> bool {
        !self.pending.is_empty()
    }
}
