//! Pipeline execution: scheduling instances and running their steps

pub mod engine;
pub mod executor;
pub mod scheduler;

pub use engine::{CancellationFlag, EventHandler, ExecutionEngine, ExecutionEvent};
pub use executor::{run, InstanceRunner};
pub use scheduler::{Dispatch, ExecutionScheduler, SchedulingStrategy};
