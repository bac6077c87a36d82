//! Core domain models for pipelines
//!
//! Loading, matrix expansion, guard evaluation and the result types shared by
//! the execution layer.

pub mod condition;
pub mod config;
pub mod context;
pub mod error;
pub mod instance;
pub mod matrix;
pub mod pipeline;
pub mod secrets;
pub mod state;
pub mod step;
pub mod template;
pub mod trigger;

pub use condition::{Expr, Reference};
pub use context::{InstanceContext, Value};
pub use error::*;
pub use instance::*;
pub use matrix::*;
pub use pipeline::*;
pub use secrets::*;
pub use state::*;
pub use step::*;
pub use template::{ParamValue, Template};
pub use trigger::*;
