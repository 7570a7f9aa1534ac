//! Workflow model and dependency resolution.
//!
//! - [`model`] — The serializable workflow/step definitions and structural
//!   validation.
//! - [`condition`] — Runtime predicates evaluated in `Conditional` mode.
//! - [`resolver`] — Execution-order and wavefront computation over the
//!   dependency DAG.

pub mod condition;
pub mod model;
pub mod resolver;

pub use condition::{ConditionOperator, StepCondition};
pub use model::{ExecutionMode, Workflow, WorkflowStep};
pub use resolver::{resolve, ExecutionPlan};
