//! Workflow execution engine.
//!
//! - [`context`] — Per-execution state: step results, accumulated data,
//!   progress.
//! - [`executor`] — The mode-driven dispatch loop with retry and failure
//!   policy.
//! - [`transaction`] — All-or-nothing grouping with compensating rollback.
//! - [`monitor`] — Queryable execution state and cooperative cancellation.

pub mod context;
pub mod executor;
pub mod monitor;
pub mod transaction;

pub use context::{ExecutionContext, ExecutionStatus, StepResult, StepStatus};
pub use executor::ExecutionEngine;
pub use monitor::{ExecutionHandleState, ExecutionMonitor, ExecutionStatusReport};
pub use transaction::{RollbackOutcome, RollbackReport, TransactionCoordinator};
