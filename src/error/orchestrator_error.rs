//! Orchestrator-level error types.

use thiserror::Error;

/// Top-level errors for workflow registration, execution control, and
/// transaction management.
///
/// Structural problems (`WorkflowValidation`, `CycleDetected`,
/// `UnknownDependency`, `DuplicateWorkflow`) are rejected at registration
/// time, before anything executes. Lookup misses are returned as typed
/// `*NotFound` variants rather than panics. Handler faults never appear here:
/// they are converted into `Response` statuses at the dispatch boundary.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("Workflow validation error: {0}")]
    WorkflowValidation(String),
    #[error("Cycle detected in workflow '{workflow_id}': {}", cycle.join(" -> "))]
    CycleDetected {
        workflow_id: String,
        cycle: Vec<String>,
    },
    #[error("Step '{step_id}' depends on unknown step '{dependency}'")]
    UnknownDependency { step_id: String, dependency: String },
    #[error("Workflow already registered: {0}")]
    DuplicateWorkflow(String),
    #[error("Workflow not found: {0}")]
    WorkflowNotFound(String),
    #[error("Execution not found: {0}")]
    ExecutionNotFound(String),
    #[error("Transaction not found: {0}")]
    TransactionNotFound(String),
    #[error("Transaction already active: {0}")]
    DuplicateTransaction(String),
    #[error("Operation '{operation}' invalid in state '{state}'")]
    InvalidState { operation: String, state: String },
    #[error("Internal error: {0}")]
    Internal(String),
}
