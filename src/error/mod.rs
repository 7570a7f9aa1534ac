//! Error types for the orchestration runtime.
//!
//! - [`ServiceFault`] — Errors returned by service handlers, converted into
//!   `Failure` / `InternalError` responses at the dispatch boundary.
//! - [`OrchestratorError`] — Top-level errors for workflow registration,
//!   execution lookup, and transaction control.

pub mod orchestrator_error;
pub mod service_fault;

pub use orchestrator_error::OrchestratorError;
pub use service_fault::ServiceFault;

/// Convenience alias for orchestrator-level results.
pub type OrchestratorResult<T> = Result<T, OrchestratorError>;
/// Convenience alias for handler results.
pub type HandlerResult = Result<serde_json::Value, ServiceFault>;
