//! # Plugflow — A Plugin Composition Runtime
//!
//! `plugflow` lets independently developed plugins expose services to each
//! other and be composed into multi-step workflows:
//!
//! - **Messaging**: plugins register named service endpoints
//!   (`provider.method`) and exchange request/response messages through a
//!   dispatcher with per-request timeouts and dispatch statistics.
//! - **Workflows**: serializable step graphs with dependencies, validated at
//!   registration and resolved into a declaration-order-stable execution
//!   plan.
//! - **Execution modes**: sequential, parallel wavefronts, conditional
//!   (predicate-gated steps), and pipeline (upstream payloads fed into
//!   downstream parameters).
//! - **Failure policy**: per-step retries with fresh request ids, critical
//!   steps that abort the run, and non-critical failures that skip only
//!   their dependents.
//! - **Transactions**: executions can be grouped into an all-or-nothing unit
//!   with compensating rollback in reverse completion order.
//! - **Monitoring**: progress, per-step results, cooperative cancellation,
//!   and an event stream covering every state change.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use plugflow::{
//!     ExecutionMode, FnAsyncHandler, Orchestrator, ServiceEndpoint, Workflow, WorkflowStep,
//! };
//! use serde_json::{json, Map};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let orchestrator = Orchestrator::new();
//!     orchestrator.register_async_service(
//!         ServiceEndpoint::new("greeter", "hello"),
//!         Arc::new(FnAsyncHandler(|request: plugflow::Request| async move {
//!             Ok(json!({"greeting": format!("hello, {}", request.sender)}))
//!         })),
//!     );
//!
//!     orchestrator
//!         .register_workflow(
//!             Workflow::new("greet", "Say hello", ExecutionMode::Sequential)
//!                 .add_step(WorkflowStep::new("greet-step", "greeter", "hello")),
//!         )
//!         .unwrap();
//!
//!     let mut handle = orchestrator.execute_workflow("greet", Map::new()).unwrap();
//!     println!("{:?}", handle.wait().await);
//! }
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod messaging;
pub mod orchestrator;
pub mod workflow;

pub use crate::config::EngineConfig;
pub use crate::engine::{
    ExecutionContext, ExecutionMonitor, ExecutionStatus, ExecutionStatusReport, RollbackOutcome,
    RollbackReport, StepResult, StepStatus, TransactionCoordinator,
};
pub use crate::error::{HandlerResult, OrchestratorError, OrchestratorResult, ServiceFault};
pub use crate::events::{EventReceiver, OrchestratorEvent};
pub use crate::messaging::{
    AsyncServiceHandler, FnAsyncHandler, MessagingStats, Request, RequestDispatcher, Response,
    ResponseStatus, ServiceEndpoint, ServiceHandler, ServiceRegistry,
};
pub use crate::orchestrator::{
    ExecutionHandle, Orchestrator, OrchestratorBuilder, PluginCommandExecutor,
};
pub use crate::workflow::{
    ConditionOperator, ExecutionMode, ExecutionPlan, StepCondition, Workflow, WorkflowStep,
};
