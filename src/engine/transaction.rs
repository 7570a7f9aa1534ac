//! Transaction coordinator: all-or-nothing grouping with compensating
//! rollback.
//!
//! Rollback walks the execution's completed steps in reverse completion
//! order and dispatches each registered compensating step like a normal
//! request (own timeout, fresh request id). It is best-effort: a failing
//! compensation is recorded and never prevents the remaining (earlier)
//! compensations from running, and a compensation failure never triggers
//! further rollback.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::error::OrchestratorError;
use crate::events::{EventEmitter, OrchestratorEvent};
use crate::messaging::{Request, RequestDispatcher};
use crate::workflow::Workflow;

use super::monitor::ExecutionHandleState;

struct TransactionState {
    execution_id: String,
    #[allow(dead_code)]
    begun_at: DateTime<Utc>,
}

/// Outcome of one compensating step.
#[derive(Debug, Clone, Serialize)]
pub struct RollbackOutcome {
    /// The completed step being compensated.
    pub step_id: String,
    /// Id of the rollback step that was dispatched.
    pub rollback_step_id: String,
    pub succeeded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Best-effort rollback summary.
#[derive(Debug, Clone, Serialize)]
pub struct RollbackReport {
    pub transaction_id: String,
    pub execution_id: String,
    pub outcomes: Vec<RollbackOutcome>,
}

impl RollbackReport {
    pub fn failed_compensations(&self) -> usize {
        self.outcomes.iter().filter(|o| !o.succeeded).count()
    }
}

/// Groups step executions into an all-or-nothing unit.
pub struct TransactionCoordinator {
    dispatcher: Arc<RequestDispatcher>,
    transactions: Mutex<HashMap<String, TransactionState>>,
    events: EventEmitter,
}

impl TransactionCoordinator {
    pub fn new(dispatcher: Arc<RequestDispatcher>, events: EventEmitter) -> Self {
        Self {
            dispatcher,
            transactions: Mutex::new(HashMap::new()),
            events,
        }
    }

    /// Associate a transaction id with an execution.
    pub fn begin(
        &self,
        transaction_id: &str,
        execution_id: &str,
    ) -> Result<(), OrchestratorError> {
        let mut transactions = self.transactions.lock();
        if transactions.contains_key(transaction_id) {
            return Err(OrchestratorError::DuplicateTransaction(
                transaction_id.to_string(),
            ));
        }
        transactions.insert(
            transaction_id.to_string(),
            TransactionState {
                execution_id: execution_id.to_string(),
                begun_at: Utc::now(),
            },
        );
        info!(transaction_id, execution_id, "transaction begun");
        Ok(())
    }

    /// Keep the execution's effects and discard rollback bookkeeping.
    pub fn commit(&self, transaction_id: &str) -> Result<(), OrchestratorError> {
        self.transactions
            .lock()
            .remove(transaction_id)
            .map(|_| info!(transaction_id, "transaction committed"))
            .ok_or_else(|| OrchestratorError::TransactionNotFound(transaction_id.to_string()))
    }

    /// Execution the transaction is attached to, if it is still open.
    pub fn execution_id(&self, transaction_id: &str) -> Option<String> {
        self.transactions
            .lock()
            .get(transaction_id)
            .map(|s| s.execution_id.clone())
    }

    /// Compensate completed steps in reverse completion order. Consumes the
    /// transaction.
    pub async fn rollback(
        &self,
        transaction_id: &str,
        workflow: &Workflow,
        context: &ExecutionHandleState,
        default_timeout: Duration,
    ) -> Result<RollbackReport, OrchestratorError> {
        let state = self
            .transactions
            .lock()
            .remove(transaction_id)
            .ok_or_else(|| OrchestratorError::TransactionNotFound(transaction_id.to_string()))?;

        // Snapshot outside the dispatch loop; the engine task has stopped
        // dispatching by the time rollback runs.
        let completed: Vec<String> = {
            let ctx = context.read();
            ctx.completion_order.iter().rev().cloned().collect()
        };

        self.events.emit(OrchestratorEvent::RollbackStarted {
            transaction_id: transaction_id.to_string(),
            execution_id: state.execution_id.clone(),
            timestamp: Utc::now(),
        });
        info!(
            transaction_id,
            execution_id = %state.execution_id,
            steps = completed.len(),
            "rolling back"
        );

        let mut outcomes = Vec::new();
        for step_id in completed {
            let Some(rollback) = workflow.rollback_steps.get(&step_id) else {
                continue;
            };
            let timeout = rollback
                .timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(default_timeout);
            let request = Request::new("plugflow.rollback", &rollback.plugin_id, &rollback.method)
                .with_params(rollback.parameters.clone())
                .with_timeout(timeout);
            let response = self.dispatcher.send_request_async(request).await;

            let outcome = if response.is_success() {
                RollbackOutcome {
                    step_id: step_id.clone(),
                    rollback_step_id: rollback.id.clone(),
                    succeeded: true,
                    error: None,
                }
            } else {
                warn!(
                    transaction_id,
                    step_id = %step_id,
                    status = %response.status,
                    "compensation failed"
                );
                self.events.emit(OrchestratorEvent::RollbackStepFailed {
                    transaction_id: transaction_id.to_string(),
                    step_id: step_id.clone(),
                    error: response.message.clone(),
                    timestamp: Utc::now(),
                });
                RollbackOutcome {
                    step_id: step_id.clone(),
                    rollback_step_id: rollback.id.clone(),
                    succeeded: false,
                    error: Some(format!("{}: {}", response.status, response.message)),
                }
            };
            outcomes.push(outcome);
        }

        let report = RollbackReport {
            transaction_id: transaction_id.to_string(),
            execution_id: state.execution_id,
            outcomes,
        };
        self.events.emit(OrchestratorEvent::RollbackCompleted {
            transaction_id: transaction_id.to_string(),
            failed_compensations: report.failed_compensations(),
            timestamp: Utc::now(),
        });
        Ok(report)
    }
}
