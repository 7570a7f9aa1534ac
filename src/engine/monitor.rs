//! Execution monitor: queryable per-execution state and cooperative
//! cancellation.

use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::OrchestratorError;

use super::context::{ExecutionContext, ExecutionStatus, StepResult, StepStatus};

/// Shared handle to one execution's state. The engine task owning the
/// execution is the only writer; queries take the read side.
pub type ExecutionHandleState = Arc<RwLock<ExecutionContext>>;

/// Status document returned by [`ExecutionMonitor::get_status`].
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionStatusReport {
    pub execution_id: String,
    pub workflow_id: String,
    pub status: ExecutionStatus,
    pub progress: f64,
    pub current_step: Option<String>,
    pub completed_steps: usize,
    pub failed_steps: usize,
    pub total_steps: usize,
}

/// Holds every known [`ExecutionContext`], active and archived.
#[derive(Default)]
pub struct ExecutionMonitor {
    executions: RwLock<HashMap<String, ExecutionHandleState>>,
}

impl ExecutionMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, context: ExecutionContext) -> ExecutionHandleState {
        let execution_id = context.execution_id.clone();
        let state = Arc::new(RwLock::new(context));
        self.executions
            .write()
            .insert(execution_id, Arc::clone(&state));
        state
    }

    pub fn get(&self, execution_id: &str) -> Option<ExecutionHandleState> {
        self.executions.read().get(execution_id).cloned()
    }

    pub fn get_status(
        &self,
        execution_id: &str,
    ) -> Result<ExecutionStatusReport, OrchestratorError> {
        let state = self
            .get(execution_id)
            .ok_or_else(|| OrchestratorError::ExecutionNotFound(execution_id.to_string()))?;
        let ctx = state.read();
        Ok(ExecutionStatusReport {
            execution_id: ctx.execution_id.clone(),
            workflow_id: ctx.workflow_id.clone(),
            status: ctx.status,
            progress: ctx.progress(),
            current_step: ctx.current_step(),
            completed_steps: ctx.count_with_status(StepStatus::Completed),
            failed_steps: ctx.count_with_status(StepStatus::Failed),
            total_steps: ctx.step_order.len(),
        })
    }

    pub fn get_step_results(
        &self,
        execution_id: &str,
    ) -> Result<Vec<StepResult>, OrchestratorError> {
        let state = self
            .get(execution_id)
            .ok_or_else(|| OrchestratorError::ExecutionNotFound(execution_id.to_string()))?;
        let results = state.read().ordered_results();
        Ok(results)
    }

    /// Set the cancellation flag. The engine observes it at the next
    /// step-dispatch decision point; in-flight requests resolve or time out
    /// normally.
    pub fn cancel(&self, execution_id: &str) -> Result<(), OrchestratorError> {
        let state = self
            .get(execution_id)
            .ok_or_else(|| OrchestratorError::ExecutionNotFound(execution_id.to_string()))?;
        let mut ctx = state.write();
        if ctx.status.is_terminal() {
            return Err(OrchestratorError::InvalidState {
                operation: "cancel".to_string(),
                state: format!("{:?}", ctx.status).to_lowercase(),
            });
        }
        ctx.cancel_requested = true;
        tracing::info!(execution_id, "cancellation requested");
        Ok(())
    }

    /// Ids of executions that have not reached a terminal status.
    pub fn list_active_executions(&self) -> Vec<String> {
        let mut active: Vec<String> = self
            .executions
            .read()
            .iter()
            .filter(|(_, state)| !state.read().status.is_terminal())
            .map(|(id, _)| id.clone())
            .collect();
        active.sort();
        active
    }

    /// Drop one terminal execution. Reaping a live execution is refused.
    pub fn reap(&self, execution_id: &str) -> Result<(), OrchestratorError> {
        let mut executions = self.executions.write();
        let state = executions
            .get(execution_id)
            .ok_or_else(|| OrchestratorError::ExecutionNotFound(execution_id.to_string()))?;
        if !state.read().status.is_terminal() {
            return Err(OrchestratorError::InvalidState {
                operation: "reap".to_string(),
                state: "running".to_string(),
            });
        }
        executions.remove(execution_id);
        Ok(())
    }

    /// Drop every terminal execution; returns how many were removed.
    pub fn reap_terminal(&self) -> usize {
        let mut executions = self.executions.write();
        let before = executions.len();
        executions.retain(|_, state| !state.read().status.is_terminal());
        before - executions.len()
    }
}
