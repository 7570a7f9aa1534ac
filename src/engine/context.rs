//! Per-execution state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

use crate::workflow::Workflow;

/// Step state machine: `Pending → Running → {Completed | Failed | Skipped |
/// Cancelled}`, with `Retrying` bridging failed attempts back to `Running`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
    Cancelled,
    Retrying,
}

impl StepStatus {
    /// Terminal states count toward progress.
    pub fn is_resolved(self) -> bool {
        matches!(
            self,
            StepStatus::Completed | StepStatus::Failed | StepStatus::Skipped | StepStatus::Cancelled
        )
    }
}

/// Result record for one step within one execution. Retried attempts update
/// this record in place rather than creating new ones.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    pub step_id: String,
    pub status: StepStatus,
    #[serde(default)]
    pub payload: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub retry_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl StepResult {
    fn pending(step_id: &str) -> Self {
        Self {
            step_id: step_id.to_string(),
            status: StepStatus::Pending,
            payload: Value::Null,
            error: None,
            retry_count: 0,
            started_at: None,
            finished_at: None,
        }
    }
}

/// Overall status of one workflow execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ExecutionStatus::Completed | ExecutionStatus::Failed | ExecutionStatus::Cancelled
        )
    }
}

/// Mutable state of one workflow execution. Owned by the single engine task
/// driving the execution; other callers read it through the monitor's lock.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub execution_id: String,
    pub workflow_id: String,
    pub status: ExecutionStatus,
    pub steps: HashMap<String, StepResult>,
    /// Step ids in declaration order, for stable reporting.
    pub step_order: Vec<String>,
    /// Accumulated data: initial input plus terminal step payloads keyed by
    /// step id. Partial retry output is never published here.
    pub data: Map<String, Value>,
    /// Step ids in the order they reached `Completed`; rollback walks this
    /// in reverse.
    pub completion_order: Vec<String>,
    pub transaction_id: Option<String>,
    pub cancel_requested: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl ExecutionContext {
    pub fn new(execution_id: &str, workflow: &Workflow, initial_data: Map<String, Value>) -> Self {
        let steps = workflow
            .steps
            .iter()
            .map(|s| (s.id.clone(), StepResult::pending(&s.id)))
            .collect();
        Self {
            execution_id: execution_id.to_string(),
            workflow_id: workflow.id.clone(),
            status: ExecutionStatus::Pending,
            steps,
            step_order: workflow.steps.iter().map(|s| s.id.clone()).collect(),
            data: initial_data,
            completion_order: Vec::new(),
            transaction_id: None,
            cancel_requested: false,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    /// Fraction of resolved steps; `Skipped` and `Cancelled` count as
    /// resolved.
    pub fn progress(&self) -> f64 {
        if self.steps.is_empty() {
            return 0.0;
        }
        let resolved = self
            .steps
            .values()
            .filter(|r| r.status.is_resolved())
            .count();
        resolved as f64 / self.steps.len() as f64
    }

    /// First step currently `Running` or `Retrying`, in declaration order.
    pub fn current_step(&self) -> Option<String> {
        self.step_order
            .iter()
            .find(|id| {
                self.steps.get(*id).is_some_and(|r| {
                    matches!(r.status, StepStatus::Running | StepStatus::Retrying)
                })
            })
            .cloned()
    }

    pub fn count_with_status(&self, status: StepStatus) -> usize {
        self.steps.values().filter(|r| r.status == status).count()
    }

    /// Step results in declaration order.
    pub fn ordered_results(&self) -> Vec<StepResult> {
        self.step_order
            .iter()
            .filter_map(|id| self.steps.get(id).cloned())
            .collect()
    }

    pub(crate) fn mark_running(&mut self, step_id: &str) {
        if let Some(result) = self.steps.get_mut(step_id) {
            result.status = StepStatus::Running;
            if result.started_at.is_none() {
                result.started_at = Some(Utc::now());
            }
        }
    }

    pub(crate) fn mark_retrying(&mut self, step_id: &str, error: &str) {
        if let Some(result) = self.steps.get_mut(step_id) {
            result.status = StepStatus::Retrying;
            result.retry_count += 1;
            result.error = Some(error.to_string());
        }
    }

    pub(crate) fn mark_completed(&mut self, step_id: &str, payload: Value) {
        if let Some(result) = self.steps.get_mut(step_id) {
            result.status = StepStatus::Completed;
            result.payload = payload.clone();
            result.error = None;
            result.finished_at = Some(Utc::now());
        }
        self.completion_order.push(step_id.to_string());
        self.data.insert(step_id.to_string(), payload);
    }

    pub(crate) fn mark_failed(&mut self, step_id: &str, error: &str) {
        if let Some(result) = self.steps.get_mut(step_id) {
            result.status = StepStatus::Failed;
            result.error = Some(error.to_string());
            result.finished_at = Some(Utc::now());
        }
    }

    pub(crate) fn mark_skipped(&mut self, step_id: &str) {
        if let Some(result) = self.steps.get_mut(step_id) {
            result.status = StepStatus::Skipped;
            result.finished_at = Some(Utc::now());
        }
    }

    pub(crate) fn mark_cancelled(&mut self, step_id: &str) {
        if let Some(result) = self.steps.get_mut(step_id) {
            result.status = StepStatus::Cancelled;
            result.finished_at = Some(Utc::now());
        }
    }

    pub(crate) fn finish(&mut self, status: ExecutionStatus) {
        self.status = status;
        self.finished_at = Some(Utc::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::{ExecutionMode, WorkflowStep};
    use serde_json::json;

    fn context() -> ExecutionContext {
        let workflow = Workflow::new("wf", "t", ExecutionMode::Sequential)
            .add_step(WorkflowStep::new("a", "p", "m"))
            .add_step(WorkflowStep::new("b", "p", "m"))
            .add_step(WorkflowStep::new("c", "p", "m"));
        ExecutionContext::new("exec-1", &workflow, Map::new())
    }

    #[test]
    fn test_progress_counts_skipped_and_cancelled() {
        let mut ctx = context();
        assert_eq!(ctx.progress(), 0.0);

        ctx.mark_completed("a", json!(1));
        ctx.mark_skipped("b");
        ctx.mark_cancelled("c");
        assert!((ctx.progress() - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_retrying_is_not_resolved() {
        let mut ctx = context();
        ctx.mark_running("a");
        ctx.mark_retrying("a", "flaky");
        assert_eq!(ctx.progress(), 0.0);
        assert_eq!(ctx.steps["a"].retry_count, 1);
        assert_eq!(ctx.current_step(), Some("a".to_string()));
    }

    #[test]
    fn test_completion_order_and_data_publication() {
        let mut ctx = context();
        ctx.mark_completed("b", json!({"n": 1}));
        ctx.mark_completed("a", json!({"n": 2}));
        assert_eq!(ctx.completion_order, vec!["b", "a"]);
        assert_eq!(ctx.data["b"], json!({"n": 1}));
    }

    #[test]
    fn test_failed_attempt_does_not_publish_data() {
        let mut ctx = context();
        ctx.mark_running("a");
        ctx.mark_failed("a", "boom");
        assert!(!ctx.data.contains_key("a"));
        assert_eq!(ctx.steps["a"].error.as_deref(), Some("boom"));
    }

    #[test]
    fn test_ordered_results_follow_declaration_order() {
        let mut ctx = context();
        ctx.mark_completed("c", json!(null));
        let results = ctx.ordered_results();
        assert_eq!(results[0].step_id, "a");
        assert_eq!(results[2].step_id, "c");
        assert_eq!(results[2].status, StepStatus::Completed);
    }
}
