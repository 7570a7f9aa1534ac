//! The execution engine: walks the resolved order, dispatches steps through
//! the request dispatcher, and applies retry and failure policy.
//!
//! One engine task drives each execution. Cancellation is cooperative: the
//! flag is checked at every step-dispatch decision point, in-flight requests
//! resolve or time out normally, and no new request is dispatched afterwards.

use serde_json::{Map, Value};
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::events::{EventEmitter, OrchestratorEvent};
use crate::messaging::{Request, RequestDispatcher};
use crate::workflow::{ExecutionMode, ExecutionPlan, Workflow, WorkflowStep};

use super::context::{ExecutionStatus, StepStatus};
use super::monitor::{ExecutionHandleState, ExecutionMonitor};
use super::transaction::TransactionCoordinator;

/// Why the dispatch loop stopped.
enum RunOutcome {
    /// Every step reached a terminal status (non-critical failures absorbed).
    Finished,
    /// A critical step failed; the execution aborts and rolls back.
    CriticalFailure { step_id: String, error: String },
    /// The cancellation flag was observed.
    Cancelled,
}

/// Drives workflow executions. Cheap to clone; all heavy state is shared.
#[derive(Clone)]
pub struct ExecutionEngine {
    dispatcher: Arc<RequestDispatcher>,
    monitor: Arc<ExecutionMonitor>,
    coordinator: Arc<TransactionCoordinator>,
    config: EngineConfig,
    events: EventEmitter,
}

impl ExecutionEngine {
    pub fn new(
        dispatcher: Arc<RequestDispatcher>,
        monitor: Arc<ExecutionMonitor>,
        coordinator: Arc<TransactionCoordinator>,
        config: EngineConfig,
        events: EventEmitter,
    ) -> Self {
        Self {
            dispatcher,
            monitor,
            coordinator,
            config,
            events,
        }
    }

    pub fn monitor(&self) -> &Arc<ExecutionMonitor> {
        &self.monitor
    }

    /// Run one execution to a terminal status.
    pub async fn run(
        &self,
        workflow: Arc<Workflow>,
        plan: ExecutionPlan,
        state: ExecutionHandleState,
    ) -> ExecutionStatus {
        let execution_id = {
            let mut ctx = state.write();
            ctx.status = ExecutionStatus::Running;
            ctx.execution_id.clone()
        };
        info!(
            execution_id = %execution_id,
            workflow_id = %workflow.id,
            mode = ?workflow.mode,
            steps = workflow.steps.len(),
            "execution started"
        );

        let outcome = match workflow.mode {
            ExecutionMode::Parallel => self.run_parallel(&workflow, &plan, &state).await,
            ExecutionMode::Sequential | ExecutionMode::Conditional | ExecutionMode::Pipeline => {
                self.run_ordered(&workflow, &plan, &state).await
            }
        };

        let final_status = match outcome {
            RunOutcome::Finished => {
                state.write().finish(ExecutionStatus::Completed);
                self.events.emit(OrchestratorEvent::ExecutionCompleted {
                    execution_id: execution_id.clone(),
                    timestamp: chrono::Utc::now(),
                });
                info!(execution_id = %execution_id, "execution completed");
                ExecutionStatus::Completed
            }
            RunOutcome::CriticalFailure { step_id, error } => {
                let transaction_id = {
                    let mut ctx = state.write();
                    resolve_remaining(&mut ctx, StepStatus::Skipped);
                    ctx.finish(ExecutionStatus::Failed);
                    ctx.transaction_id.clone()
                };
                self.events.emit(OrchestratorEvent::ExecutionFailed {
                    execution_id: execution_id.clone(),
                    error: format!("critical step '{step_id}' failed: {error}"),
                    timestamp: chrono::Utc::now(),
                });
                warn!(
                    execution_id = %execution_id,
                    step_id = %step_id,
                    error = %error,
                    "execution aborted by critical failure"
                );
                if let Some(transaction_id) = transaction_id {
                    self.rollback_after_abort(&transaction_id, &workflow, &state)
                        .await;
                }
                ExecutionStatus::Failed
            }
            RunOutcome::Cancelled => {
                {
                    let mut ctx = state.write();
                    resolve_remaining(&mut ctx, StepStatus::Cancelled);
                    ctx.finish(ExecutionStatus::Cancelled);
                }
                self.events.emit(OrchestratorEvent::ExecutionCancelled {
                    execution_id: execution_id.clone(),
                    timestamp: chrono::Utc::now(),
                });
                info!(execution_id = %execution_id, "execution cancelled");
                ExecutionStatus::Cancelled
            }
        };
        self.emit_progress(&state);
        final_status
    }

    /// Sequential, Pipeline, and Conditional modes share the ordered walk;
    /// they differ only in parameter injection and predicate handling.
    async fn run_ordered(
        &self,
        workflow: &Arc<Workflow>,
        plan: &ExecutionPlan,
        state: &ExecutionHandleState,
    ) -> RunOutcome {
        let mut unsatisfied: HashSet<String> = HashSet::new();

        for step_id in &plan.order {
            if state.read().cancel_requested {
                return RunOutcome::Cancelled;
            }
            let Some(step) = workflow.step(step_id) else {
                continue;
            };

            if step.dependencies.iter().any(|d| unsatisfied.contains(d)) {
                self.skip_step(state, step_id, "dependency not satisfied");
                unsatisfied.insert(step_id.clone());
                continue;
            }

            if workflow.mode == ExecutionMode::Conditional {
                if let Some(condition) = &step.condition {
                    let holds = condition.evaluate(&state.read().data);
                    if !holds {
                        // Condition skips do not cascade; dependents may
                        // still run on their own predicate.
                        self.skip_step(state, step_id, "condition not met");
                        continue;
                    }
                }
            }

            match self.execute_step(workflow, step, state).await {
                StepStatus::Completed => {}
                StepStatus::Cancelled => return RunOutcome::Cancelled,
                StepStatus::Failed => {
                    let error = step_error(state, step_id);
                    if step.critical {
                        return RunOutcome::CriticalFailure {
                            step_id: step_id.clone(),
                            error,
                        };
                    }
                    unsatisfied.insert(step_id.clone());
                }
                other => {
                    debug!(step_id = %step_id, status = ?other, "unexpected step outcome");
                }
            }
        }
        RunOutcome::Finished
    }

    /// Parallel mode: dispatch each wavefront concurrently and wait out the
    /// whole wave before recomputing what is still runnable.
    async fn run_parallel(
        &self,
        workflow: &Arc<Workflow>,
        plan: &ExecutionPlan,
        state: &ExecutionHandleState,
    ) -> RunOutcome {
        let mut unsatisfied: HashSet<String> = HashSet::new();
        let max_concurrency = self.config.max_concurrency;

        for wave in &plan.waves {
            if state.read().cancel_requested {
                return RunOutcome::Cancelled;
            }

            let mut queue: VecDeque<WorkflowStep> = VecDeque::new();
            for step_id in wave {
                let Some(step) = workflow.step(step_id) else {
                    continue;
                };
                if step.dependencies.iter().any(|d| unsatisfied.contains(d)) {
                    self.skip_step(state, step_id, "dependency not satisfied");
                    unsatisfied.insert(step_id.clone());
                    continue;
                }
                queue.push_back(step.clone());
            }

            let mut join_set: JoinSet<(String, bool, StepStatus)> = JoinSet::new();
            let mut critical_failure: Option<(String, String)> = None;
            let mut cancelled = false;

            loop {
                while !queue.is_empty()
                    && (max_concurrency == 0 || join_set.len() < max_concurrency)
                {
                    let Some(step) = queue.pop_front() else {
                        break;
                    };
                    let engine = self.clone();
                    let workflow = Arc::clone(workflow);
                    let state = Arc::clone(state);
                    join_set.spawn(async move {
                        let status = engine.execute_step(&workflow, &step, &state).await;
                        (step.id, step.critical, status)
                    });
                }

                let Some(joined) = join_set.join_next().await else {
                    break;
                };
                match joined {
                    Ok((step_id, critical, status)) => match status {
                        StepStatus::Failed => {
                            if critical && critical_failure.is_none() {
                                critical_failure =
                                    Some((step_id.clone(), step_error(state, &step_id)));
                            }
                            unsatisfied.insert(step_id);
                        }
                        StepStatus::Cancelled => cancelled = true,
                        _ => {}
                    },
                    Err(join_error) => {
                        warn!(error = %join_error, "step task join error");
                    }
                }
            }

            if let Some((step_id, error)) = critical_failure {
                return RunOutcome::CriticalFailure { step_id, error };
            }
            if cancelled {
                return RunOutcome::Cancelled;
            }
        }
        RunOutcome::Finished
    }

    /// Dispatch one step to its terminal status, applying the retry policy.
    /// A step with `max_retries = N` is attempted at most `N + 1` times;
    /// every attempt is a fresh request with a fresh id.
    async fn execute_step(
        &self,
        workflow: &Workflow,
        step: &WorkflowStep,
        state: &ExecutionHandleState,
    ) -> StepStatus {
        let execution_id = {
            let mut ctx = state.write();
            ctx.mark_running(&step.id);
            ctx.execution_id.clone()
        };
        self.events.emit(OrchestratorEvent::StepStarted {
            execution_id: execution_id.clone(),
            step_id: step.id.clone(),
            timestamp: chrono::Utc::now(),
        });
        debug!(
            execution_id = %execution_id,
            step_id = %step.id,
            target = %format!("{}.{}", step.plugin_id, step.method),
            "dispatching step"
        );

        let max_retries = step.max_retries.unwrap_or(self.config.default_max_retries);
        let retry_delay = Duration::from_millis(
            step.retry_delay_ms
                .unwrap_or(self.config.default_retry_delay_ms),
        );
        let timeout =
            Duration::from_millis(step.timeout_ms.unwrap_or(self.config.default_timeout_ms));
        let params = self.step_parameters(workflow, step, state);

        let mut attempt: u32 = 0;
        loop {
            let request = Request::new(execution_id.as_str(), &step.plugin_id, &step.method)
                .with_params(params.clone())
                .with_timeout(timeout);
            let response = self.dispatcher.send_request_async(request).await;

            if response.is_success() {
                state.write().mark_completed(&step.id, response.payload.clone());
                self.events.emit(OrchestratorEvent::StepCompleted {
                    execution_id: execution_id.clone(),
                    step_id: step.id.clone(),
                    payload: response.payload,
                    timestamp: chrono::Utc::now(),
                });
                self.emit_progress(state);
                return StepStatus::Completed;
            }

            let error = format!("{}: {}", response.status, response.message);
            if attempt < max_retries {
                if state.read().cancel_requested {
                    state.write().mark_cancelled(&step.id);
                    return StepStatus::Cancelled;
                }
                attempt += 1;
                state.write().mark_retrying(&step.id, &error);
                self.events.emit(OrchestratorEvent::StepRetrying {
                    execution_id: execution_id.clone(),
                    step_id: step.id.clone(),
                    retry_index: attempt,
                    timestamp: chrono::Utc::now(),
                });
                warn!(
                    execution_id = %execution_id,
                    step_id = %step.id,
                    retry_index = attempt,
                    error = %error,
                    "step failed, retrying"
                );
                if !retry_delay.is_zero() {
                    tokio::time::sleep(retry_delay).await;
                }
                state.write().mark_running(&step.id);
                continue;
            }

            state.write().mark_failed(&step.id, &error);
            self.events.emit(OrchestratorEvent::StepFailed {
                execution_id: execution_id.clone(),
                step_id: step.id.clone(),
                error: error.clone(),
                timestamp: chrono::Utc::now(),
            });
            self.emit_progress(state);
            warn!(
                execution_id = %execution_id,
                step_id = %step.id,
                attempts = attempt + 1,
                error = %error,
                "step failed permanently"
            );
            return StepStatus::Failed;
        }
    }

    /// In Pipeline mode a step's parameters are augmented with its declared
    /// upstream steps' result payloads, keyed by upstream step id.
    fn step_parameters(
        &self,
        workflow: &Workflow,
        step: &WorkflowStep,
        state: &ExecutionHandleState,
    ) -> Map<String, Value> {
        let mut params = step.parameters.clone();
        if workflow.mode == ExecutionMode::Pipeline {
            let ctx = state.read();
            for dependency in &step.dependencies {
                if let Some(payload) = ctx.data.get(dependency) {
                    params.insert(dependency.clone(), payload.clone());
                }
            }
        }
        params
    }

    fn skip_step(&self, state: &ExecutionHandleState, step_id: &str, reason: &str) {
        let execution_id = {
            let mut ctx = state.write();
            ctx.mark_skipped(step_id);
            ctx.execution_id.clone()
        };
        self.events.emit(OrchestratorEvent::StepSkipped {
            execution_id,
            step_id: step_id.to_string(),
            reason: reason.to_string(),
            timestamp: chrono::Utc::now(),
        });
        self.emit_progress(state);
    }

    fn emit_progress(&self, state: &ExecutionHandleState) {
        if !self.events.is_active() {
            return;
        }
        let (execution_id, progress, current_step) = {
            let ctx = state.read();
            (ctx.execution_id.clone(), ctx.progress(), ctx.current_step())
        };
        self.events.emit(OrchestratorEvent::ExecutionProgress {
            execution_id,
            progress,
            current_step,
        });
    }

    async fn rollback_after_abort(
        &self,
        transaction_id: &str,
        workflow: &Workflow,
        state: &ExecutionHandleState,
    ) {
        let default_timeout = Duration::from_millis(self.config.default_timeout_ms);
        match self
            .coordinator
            .rollback(transaction_id, workflow, state, default_timeout)
            .await
        {
            Ok(report) => {
                if report.failed_compensations() > 0 {
                    warn!(
                        transaction_id,
                        failed = report.failed_compensations(),
                        "rollback finished with failed compensations"
                    );
                }
            }
            Err(error) => {
                // Already committed or rolled back by the caller.
                warn!(transaction_id, %error, "automatic rollback not performed");
            }
        }
    }
}

fn step_error(state: &ExecutionHandleState, step_id: &str) -> String {
    state
        .read()
        .steps
        .get(step_id)
        .and_then(|r| r.error.clone())
        .unwrap_or_else(|| "step failed".to_string())
}

/// Move every still-pending step to the given terminal status.
fn resolve_remaining(ctx: &mut super::context::ExecutionContext, status: StepStatus) {
    let pending: Vec<String> = ctx
        .step_order
        .iter()
        .filter(|id| {
            ctx.steps
                .get(*id)
                .is_some_and(|r| !r.status.is_resolved())
        })
        .cloned()
        .collect();
    for step_id in pending {
        match status {
            StepStatus::Cancelled => ctx.mark_cancelled(&step_id),
            _ => ctx.mark_skipped(&step_id),
        }
    }
}
