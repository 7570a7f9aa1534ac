//! The orchestrator facade: one object owning the service registry, request
//! dispatcher, workflow store, execution engine, transaction coordinator,
//! and execution monitor.
//!
//! Construction goes through [`OrchestratorBuilder`]; [`Orchestrator::new`]
//! gives the default configuration. Executions run on spawned tasks and are
//! observed through the returned [`ExecutionHandle`].

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::config::EngineConfig;
use crate::engine::{
    ExecutionContext, ExecutionEngine, ExecutionMonitor, ExecutionStatus, ExecutionStatusReport,
    RollbackReport, StepResult, TransactionCoordinator,
};
use crate::error::{HandlerResult, OrchestratorError, OrchestratorResult};
use crate::events::{create_event_channel, EventEmitter, EventReceiver};
use crate::messaging::{
    AsyncServiceHandler, MessagingStats, Request, RequestDispatcher, Response, ServiceEndpoint,
    ServiceHandler, ServiceRegistry,
};
use crate::workflow::{resolve, Workflow};

/// Observer handle for one running execution.
///
/// The handle is detached from the engine task: dropping it does not cancel
/// the execution. [`ExecutionHandle::wait`] resolves once the execution
/// reaches a terminal status.
pub struct ExecutionHandle {
    execution_id: String,
    state: crate::engine::ExecutionHandleState,
    status_rx: watch::Receiver<ExecutionStatus>,
}

impl ExecutionHandle {
    pub fn execution_id(&self) -> &str {
        &self.execution_id
    }

    /// Current status snapshot.
    pub fn status(&self) -> ExecutionStatus {
        self.state.read().status
    }

    /// Fraction of steps resolved, in `0.0..=1.0`.
    pub fn progress(&self) -> f64 {
        self.state.read().progress()
    }

    /// Step results in declaration order.
    pub fn results(&self) -> Vec<StepResult> {
        self.state.read().ordered_results()
    }

    /// Wait for the execution to reach a terminal status.
    pub async fn wait(&mut self) -> ExecutionStatus {
        loop {
            let status = *self.status_rx.borrow();
            if status.is_terminal() {
                return status;
            }
            if self.status_rx.changed().await.is_err() {
                // Engine task is gone; the context holds the final word.
                return self.state.read().status;
            }
        }
    }
}

/// Bridges an external plugin's command surface onto the service registry.
/// Each method the plugin reports becomes one registered endpoint under the
/// plugin's id.
#[async_trait]
pub trait PluginCommandExecutor: Send + Sync {
    fn plugin_id(&self) -> &str;
    fn methods(&self) -> Vec<String>;
    async fn execute(&self, method: &str, params: Map<String, Value>) -> HandlerResult;
}

struct PluginMethodHandler {
    executor: Arc<dyn PluginCommandExecutor>,
    method: String,
}

#[async_trait]
impl AsyncServiceHandler for PluginMethodHandler {
    async fn handle(&self, request: Request) -> HandlerResult {
        self.executor.execute(&self.method, request.params).await
    }
}

/// Builder for [`Orchestrator`].
#[derive(Default)]
pub struct OrchestratorBuilder {
    config: EngineConfig,
    allow_workflow_replacement: bool,
}

impl OrchestratorBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Let `register_workflow` replace an existing definition instead of
    /// failing with `DuplicateWorkflow`.
    pub fn allow_workflow_replacement(mut self) -> Self {
        self.allow_workflow_replacement = true;
        self
    }

    pub fn build(self) -> Orchestrator {
        let (event_tx, event_rx) = create_event_channel();
        let events = EventEmitter::new(event_tx, Arc::new(AtomicBool::new(false)));

        let registry = Arc::new(ServiceRegistry::new(events.clone()));
        let dispatcher = Arc::new(RequestDispatcher::new(Arc::clone(&registry)));
        let monitor = Arc::new(ExecutionMonitor::new());
        let coordinator = Arc::new(TransactionCoordinator::new(
            Arc::clone(&dispatcher),
            events.clone(),
        ));
        let engine = ExecutionEngine::new(
            Arc::clone(&dispatcher),
            Arc::clone(&monitor),
            Arc::clone(&coordinator),
            self.config.clone(),
            events.clone(),
        );

        Orchestrator {
            registry,
            dispatcher,
            monitor,
            coordinator,
            engine,
            config: self.config,
            allow_workflow_replacement: self.allow_workflow_replacement,
            workflows: RwLock::new(HashMap::new()),
            events,
            event_rx: Mutex::new(Some(event_rx)),
        }
    }
}

/// Entry point of the crate. See the crate-level docs for an overview.
pub struct Orchestrator {
    registry: Arc<ServiceRegistry>,
    dispatcher: Arc<RequestDispatcher>,
    monitor: Arc<ExecutionMonitor>,
    coordinator: Arc<TransactionCoordinator>,
    engine: ExecutionEngine,
    config: EngineConfig,
    allow_workflow_replacement: bool,
    workflows: RwLock<HashMap<String, Arc<Workflow>>>,
    events: EventEmitter,
    event_rx: Mutex<Option<EventReceiver>>,
}

impl Default for Orchestrator {
    fn default() -> Self {
        Self::new()
    }
}

impl Orchestrator {
    pub fn new() -> Self {
        OrchestratorBuilder::new().build()
    }

    pub fn builder() -> OrchestratorBuilder {
        OrchestratorBuilder::new()
    }

    /// Take the event stream and switch event emission on. Returns `None`
    /// if the stream has already been taken.
    pub fn subscribe_events(&self) -> Option<EventReceiver> {
        let rx = self.event_rx.lock().take()?;
        self.events.set_active(true);
        Some(rx)
    }

    // ---- messaging surface -------------------------------------------------

    pub fn register_service(&self, endpoint: ServiceEndpoint, handler: Arc<dyn ServiceHandler>) {
        self.registry.register_service(endpoint, handler);
    }

    pub fn register_async_service(
        &self,
        endpoint: ServiceEndpoint,
        handler: Arc<dyn AsyncServiceHandler>,
    ) {
        self.registry.register_async_service(endpoint, handler);
    }

    pub fn unregister_service(&self, provider_id: &str) -> bool {
        self.registry.unregister_service(provider_id)
    }

    pub fn is_registered(&self, provider_id: &str) -> bool {
        self.registry.is_registered(provider_id)
    }

    pub fn list_services(&self, provider_id: Option<&str>) -> Vec<ServiceEndpoint> {
        self.registry.list_services(provider_id)
    }

    /// Register every method an external plugin reports as a service
    /// endpoint under the plugin's id.
    pub fn mount_plugin_executor(&self, executor: Arc<dyn PluginCommandExecutor>) {
        let plugin_id = executor.plugin_id().to_string();
        for method in executor.methods() {
            self.registry.register_async_service(
                ServiceEndpoint::new(&plugin_id, &method),
                Arc::new(PluginMethodHandler {
                    executor: Arc::clone(&executor),
                    method,
                }),
            );
        }
        info!(plugin_id, "plugin executor mounted");
    }

    pub fn send_request(&self, request: &Request) -> Response {
        self.dispatcher.send_request(request)
    }

    pub async fn send_request_async(&self, request: Request) -> Response {
        self.dispatcher.send_request_async(request).await
    }

    pub fn get_statistics(&self) -> MessagingStats {
        self.dispatcher.get_statistics()
    }

    pub fn reset_statistics(&self) {
        self.dispatcher.reset_statistics()
    }

    pub fn pending_count(&self) -> usize {
        self.dispatcher.pending_count()
    }

    // ---- workflow store ----------------------------------------------------

    /// Validate and store a workflow definition. Fails on structural errors
    /// and, unless replacement was enabled at build time, on duplicate ids.
    pub fn register_workflow(&self, workflow: Workflow) -> OrchestratorResult<()> {
        workflow.validate()?;
        let mut workflows = self.workflows.write();
        if !self.allow_workflow_replacement && workflows.contains_key(&workflow.id) {
            return Err(OrchestratorError::DuplicateWorkflow(workflow.id));
        }
        info!(workflow_id = %workflow.id, steps = workflow.steps.len(), "workflow registered");
        workflows.insert(workflow.id.clone(), Arc::new(workflow));
        Ok(())
    }

    pub fn unregister_workflow(&self, workflow_id: &str) -> bool {
        self.workflows.write().remove(workflow_id).is_some()
    }

    pub fn get_workflow(&self, workflow_id: &str) -> Option<Arc<Workflow>> {
        self.workflows.read().get(workflow_id).cloned()
    }

    pub fn list_workflows(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.workflows.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    // ---- execution ---------------------------------------------------------

    /// Start an execution of a registered workflow on a spawned task.
    pub fn execute_workflow(
        &self,
        workflow_id: &str,
        initial_data: Map<String, Value>,
    ) -> OrchestratorResult<ExecutionHandle> {
        self.start_execution(workflow_id, initial_data, None)
    }

    /// Start an execution wrapped in a transaction: a critical failure
    /// triggers an automatic rollback of completed steps.
    pub fn execute_workflow_in_transaction(
        &self,
        workflow_id: &str,
        transaction_id: &str,
        initial_data: Map<String, Value>,
    ) -> OrchestratorResult<ExecutionHandle> {
        self.start_execution(workflow_id, initial_data, Some(transaction_id))
    }

    fn start_execution(
        &self,
        workflow_id: &str,
        initial_data: Map<String, Value>,
        transaction_id: Option<&str>,
    ) -> OrchestratorResult<ExecutionHandle> {
        let workflow = self
            .get_workflow(workflow_id)
            .ok_or_else(|| OrchestratorError::WorkflowNotFound(workflow_id.to_string()))?;
        let plan = resolve(&workflow)?;

        let execution_id = uuid::Uuid::new_v4().to_string();
        let mut context = ExecutionContext::new(&execution_id, &workflow, initial_data);
        if let Some(transaction_id) = transaction_id {
            self.coordinator.begin(transaction_id, &execution_id)?;
            context.transaction_id = Some(transaction_id.to_string());
        }
        let state = self.monitor.insert(context);

        let (status_tx, status_rx) = watch::channel(ExecutionStatus::Pending);
        let engine = self.engine.clone();
        let task_state = Arc::clone(&state);
        tokio::spawn(async move {
            let final_status = engine.run(workflow, plan, task_state).await;
            let _ = status_tx.send(final_status);
        });

        Ok(ExecutionHandle {
            execution_id,
            state,
            status_rx,
        })
    }

    /// Request cooperative cancellation of a running execution.
    pub fn cancel_workflow(&self, execution_id: &str) -> OrchestratorResult<()> {
        self.monitor.cancel(execution_id)
    }

    pub fn get_execution_status(
        &self,
        execution_id: &str,
    ) -> OrchestratorResult<ExecutionStatusReport> {
        self.monitor.get_status(execution_id)
    }

    pub fn get_step_results(&self, execution_id: &str) -> OrchestratorResult<Vec<StepResult>> {
        self.monitor.get_step_results(execution_id)
    }

    pub fn list_active_executions(&self) -> Vec<String> {
        self.monitor.list_active_executions()
    }

    /// Drop a terminal execution's record.
    pub fn reap_execution(&self, execution_id: &str) -> OrchestratorResult<()> {
        self.monitor.reap(execution_id)
    }

    // ---- transactions ------------------------------------------------------

    /// Open a transaction for an execution. When the execution is already
    /// live its context picks up the transaction id, so a later critical
    /// failure still triggers automatic rollback.
    pub fn begin_transaction(
        &self,
        transaction_id: &str,
        execution_id: &str,
    ) -> OrchestratorResult<()> {
        self.coordinator.begin(transaction_id, execution_id)?;
        if let Some(state) = self.monitor.get(execution_id) {
            state.write().transaction_id = Some(transaction_id.to_string());
        }
        Ok(())
    }

    pub fn commit_transaction(&self, transaction_id: &str) -> OrchestratorResult<()> {
        self.coordinator.commit(transaction_id)
    }

    /// Manually roll back a transaction, compensating completed steps in
    /// reverse completion order.
    pub async fn rollback_transaction(
        &self,
        transaction_id: &str,
    ) -> OrchestratorResult<RollbackReport> {
        let execution_id = self
            .coordinator
            .execution_id(transaction_id)
            .ok_or_else(|| OrchestratorError::TransactionNotFound(transaction_id.to_string()))?;
        let state = self
            .monitor
            .get(&execution_id)
            .ok_or_else(|| OrchestratorError::ExecutionNotFound(execution_id.clone()))?;
        let workflow_id = state.read().workflow_id.clone();
        let workflow = self
            .get_workflow(&workflow_id)
            .ok_or_else(|| OrchestratorError::WorkflowNotFound(workflow_id))?;

        let default_timeout = Duration::from_millis(self.config.default_timeout_ms);
        self.coordinator
            .rollback(transaction_id, &workflow, &state, default_timeout)
            .await
    }

    /// Resolve all pending requests with an error and stop emitting events.
    /// Running engine tasks observe the dispatcher errors and finish.
    pub fn shutdown(&self) {
        let drained = self.dispatcher.shutdown();
        if drained > 0 {
            warn!(drained, "shutdown resolved pending requests with errors");
        }
        self.events.set_active(false);
        info!("orchestrator shut down");
    }
}
