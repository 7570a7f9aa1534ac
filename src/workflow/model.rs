//! Workflow and step definitions.
//!
//! A [`Workflow`] is immutable once registered. Structural problems (empty
//! step list, duplicate ids, dangling dependencies, cycles, rollback entries
//! for unknown steps) are rejected by [`Workflow::validate`] before any
//! execution starts — nothing is ever partially applied.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};

use crate::error::OrchestratorError;

use super::condition::StepCondition;

/// How the engine walks the resolved step order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Strict resolved order, one step at a time.
    Sequential,
    /// Independent steps of each wavefront run concurrently.
    Parallel,
    /// Sequential order, but each step's predicate decides run-or-skip.
    Conditional,
    /// Sequential order with upstream result payloads fed into dependents.
    Pipeline,
}

impl Default for ExecutionMode {
    fn default() -> Self {
        ExecutionMode::Sequential
    }
}

/// One unit of work targeting a plugin service method.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowStep {
    pub id: String,
    pub plugin_id: String,
    /// Service name within the plugin; informational for dispatch, which
    /// addresses handlers by `(plugin_id, method)`.
    #[serde(default)]
    pub service: String,
    pub method: String,
    #[serde(default)]
    pub parameters: Map<String, Value>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Per-request timeout; falls back to the engine default when unset.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    /// Maximum retry count; a step runs at most `max_retries + 1` times.
    #[serde(default)]
    pub max_retries: Option<u32>,
    #[serde(default)]
    pub retry_delay_ms: Option<u64>,
    /// A failing critical step aborts the whole execution.
    #[serde(default)]
    pub critical: bool,
    /// Predicate consulted in `Conditional` mode.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<StepCondition>,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

impl WorkflowStep {
    pub fn new(
        id: impl Into<String>,
        plugin_id: impl Into<String>,
        method: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            plugin_id: plugin_id.into(),
            service: String::new(),
            method: method.into(),
            parameters: Map::new(),
            dependencies: Vec::new(),
            timeout_ms: None,
            max_retries: None,
            retry_delay_ms: None,
            critical: false,
            condition: None,
            metadata: HashMap::new(),
        }
    }

    pub fn in_service(mut self, service: impl Into<String>) -> Self {
        self.service = service.into();
        self
    }

    pub fn depends_on(mut self, step_id: impl Into<String>) -> Self {
        self.dependencies.push(step_id.into());
        self
    }

    pub fn with_parameters(mut self, parameters: Map<String, Value>) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn with_retries(mut self, max_retries: u32, retry_delay_ms: u64) -> Self {
        self.max_retries = Some(max_retries);
        self.retry_delay_ms = Some(retry_delay_ms);
        self
    }

    pub fn critical(mut self, critical: bool) -> Self {
        self.critical = critical;
        self
    }

    pub fn with_condition(mut self, condition: StepCondition) -> Self {
        self.condition = Some(condition);
        self
    }
}

/// A registered, named DAG of steps with an execution mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, rename = "execution_mode")]
    pub mode: ExecutionMode,
    pub steps: Vec<WorkflowStep>,
    /// Compensating steps keyed by the step id they undo.
    #[serde(default)]
    pub rollback_steps: HashMap<String, WorkflowStep>,
}

impl Workflow {
    pub fn new(id: impl Into<String>, name: impl Into<String>, mode: ExecutionMode) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            mode,
            steps: Vec::new(),
            rollback_steps: HashMap::new(),
        }
    }

    pub fn add_step(mut self, step: WorkflowStep) -> Self {
        self.steps.push(step);
        self
    }

    pub fn with_rollback(mut self, step_id: impl Into<String>, rollback: WorkflowStep) -> Self {
        self.rollback_steps.insert(step_id.into(), rollback);
        self
    }

    pub fn step(&self, step_id: &str) -> Option<&WorkflowStep> {
        self.steps.iter().find(|s| s.id == step_id)
    }

    /// Structural validation. Cycle detection is delegated to the resolver so
    /// the offending step ids are reported.
    pub fn validate(&self) -> Result<(), OrchestratorError> {
        if self.id.is_empty() {
            return Err(OrchestratorError::WorkflowValidation(
                "workflow id must not be empty".to_string(),
            ));
        }
        if self.steps.is_empty() {
            return Err(OrchestratorError::WorkflowValidation(format!(
                "workflow '{}' has no steps",
                self.id
            )));
        }

        let mut ids = HashSet::new();
        for step in &self.steps {
            if step.id.is_empty() {
                return Err(OrchestratorError::WorkflowValidation(format!(
                    "workflow '{}' contains a step with an empty id",
                    self.id
                )));
            }
            if !ids.insert(step.id.as_str()) {
                return Err(OrchestratorError::WorkflowValidation(format!(
                    "duplicate step id '{}' in workflow '{}'",
                    step.id, self.id
                )));
            }
        }

        for step in &self.steps {
            for dependency in &step.dependencies {
                if dependency == &step.id {
                    return Err(OrchestratorError::WorkflowValidation(format!(
                        "step '{}' depends on itself",
                        step.id
                    )));
                }
                if !ids.contains(dependency.as_str()) {
                    return Err(OrchestratorError::UnknownDependency {
                        step_id: step.id.clone(),
                        dependency: dependency.clone(),
                    });
                }
            }
        }

        for step_id in self.rollback_steps.keys() {
            if !ids.contains(step_id.as_str()) {
                return Err(OrchestratorError::WorkflowValidation(format!(
                    "rollback registered for unknown step '{step_id}'"
                )));
            }
        }

        super::resolver::resolve(self).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn three_step_workflow() -> Workflow {
        Workflow::new("wf", "load-validate-save", ExecutionMode::Sequential)
            .add_step(WorkflowStep::new("load", "storage", "load").in_service("blobs"))
            .add_step(WorkflowStep::new("validate", "checker", "validate").depends_on("load"))
            .add_step(WorkflowStep::new("save", "storage", "save").depends_on("validate"))
    }

    #[test]
    fn test_valid_workflow_passes() {
        assert!(three_step_workflow().validate().is_ok());
    }

    #[test]
    fn test_empty_workflow_rejected() {
        let workflow = Workflow::new("wf", "empty", ExecutionMode::Sequential);
        assert!(matches!(
            workflow.validate(),
            Err(OrchestratorError::WorkflowValidation(_))
        ));
    }

    #[test]
    fn test_duplicate_step_id_rejected() {
        let workflow = Workflow::new("wf", "dup", ExecutionMode::Sequential)
            .add_step(WorkflowStep::new("a", "p", "m"))
            .add_step(WorkflowStep::new("a", "p", "m"));
        assert!(matches!(
            workflow.validate(),
            Err(OrchestratorError::WorkflowValidation(_))
        ));
    }

    #[test]
    fn test_dangling_dependency_rejected() {
        let workflow = Workflow::new("wf", "dangling", ExecutionMode::Sequential)
            .add_step(WorkflowStep::new("a", "p", "m").depends_on("ghost"));
        match workflow.validate() {
            Err(OrchestratorError::UnknownDependency { step_id, dependency }) => {
                assert_eq!(step_id, "a");
                assert_eq!(dependency, "ghost");
            }
            other => panic!("expected UnknownDependency, got {other:?}"),
        }
    }

    #[test]
    fn test_self_dependency_rejected() {
        let workflow = Workflow::new("wf", "selfdep", ExecutionMode::Sequential)
            .add_step(WorkflowStep::new("a", "p", "m").depends_on("a"));
        assert!(workflow.validate().is_err());
    }

    #[test]
    fn test_rollback_for_unknown_step_rejected() {
        let workflow = Workflow::new("wf", "rb", ExecutionMode::Sequential)
            .add_step(WorkflowStep::new("a", "p", "m"))
            .with_rollback("ghost", WorkflowStep::new("undo", "p", "undo"));
        assert!(matches!(
            workflow.validate(),
            Err(OrchestratorError::WorkflowValidation(_))
        ));
    }

    #[test]
    fn test_definition_round_trips_through_json() {
        let workflow = three_step_workflow();
        let text = serde_json::to_string(&workflow).unwrap();
        let parsed: Workflow = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed.id, "wf");
        assert_eq!(parsed.steps.len(), 3);
        assert_eq!(parsed.steps[0].service, "blobs");
        assert_eq!(parsed.steps[1].dependencies, vec!["load"]);
        assert!(parsed.validate().is_ok());
    }

    #[test]
    fn test_sparse_step_definition_loads() {
        let step: WorkflowStep = serde_json::from_value(json!({
            "id": "s1",
            "plugin_id": "files",
            "method": "read"
        }))
        .unwrap();
        assert_eq!(step.service, "");
        assert_eq!(step.timeout_ms, None);
        assert_eq!(step.max_retries, None);
        assert!(!step.critical);
        assert!(step.dependencies.is_empty());
    }
}
