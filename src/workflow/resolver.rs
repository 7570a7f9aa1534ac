//! Dependency resolution over a workflow's step DAG.
//!
//! Builds a `petgraph` digraph from the declared dependencies, reports cycles
//! with the member step ids, and emits both a linear order (ties broken by
//! declaration order, so the result is stable and deterministic) and the
//! parallel wavefronts derived from dependency depth.

use petgraph::stable_graph::{NodeIndex, StableDiGraph};
use std::collections::HashMap;

use crate::error::OrchestratorError;

use super::model::Workflow;

/// Resolved execution order for one workflow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionPlan {
    /// Topological order, declaration-stable.
    pub order: Vec<String>,
    /// Groups of mutually independent steps; wave N only depends on waves
    /// `< N`.
    pub waves: Vec<Vec<String>>,
}

/// Compute the execution plan, or fail with a configuration error before
/// anything is dispatched.
pub fn resolve(workflow: &Workflow) -> Result<ExecutionPlan, OrchestratorError> {
    let mut graph = StableDiGraph::<usize, ()>::new();
    let mut index_of: HashMap<&str, NodeIndex> = HashMap::new();

    for (position, step) in workflow.steps.iter().enumerate() {
        let idx = graph.add_node(position);
        index_of.insert(step.id.as_str(), idx);
    }

    // Edge dependency -> dependent.
    for step in &workflow.steps {
        let target = index_of[step.id.as_str()];
        for dependency in &step.dependencies {
            let source = index_of.get(dependency.as_str()).copied().ok_or_else(|| {
                OrchestratorError::UnknownDependency {
                    step_id: step.id.clone(),
                    dependency: dependency.clone(),
                }
            })?;
            graph.add_edge(source, target, ());
        }
    }

    if let Some(cycle) = find_cycle(workflow, &graph, &index_of) {
        return Err(OrchestratorError::CycleDetected {
            workflow_id: workflow.id.clone(),
            cycle,
        });
    }

    // Dependency depth doubles as the wave number; within a wave and within
    // the linear order, declaration order decides ties.
    let mut depth: HashMap<&str, usize> = HashMap::new();
    let mut order: Vec<String> = Vec::with_capacity(workflow.steps.len());
    let mut remaining: Vec<usize> = (0..workflow.steps.len()).collect();
    while !remaining.is_empty() {
        let mut progressed = false;
        let mut still_remaining = Vec::new();
        for position in remaining {
            let step = &workflow.steps[position];
            let deps_resolved = step
                .dependencies
                .iter()
                .all(|d| depth.contains_key(d.as_str()));
            if deps_resolved {
                let wave = step
                    .dependencies
                    .iter()
                    .map(|d| depth[d.as_str()] + 1)
                    .max()
                    .unwrap_or(0);
                depth.insert(step.id.as_str(), wave);
                order.push(step.id.clone());
                progressed = true;
            } else {
                still_remaining.push(position);
            }
        }
        // Unreachable once the cycle check above passed.
        if !progressed {
            return Err(OrchestratorError::Internal(format!(
                "dependency resolution stalled for workflow '{}'",
                workflow.id
            )));
        }
        remaining = still_remaining;
    }

    let wave_count = depth.values().copied().max().map_or(0, |d| d + 1);
    let mut waves: Vec<Vec<String>> = vec![Vec::new(); wave_count];
    for step in &workflow.steps {
        waves[depth[step.id.as_str()]].push(step.id.clone());
    }

    Ok(ExecutionPlan { order, waves })
}

/// Depth-first search with an explicit recursion stack so the offending
/// cycle's step ids can be reported, not just its existence.
fn find_cycle(
    workflow: &Workflow,
    graph: &StableDiGraph<usize, ()>,
    index_of: &HashMap<&str, NodeIndex>,
) -> Option<Vec<String>> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Unvisited,
        InProgress,
        Done,
    }

    let mut marks: HashMap<NodeIndex, Mark> = index_of
        .values()
        .map(|&idx| (idx, Mark::Unvisited))
        .collect();
    let mut stack: Vec<NodeIndex> = Vec::new();

    fn visit(
        node: NodeIndex,
        graph: &StableDiGraph<usize, ()>,
        marks: &mut HashMap<NodeIndex, Mark>,
        stack: &mut Vec<NodeIndex>,
    ) -> Option<Vec<NodeIndex>> {
        marks.insert(node, Mark::InProgress);
        stack.push(node);
        for next in graph.neighbors_directed(node, petgraph::Direction::Outgoing) {
            match marks[&next] {
                Mark::InProgress => {
                    let start = stack.iter().position(|&n| n == next).unwrap_or(0);
                    let mut cycle: Vec<NodeIndex> = stack[start..].to_vec();
                    cycle.push(next);
                    return Some(cycle);
                }
                Mark::Unvisited => {
                    if let Some(cycle) = visit(next, graph, marks, stack) {
                        return Some(cycle);
                    }
                }
                Mark::Done => {}
            }
        }
        stack.pop();
        marks.insert(node, Mark::Done);
        None
    }

    for step in &workflow.steps {
        let idx = index_of[step.id.as_str()];
        if marks[&idx] == Mark::Unvisited {
            if let Some(cycle) = visit(idx, graph, &mut marks, &mut stack) {
                return Some(
                    cycle
                        .into_iter()
                        .filter_map(|idx| {
                            graph.node_weight(idx).map(|&p| workflow.steps[p].id.clone())
                        })
                        .collect(),
                );
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::model::{ExecutionMode, WorkflowStep};

    fn workflow(steps: Vec<WorkflowStep>) -> Workflow {
        let mut wf = Workflow::new("wf", "test", ExecutionMode::Sequential);
        wf.steps = steps;
        wf
    }

    #[test]
    fn test_linear_chain_order() {
        let wf = workflow(vec![
            WorkflowStep::new("load", "p", "m"),
            WorkflowStep::new("validate", "p", "m").depends_on("load"),
            WorkflowStep::new("save", "p", "m").depends_on("validate"),
        ]);
        let plan = resolve(&wf).unwrap();
        assert_eq!(plan.order, vec!["load", "validate", "save"]);
        assert_eq!(plan.waves.len(), 3);
    }

    #[test]
    fn test_order_respects_every_dependency() {
        let wf = workflow(vec![
            WorkflowStep::new("d", "p", "m").depends_on("b").depends_on("c"),
            WorkflowStep::new("b", "p", "m").depends_on("a"),
            WorkflowStep::new("c", "p", "m").depends_on("a"),
            WorkflowStep::new("a", "p", "m"),
        ]);
        let plan = resolve(&wf).unwrap();
        let pos = |id: &str| plan.order.iter().position(|s| s == id).unwrap();
        assert!(pos("a") < pos("b"));
        assert!(pos("a") < pos("c"));
        assert!(pos("b") < pos("d"));
        assert!(pos("c") < pos("d"));

        // A step never lands in an earlier wave than any dependency.
        let wave_of = |id: &str| plan.waves.iter().position(|w| w.contains(&id.to_string())).unwrap();
        assert!(wave_of("b") > wave_of("a"));
        assert!(wave_of("d") > wave_of("b"));
        assert!(wave_of("d") > wave_of("c"));
    }

    #[test]
    fn test_independent_steps_share_a_wave_in_declaration_order() {
        let wf = workflow(vec![
            WorkflowStep::new("z", "p", "m"),
            WorkflowStep::new("a", "p", "m"),
            WorkflowStep::new("m", "p", "m"),
        ]);
        let plan = resolve(&wf).unwrap();
        assert_eq!(plan.waves, vec![vec!["z", "a", "m"]]);
        assert_eq!(plan.order, vec!["z", "a", "m"]);
    }

    #[test]
    fn test_cycle_reported_with_member_ids() {
        let wf = workflow(vec![
            WorkflowStep::new("a", "p", "m").depends_on("c"),
            WorkflowStep::new("b", "p", "m").depends_on("a"),
            WorkflowStep::new("c", "p", "m").depends_on("b"),
        ]);
        match resolve(&wf) {
            Err(OrchestratorError::CycleDetected { cycle, .. }) => {
                assert!(cycle.len() >= 3);
                assert_eq!(cycle.first(), cycle.last());
                for id in ["a", "b", "c"] {
                    assert!(cycle.contains(&id.to_string()), "missing {id} in {cycle:?}");
                }
            }
            other => panic!("expected CycleDetected, got {other:?}"),
        }
    }

    #[test]
    fn test_dangling_dependency_reported() {
        let wf = workflow(vec![WorkflowStep::new("a", "p", "m").depends_on("ghost")]);
        assert!(matches!(
            resolve(&wf),
            Err(OrchestratorError::UnknownDependency { .. })
        ));
    }

    #[test]
    fn test_diamond_waves() {
        let wf = workflow(vec![
            WorkflowStep::new("root", "p", "m"),
            WorkflowStep::new("left", "p", "m").depends_on("root"),
            WorkflowStep::new("right", "p", "m").depends_on("root"),
            WorkflowStep::new("join", "p", "m").depends_on("left").depends_on("right"),
        ]);
        let plan = resolve(&wf).unwrap();
        assert_eq!(
            plan.waves,
            vec![vec!["root"], vec!["left", "right"], vec!["join"]]
        );
    }
}
