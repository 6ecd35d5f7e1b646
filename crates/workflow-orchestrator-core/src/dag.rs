// Copyright (c) 2025 LLM DevOps
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Workflow Builder (§4.7): compiles a flat `Vec<WorkflowStep>` into a
//! dependency DAG, rejecting cycles and dangling references up front so
//! the Scheduler never has to discover them mid-run.

use std::collections::{HashMap, HashSet};

use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};

use crate::error::{OrchestratorError, Result};
use crate::workflow::{normalize_steps, validate_steps, WorkflowStep};

/// A compiled, cycle-free workflow ready for scheduling.
pub struct WorkflowGraph {
    graph: DiGraph<String, ()>,
    index_of: HashMap<String, NodeIndex>,
    steps: HashMap<String, WorkflowStep>,
    order: Vec<String>,
    depths: HashMap<String, usize>,
}

impl WorkflowGraph {
    /// Normalizes step ids, validates per-step invariants, and builds the
    /// dependency graph. A cyclic `deps` relationship is a validation error,
    /// not a panic -- the caller (the Orchestrator, or `validate` in the CLI)
    /// is expected to surface it to the client.
    pub fn build(steps: Vec<WorkflowStep>) -> Result<Self> {
        let steps = normalize_steps(steps);
        validate_steps(&steps)?;

        let mut graph = DiGraph::new();
        let mut index_of = HashMap::new();
        for step in &steps {
            let idx = graph.add_node(step.id.clone());
            index_of.insert(step.id.clone(), idx);
        }
        for step in &steps {
            let to = index_of[&step.id];
            for dep in &step.deps {
                let from = index_of[dep];
                graph.add_edge(from, to, ());
            }
        }

        let order = toposort(&graph, None).map_err(|cycle| {
            let id = &graph[cycle.node_id()];
            OrchestratorError::Validation(format!("cyclic dependency detected at step '{id}'"))
        })?;
        let order: Vec<String> = order.into_iter().map(|idx| graph[idx].clone()).collect();

        let steps_by_id: HashMap<String, WorkflowStep> =
            steps.into_iter().map(|s| (s.id.clone(), s)).collect();

        // Longest-path depth from any root, computed once in topological
        // order so deterministic ready-queue ordering (§5:
        // `(dependencyDepth, stepId lexicographic)`) is cheap at drive time.
        let mut depths: HashMap<String, usize> = HashMap::new();
        for id in &order {
            let depth = steps_by_id[id]
                .deps
                .iter()
                .map(|d| depths.get(d).copied().unwrap_or(0) + 1)
                .max()
                .unwrap_or(0);
            depths.insert(id.clone(), depth);
        }

        Ok(Self {
            graph,
            index_of,
            steps: steps_by_id,
            order,
            depths,
        })
    }

    /// Longest-path depth from a root step, used as the primary key of the
    /// deterministic ready-queue ordering (§5).
    pub fn depth(&self, id: &str) -> usize {
        self.depths.get(id).copied().unwrap_or(0)
    }

    pub fn step(&self, id: &str) -> Option<&WorkflowStep> {
        self.steps.get(id)
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// A valid topological order. The Scheduler uses it as a scan order when
    /// picking the next ready frontier, not as the execution order itself --
    /// independent branches still run concurrently.
    pub fn topological_order(&self) -> &[String] {
        &self.order
    }

    pub fn direct_dependents(&self, id: &str) -> Vec<&str> {
        let Some(&idx) = self.index_of.get(id) else {
            return Vec::new();
        };
        self.graph
            .neighbors_directed(idx, petgraph::Direction::Outgoing)
            .map(|n| self.graph[n].as_str())
            .collect()
    }

    /// Steps whose every dependency is already accounted for (completed or
    /// skipped) and that have not themselves been accounted for yet.
    pub fn ready_steps(
        &self,
        completed: &HashSet<String>,
        skipped: &HashSet<String>,
    ) -> Vec<&WorkflowStep> {
        self.order
            .iter()
            .filter(|id| !completed.contains(*id) && !skipped.contains(*id))
            .map(|id| &self.steps[id])
            .filter(|step| {
                step.deps
                    .iter()
                    .all(|d| completed.contains(d) || skipped.contains(d))
            })
            .collect()
    }

    pub fn all_step_ids(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(|s| s.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::{StepConfig, StepKind};

    fn step(id: &str, deps: &[&str]) -> WorkflowStep {
        WorkflowStep {
            id: id.to_string(),
            kind: StepKind::Agent,
            task: "do work".to_string(),
            deps: deps.iter().map(|s| s.to_string()).collect(),
            role: Some("dev".to_string()),
            agent_ref: None,
            session_ref: None,
            config: StepConfig::default(),
            retry: None,
        }
    }

    #[test]
    fn builds_linear_chain() {
        let graph = WorkflowGraph::build(vec![step("a", &[]), step("b", &["a"])]).unwrap();
        assert_eq!(graph.topological_order(), &["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn rejects_cycles() {
        let mut a = step("a", &["b"]);
        let b = step("b", &["a"]);
        a.deps = vec!["b".to_string()];
        let result = WorkflowGraph::build(vec![a, b]);
        assert!(result.is_err());
    }

    #[test]
    fn ready_steps_respects_dependencies() {
        let graph = WorkflowGraph::build(vec![step("a", &[]), step("b", &["a"])]).unwrap();
        let completed = HashSet::new();
        let skipped = HashSet::new();
        let ready: Vec<&str> = graph
            .ready_steps(&completed, &skipped)
            .into_iter()
            .map(|s| s.id.as_str())
            .collect();
        assert_eq!(ready, vec!["a"]);
    }

    #[test]
    fn ready_steps_unblocks_after_completion() {
        let graph = WorkflowGraph::build(vec![step("a", &[]), step("b", &["a"])]).unwrap();
        let mut completed = HashSet::new();
        completed.insert("a".to_string());
        let skipped = HashSet::new();
        let ready: Vec<&str> = graph
            .ready_steps(&completed, &skipped)
            .into_iter()
            .map(|s| s.id.as_str())
            .collect();
        assert_eq!(ready, vec!["b"]);
    }

    #[test]
    fn independent_branches_are_both_ready() {
        let graph = WorkflowGraph::build(vec![step("a", &[]), step("b", &[])]).unwrap();
        let completed = HashSet::new();
        let skipped = HashSet::new();
        let ready: Vec<&str> = graph
            .ready_steps(&completed, &skipped)
            .into_iter()
            .map(|s| s.id.as_str())
            .collect();
        assert_eq!(ready.len(), 2);
    }
}
