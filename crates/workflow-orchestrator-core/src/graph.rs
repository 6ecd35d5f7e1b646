// Copyright (c) 2025 LLM DevOps
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Graph JSON visualization contract (§6): a pure, deterministic view over
//! a compiled [`WorkflowGraph`] and its current [`WorkflowState`], served by
//! `GET /api/workflow-graph/:threadId` and pushed via `graph_update` events.
//! `generate` is required to be deterministic (§8): identical steps,
//! results, and session refs must produce identical node/edge ids on every
//! call, so node/edge ids are derived from step ids alone, never from
//! iteration order over a `HashMap`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::dag::WorkflowGraph;
use crate::state::WorkflowState;
use crate::status::StepStatus;
use crate::workflow::StepKind;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Step,
    Operator,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeData {
    pub agent_id: Option<String>,
    pub role: Option<String>,
    pub task: String,
    pub status: String,
    pub start_time: Option<chrono::DateTime<chrono::Utc>>,
    pub end_time: Option<chrono::DateTime<chrono::Utc>>,
    pub output: Option<String>,
    pub error: Option<String>,
    pub session_id: Option<String>,
    pub iteration_count: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: NodeKind,
    pub data: NodeData,
    pub position: Position,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    Dependency,
    Conditional,
    Loop,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EdgeData {
    pub label: Option<String>,
    pub condition: Option<String>,
    pub iterations: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphEdge {
    pub id: String,
    pub source: String,
    pub target: String,
    #[serde(rename = "type")]
    pub edge_type: EdgeKind,
    pub animated: bool,
    pub data: EdgeData,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopSummary {
    pub step_id: String,
    pub iterations: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionMeta {
    pub path: Vec<String>,
    pub loops: Vec<LoopSummary>,
    pub current_node: Option<String>,
    pub resume_points: Vec<String>,
    pub start_time: chrono::DateTime<chrono::Utc>,
    pub end_time: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowGraphView {
    pub thread_id: String,
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
    pub execution: ExecutionMeta,
}

fn edge_id(source: &str, target: &str) -> String {
    format!("{source}->{target}")
}

fn status_label(status: Option<StepStatus>) -> String {
    match status {
        None => "pending".to_string(),
        Some(s) => format!("{s:?}").to_lowercase(),
    }
}

/// Maps a step's role onto one of the three consolidated buckets (§6): any
/// role containing "review" consolidates under Reviewer, "deploy"/"ops"/
/// "operator" under Operator, everything else (including no role at all)
/// under Developer. This keeps the consolidated graph at exactly three
/// logical nodes regardless of how many distinct roles a workflow declares.
fn consolidated_bucket(role: Option<&str>) -> &'static str {
    let lower = role.unwrap_or("").to_lowercase();
    if lower.contains("review") {
        "Reviewer"
    } else if lower.contains("deploy") || lower.contains("ops") || lower.contains("operator") {
        "Operator"
    } else {
        "Developer"
    }
}

/// Builds the full (non-consolidated) node/edge set: one node per step, one
/// `dependency` edge per `deps` entry, one `conditional` edge per branch
/// target, and one `loop` edge, self-looping, for `loop` steps.
fn build_full(graph: &WorkflowGraph, state: &WorkflowState) -> (Vec<GraphNode>, Vec<GraphEdge>) {
    let mut nodes = Vec::new();
    let mut edges = Vec::new();

    // Group steps by depth so siblings are laid out on the same column,
    // lexicographically ordered within it -- matches the scheduler's own
    // deterministic ready-queue ordering (§5) so the visual order tracks
    // execution order.
    let mut by_depth: BTreeMap<usize, Vec<&str>> = BTreeMap::new();
    for id in graph.all_step_ids() {
        by_depth.entry(graph.depth(id)).or_default().push(id);
    }
    for ids in by_depth.values_mut() {
        ids.sort();
    }

    for (depth, ids) in &by_depth {
        for (row, id) in ids.iter().enumerate() {
            let Some(step) = graph.step(id) else { continue };
            let result = state.step_results.get(*id);
            let data = NodeData {
                agent_id: step.agent_ref.clone(),
                role: step.role.clone(),
                task: step.task.clone(),
                status: status_label(result.map(|r| r.status)),
                start_time: None,
                end_time: None,
                output: result.map(|r| r.response.clone()),
                error: result
                    .filter(|r| r.status == StepStatus::Failed)
                    .map(|r| r.response.clone()),
                session_id: state.session_refs.get(*id).cloned(),
                iteration_count: step
                    .config
                    .loop_config
                    .as_ref()
                    .map(|cfg| cfg.max_iterations.unwrap_or(cfg.items.len()).min(cfg.items.len())),
            };
            nodes.push(GraphNode {
                id: id.to_string(),
                node_type: NodeKind::Step,
                data,
                position: Position {
                    x: *depth as f64 * 220.0,
                    y: row as f64 * 140.0,
                },
            });

            for dep in &step.deps {
                edges.push(GraphEdge {
                    id: edge_id(dep, id),
                    source: dep.clone(),
                    target: id.to_string(),
                    edge_type: EdgeKind::Dependency,
                    animated: result.map(|r| r.status == StepStatus::Success).unwrap_or(false),
                    data: EdgeData::default(),
                });
            }

            if step.kind == StepKind::Conditional {
                if let Some(target) = step.config.true_branch.as_deref().filter(|t| *t != "end") {
                    edges.push(GraphEdge {
                        id: edge_id(id, target),
                        source: id.to_string(),
                        target: target.to_string(),
                        edge_type: EdgeKind::Conditional,
                        animated: false,
                        data: EdgeData {
                            label: Some("true".to_string()),
                            condition: step.config.condition.as_ref().and_then(|c| c.as_legacy_expr().map(str::to_string)),
                            iterations: None,
                        },
                    });
                }
                if let Some(target) = step.config.false_branch.as_deref().filter(|t| *t != "end") {
                    edges.push(GraphEdge {
                        id: edge_id(id, target),
                        source: id.to_string(),
                        target: target.to_string(),
                        edge_type: EdgeKind::Conditional,
                        animated: false,
                        data: EdgeData {
                            label: Some("false".to_string()),
                            condition: step.config.condition.as_ref().and_then(|c| c.as_legacy_expr().map(str::to_string)),
                            iterations: None,
                        },
                    });
                }
            }

            if step.kind == StepKind::Loop {
                if let Some(cfg) = step.config.loop_config.as_ref() {
                    let iterations = cfg.max_iterations.unwrap_or(cfg.items.len()).min(cfg.items.len());
                    edges.push(GraphEdge {
                        id: edge_id(id, id),
                        source: id.to_string(),
                        target: id.to_string(),
                        edge_type: EdgeKind::Loop,
                        animated: result.is_none(),
                        data: EdgeData {
                            label: None,
                            condition: None,
                            iterations: Some(iterations),
                        },
                    });
                }
            }
        }
    }

    (nodes, edges)
}

/// Collapses the full node set into at most three operator nodes (Developer
/// / Reviewer / Operator), aggregating iteration counts and re-pointing
/// dependency edges onto the buckets their endpoints fell into (self-edges
/// from a bucket collapsing onto itself are dropped, per the "at most
/// three logical nodes" contract in §6).
fn consolidate(nodes: Vec<GraphNode>, edges: Vec<GraphEdge>) -> (Vec<GraphNode>, Vec<GraphEdge>) {
    let mut bucket_of: BTreeMap<String, &'static str> = BTreeMap::new();
    let mut buckets: BTreeMap<&'static str, (usize, Option<chrono::DateTime<chrono::Utc>>)> = BTreeMap::new();

    for node in &nodes {
        let bucket = consolidated_bucket(node.data.role.as_deref());
        bucket_of.insert(node.id.clone(), bucket);
        let entry = buckets.entry(bucket).or_insert((0, None));
        entry.0 += 1;
    }

    let order = ["Developer", "Reviewer", "Operator"];
    let consolidated_nodes: Vec<GraphNode> = order
        .iter()
        .enumerate()
        .filter_map(|(i, name)| {
            buckets.get(name).map(|(count, _)| GraphNode {
                id: name.to_string(),
                node_type: NodeKind::Operator,
                data: NodeData {
                    agent_id: None,
                    role: Some(name.to_string()),
                    task: format!("{name} (consolidated)"),
                    status: "running".to_string(),
                    start_time: None,
                    end_time: None,
                    output: None,
                    error: None,
                    session_id: None,
                    iteration_count: Some(*count),
                },
                position: Position { x: i as f64 * 260.0, y: 0.0 },
            })
        })
        .collect();

    let mut seen_edges = std::collections::HashSet::new();
    let consolidated_edges: Vec<GraphEdge> = edges
        .into_iter()
        .filter_map(|edge| {
            let source = *bucket_of.get(&edge.source)?;
            let target = *bucket_of.get(&edge.target)?;
            if source == target {
                return None;
            }
            let id = edge_id(source, target);
            if !seen_edges.insert(id.clone()) {
                return None;
            }
            Some(GraphEdge {
                id,
                source: source.to_string(),
                target: target.to_string(),
                edge_type: EdgeKind::Dependency,
                animated: false,
                data: EdgeData::default(),
            })
        })
        .collect();

    (consolidated_nodes, consolidated_edges)
}

/// Builds the full visualization payload for `thread_id`. `consolidate_loops`
/// selects the reduced three-node view (§6's "Consolidated mode").
pub fn generate(graph: &WorkflowGraph, state: &WorkflowState, consolidate_loops: bool) -> WorkflowGraphView {
    let (nodes, edges) = build_full(graph, state);

    let path: Vec<String> = graph
        .all_step_ids()
        .filter(|id| state.step_results.contains_key(*id))
        .map(|id| id.to_string())
        .collect();

    let loops: Vec<LoopSummary> = graph
        .all_step_ids()
        .filter_map(|id| graph.step(id))
        .filter(|s| s.kind == StepKind::Loop)
        .filter_map(|s| {
            s.config.loop_config.as_ref().map(|cfg| LoopSummary {
                step_id: s.id.clone(),
                iterations: cfg.max_iterations.unwrap_or(cfg.items.len()).min(cfg.items.len()),
            })
        })
        .collect();

    let resume_points: Vec<String> = graph
        .all_step_ids()
        .filter(|id| {
            state
                .step_results
                .get(*id)
                .map(|r| r.status == StepStatus::Aborted || r.status == StepStatus::NotExecuted)
                .unwrap_or(false)
        })
        .map(|id| id.to_string())
        .collect();

    let current_node = graph
        .all_step_ids()
        .find(|id| !state.step_results.contains_key(*id))
        .map(|id| id.to_string());

    let (nodes, edges) = if consolidate_loops {
        consolidate(nodes, edges)
    } else {
        (nodes, edges)
    };

    WorkflowGraphView {
        thread_id: state.thread_id.clone(),
        nodes,
        edges,
        execution: ExecutionMeta {
            path,
            loops,
            current_node,
            resume_points,
            start_time: chrono::Utc::now(),
            end_time: if state.status == crate::state::WorkflowStatus::Running {
                None
            } else {
                Some(chrono::Utc::now())
            },
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::WorkflowState;
    use crate::workflow::{StepConfig, StepKind, WorkflowStep};

    fn step(id: &str, deps: &[&str], role: &str) -> WorkflowStep {
        WorkflowStep {
            id: id.to_string(),
            kind: StepKind::Agent,
            task: "do work".to_string(),
            deps: deps.iter().map(|s| s.to_string()).collect(),
            role: Some(role.to_string()),
            agent_ref: None,
            session_ref: None,
            config: StepConfig::default(),
            retry: None,
        }
    }

    #[test]
    fn generate_is_deterministic() {
        let steps = vec![step("a", &[], "dev"), step("b", &["a"], "reviewer")];
        let graph = WorkflowGraph::build(steps.clone()).unwrap();
        let state = WorkflowState::new("t1", steps);

        let first = generate(&graph, &state, false);
        let second = generate(&graph, &state, false);
        let first_ids: Vec<&str> = first.nodes.iter().map(|n| n.id.as_str()).collect();
        let second_ids: Vec<&str> = second.nodes.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(first_ids, second_ids);

        let first_edges: Vec<&str> = first.edges.iter().map(|e| e.id.as_str()).collect();
        let second_edges: Vec<&str> = second.edges.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(first_edges, second_edges);
    }

    #[test]
    fn consolidated_mode_has_at_most_three_nodes() {
        let steps = vec![
            step("a", &[], "developer"),
            step("b", &["a"], "reviewer"),
            step("c", &["b"], "developer"),
            step("d", &["c"], "deploy-ops"),
        ];
        let graph = WorkflowGraph::build(steps.clone()).unwrap();
        let state = WorkflowState::new("t1", steps);
        let view = generate(&graph, &state, true);
        assert!(view.nodes.len() <= 3);
        let developer = view.nodes.iter().find(|n| n.id == "Developer").unwrap();
        assert_eq!(developer.data.iteration_count, Some(2));
    }

    #[test]
    fn full_mode_emits_one_node_per_step() {
        let steps = vec![step("a", &[], "dev"), step("b", &["a"], "dev")];
        let graph = WorkflowGraph::build(steps.clone()).unwrap();
        let state = WorkflowState::new("t1", steps);
        let view = generate(&graph, &state, false);
        assert_eq!(view.nodes.len(), 2);
        assert_eq!(view.edges.len(), 1);
    }
}
