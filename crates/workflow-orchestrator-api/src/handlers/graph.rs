// Copyright (c) 2025 LLM DevOps
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `GET /api/workflow-graph/:threadId?consolidateLoops=<bool>` (§6): the
//! visualization contract. Rebuilds the compiled graph from the
//! checkpointed step list (the Orchestrator only keeps a live
//! `WorkflowGraph` for in-flight runs) and renders it with the current
//! snapshot via [`graph::generate`], which is required to be deterministic
//! (§8) given the same steps/results/session refs.

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use workflow_orchestrator_core::dag::WorkflowGraph;
use workflow_orchestrator_core::error::OrchestratorError;
use workflow_orchestrator_core::graph;

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize, Default)]
pub struct GraphQuery {
    #[serde(default, rename = "consolidateLoops")]
    consolidate_loops: bool,
}

/// `GET /api/workflow-graph/:threadId`
pub async fn get_graph(
    State(state): State<AppState>,
    Path(thread_id): Path<String>,
    Query(query): Query<GraphQuery>,
) -> Result<Json<Value>, ApiError> {
    let workflow_state = state
        .orchestrator
        .checkpointer()
        .load(&thread_id)
        .await?
        .ok_or_else(|| OrchestratorError::NotFound(format!("thread '{thread_id}'")))?;

    let compiled = WorkflowGraph::build(workflow_state.steps.clone())?;
    let view = graph::generate(&compiled, &workflow_state, query.consolidate_loops);

    Ok(Json(json!({
        "threadId": thread_id,
        "graph": view,
        "metadata": {
            "consolidated": query.consolidate_loops,
            "stepCount": workflow_state.steps.len(),
        }
    })))
}
