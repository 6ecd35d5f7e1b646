// Copyright (c) 2025 LLM DevOps
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `GET`/`POST /api/invoke-status/status/:threadId` (§6): the former is a
//! snapshot of the Registry entry; the latter computes a workflow status
//! from a client-supplied step list without consulting any stored run,
//! using the same completion rule the Scheduler applies at drive-time
//! (§4.8.5, shared via [`status_from_step_statuses`]).

use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use workflow_orchestrator_core::error::OrchestratorError;
use workflow_orchestrator_core::state::status_from_step_statuses;
use workflow_orchestrator_core::status::StepStatus;

use crate::error::ApiError;
use crate::state::AppState;

/// `GET /api/invoke-status/status/:threadId`
pub async fn get_status(State(state): State<AppState>, Path(thread_id): Path<String>) -> Result<Json<Value>, ApiError> {
    let entry = state
        .registry
        .get(&thread_id)
        .ok_or_else(|| OrchestratorError::NotFound(format!("thread '{thread_id}'")))?;
    Ok(Json(serde_json::to_value(entry).map_err(|e| OrchestratorError::Other(e.to_string()))?))
}

#[derive(Debug, Deserialize)]
struct StepStatusInput {
    #[allow(dead_code)]
    id: String,
    status: StepStatus,
}

#[derive(Debug, Deserialize)]
struct ComputeStatusBody {
    steps: Vec<StepStatusInput>,
}

/// `POST /api/invoke-status/status/:threadId` -- body `{steps}` (§6).
/// The `threadId` identifies which run the caller means but is not
/// otherwise consulted: this endpoint is a pure function over the
/// supplied step statuses, useful for clients that track step state
/// themselves (e.g. after replaying SSE events) and want the engine's
/// authoritative completion rule applied to it.
pub async fn compute_status(
    State(_state): State<AppState>,
    Path(thread_id): Path<String>,
    Json(body): Json<ComputeStatusBody>,
) -> Result<Json<Value>, ApiError> {
    let status = status_from_step_statuses(body.steps.into_iter().map(|s| s.status));
    Ok(Json(json!({ "threadId": thread_id, "status": status })))
}
