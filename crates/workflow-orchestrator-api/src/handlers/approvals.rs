// Copyright (c) 2025 LLM DevOps
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `POST /api/approvals/:id/decide` and `POST /api/approvals/:id/assign`
//! (§6): the reviewer-facing half of the human-approval protocol. The
//! `Human` executor's polling loop (§4.4) observes the resulting status
//! change through [`ApprovalStore`] directly; these handlers only mutate
//! the store and fan the decision out on the Event Bus.

use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use workflow_orchestrator_core::event::EventEnvelope;

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct DecideBody {
    pub approved: bool,
    #[serde(rename = "decidedBy", default)]
    pub decided_by: Option<String>,
    pub comment: Option<String>,
}

/// `POST /api/approvals/:id/decide`
pub async fn decide(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<DecideBody>,
) -> Result<Json<Value>, ApiError> {
    let decided_by = body.decided_by.unwrap_or_else(|| "anonymous".to_string());
    let approval = state.approvals.decide(&id, body.approved, decided_by, body.comment)?;

    let payload = serde_json::to_value(&approval).unwrap_or_else(|_| json!({}));
    state
        .events
        .publish(&approval.thread_id, EventEnvelope::approval_decided(&approval.thread_id, payload))
        .await;

    Ok(Json(serde_json::to_value(approval).map_err(|e| {
        workflow_orchestrator_core::error::OrchestratorError::Other(e.to_string())
    })?))
}

#[derive(Debug, Deserialize)]
pub struct AssignBody {
    pub assignee: String,
}

/// `POST /api/approvals/:id/assign`
pub async fn assign(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<AssignBody>,
) -> Result<Json<Value>, ApiError> {
    state.approvals.assign(&id, body.assignee)?;
    let approval = state.approvals.get(&id).ok_or_else(|| {
        workflow_orchestrator_core::error::OrchestratorError::NotFound(format!("approval '{id}'"))
    })?;
    Ok(Json(serde_json::to_value(approval).map_err(|e| {
        workflow_orchestrator_core::error::OrchestratorError::Other(e.to_string())
    })?))
}

/// `GET /api/approvals/:id` -- not itself a §6 table row, but needed so a
/// reviewer UI can fetch the context bundle (§4.5) before deciding.
pub async fn get(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<Value>, ApiError> {
    let approval = state.approvals.get(&id).ok_or_else(|| {
        workflow_orchestrator_core::error::OrchestratorError::NotFound(format!("approval '{id}'"))
    })?;
    Ok(Json(serde_json::to_value(approval).map_err(|e| {
        workflow_orchestrator_core::error::OrchestratorError::Other(e.to_string())
    })?))
}

/// `GET /api/approvals?threadId=&status=&assignee=` -- list with filters
/// (§4.5's `list(filters)` operation).
pub async fn list(
    State(state): State<AppState>,
    axum::extract::Query(params): axum::extract::Query<std::collections::HashMap<String, String>>,
) -> Result<Json<Value>, ApiError> {
    use workflow_orchestrator_core::approval::ApprovalFilter;

    let filter = ApprovalFilter {
        thread_id: params.get("threadId").cloned(),
        status: params.get("status").and_then(|s| serde_json::from_value(json!(s)).ok()),
        assignee: params.get("assignee").cloned(),
    };
    let approvals = state.approvals.list(&filter);
    Ok(Json(json!({ "approvals": approvals })))
}
