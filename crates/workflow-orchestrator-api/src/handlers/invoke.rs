// Copyright (c) 2025 LLM DevOps
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `POST /api/invoke`, `POST /api/invoke/async`, and the abort control that
//! the async flow needs to be usable over HTTP (§4.8.6; not itself a row in
//! §6's table, but the only way a remote caller can flip an async run's
//! cancellation token).

use axum::extract::{Path, State};
use axum::Json;
use serde_json::Value;

use workflow_orchestrator_core::error::OrchestratorError;
use workflow_orchestrator_core::orchestrator::InvokeResponse;
use workflow_orchestrator_core::workflow::InvokeRequest;

use crate::error::ApiError;
use crate::state::AppState;

/// `InvokeRequest.workflow` accepts a single step object, an array of
/// steps, or either of those JSON-encoded as a string (§6). Everything
/// else in the body maps straight onto `InvokeRequest`'s fields.
fn normalize_invoke_body(mut body: Value) -> Result<InvokeRequest, OrchestratorError> {
    let workflow_value = body
        .get("workflow")
        .cloned()
        .ok_or_else(|| OrchestratorError::Validation("missing 'workflow' field".to_string()))?;

    let workflow_value = match workflow_value {
        Value::String(raw) => serde_json::from_str::<Value>(&raw)
            .map_err(|err| OrchestratorError::Validation(format!("'workflow' is not valid JSON: {err}")))?,
        other => other,
    };
    let steps_array = match workflow_value {
        Value::Array(_) => workflow_value,
        Value::Object(_) => Value::Array(vec![workflow_value]),
        _ => {
            return Err(OrchestratorError::Validation(
                "'workflow' must be a step object, an array of steps, or a JSON string of either".to_string(),
            ))
        }
    };

    if let Some(obj) = body.as_object_mut() {
        obj.insert("workflow".to_string(), steps_array);
    }
    serde_json::from_value(body).map_err(|err| OrchestratorError::Validation(format!("invalid invoke request: {err}")))
}

/// `POST /api/invoke`
pub async fn invoke(State(state): State<AppState>, Json(body): Json<Value>) -> Result<Json<InvokeResponse>, ApiError> {
    let request = normalize_invoke_body(body)?;
    let response = state.orchestrator.clone().invoke(request).await?;
    Ok(Json(response))
}

/// `POST /api/invoke/async`
pub async fn invoke_async(State(state): State<AppState>, Json(body): Json<Value>) -> Result<Json<Value>, ApiError> {
    let request = normalize_invoke_body(body)?;
    let thread_id = state.orchestrator.clone().invoke_async(request).await?;
    Ok(Json(serde_json::json!({ "threadId": thread_id, "status": "started" })))
}

/// `POST /api/invoke/:threadId/abort`
pub async fn abort(State(state): State<AppState>, Path(thread_id): Path<String>) -> Result<Json<Value>, ApiError> {
    state.orchestrator.abort(&thread_id).await?;
    Ok(Json(serde_json::json!({ "threadId": thread_id, "status": "aborting" })))
}
