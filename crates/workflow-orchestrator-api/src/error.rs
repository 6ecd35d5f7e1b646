// Copyright (c) 2025 LLM DevOps
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Maps the engine's error taxonomy (§7) onto HTTP status codes.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use workflow_orchestrator_core::error::OrchestratorError;

pub struct ApiError(OrchestratorError);

impl From<OrchestratorError> for ApiError {
    fn from(err: OrchestratorError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = match &self.0 {
            OrchestratorError::Validation(_) => (StatusCode::BAD_REQUEST, "validation_error"),
            OrchestratorError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            OrchestratorError::Configuration(_) => (StatusCode::NOT_FOUND, "configuration_error"),
            OrchestratorError::InvalidTransition(_) => (StatusCode::BAD_REQUEST, "invalid_transition"),
            OrchestratorError::Executor { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "executor_error"),
            OrchestratorError::Abort(_) => (StatusCode::BAD_REQUEST, "aborted"),
            OrchestratorError::Timeout { .. } => (StatusCode::GATEWAY_TIMEOUT, "timeout"),
            OrchestratorError::Infrastructure(_) => (StatusCode::SERVICE_UNAVAILABLE, "infrastructure_error"),
            OrchestratorError::StepNotFound(_) => (StatusCode::NOT_FOUND, "step_not_found"),
            OrchestratorError::Other(_) => (StatusCode::INTERNAL_SERVER_ERROR, "error"),
        };

        let body = Json(json!({
            "error": {
                "code": code,
                "message": self.0.to_string(),
            }
        }));

        (status, body).into_response()
    }
}
