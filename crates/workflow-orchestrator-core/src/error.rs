// Copyright (c) 2025 LLM DevOps
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error taxonomy for the orchestration engine (§7 of the design).
//!
//! Executors never let these cross the Scheduler boundary as a thrown error;
//! they are recorded into a `StepResult` instead. Only workflow-level
//! failures (validation, cycle detection, infrastructure outage) surface
//! this type directly to callers.

use std::time::Duration;

pub type Result<T> = std::result::Result<T, OrchestratorError>;

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    /// Bad request shape, missing required fields, cyclic dependencies.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Unknown threadId, role, or approval id.
    #[error("not found: {0}")]
    NotFound(String),

    /// No agent binding exists for a role.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// An approval or workflow transition that does not respect the state
    /// machine (resolving a non-pending approval, aborting an unknown thread).
    #[error("invalid transition: {0}")]
    InvalidTransition(String),

    /// A step executor failed; carries the step id for diagnostics.
    #[error("step '{step_id}' failed: {message}")]
    Executor { step_id: String, message: String },

    /// The workflow or a step was cancelled via its cancellation token.
    #[error("aborted: {0}")]
    Abort(String),

    /// A step or the classifier exceeded its deadline.
    #[error("timed out after {duration:?}")]
    Timeout { duration: Duration },

    /// The checkpoint store or event bus is unavailable.
    #[error("infrastructure error: {0}")]
    Infrastructure(String),

    /// A step referenced by id could not be found in the compiled workflow.
    #[error("step not found: {0}")]
    StepNotFound(String),

    /// Catch-all for errors that do not merit their own variant.
    #[error("{0}")]
    Other(String),
}

impl OrchestratorError {
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// Per the Builder's retry policy (§4.7): errors whose message contains
    /// one of these substrings are never retried.
    pub fn is_retryable(&self) -> bool {
        const NON_RETRYABLE: &[&str] = &[
            "validation failed",
            "invalid configuration",
            "unauthorized",
            "forbidden",
        ];
        let text = self.to_string();
        !NON_RETRYABLE.iter().any(|needle| text.contains(needle))
    }
}

impl From<serde_json::Error> for OrchestratorError {
    fn from(err: serde_json::Error) -> Self {
        Self::Other(format!("serialization error: {err}"))
    }
}

impl From<serde_yaml::Error> for OrchestratorError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Validation(format!("yaml parse error: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_errors_are_not_retryable() {
        let err = OrchestratorError::Executor {
            step_id: "s1".into(),
            message: "validation failed: bad task".into(),
        };
        assert!(!err.is_retryable());
    }

    #[test]
    fn generic_errors_are_retryable() {
        let err = OrchestratorError::Executor {
            step_id: "s1".into(),
            message: "connection reset".into(),
        };
        assert!(err.is_retryable());
    }
}
