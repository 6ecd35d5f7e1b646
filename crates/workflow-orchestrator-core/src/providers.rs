// Copyright (c) 2025 LLM DevOps
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `AgentClient` trait definitions.
//!
//! This is the out-of-scope collaborator named in §1 of the design: "the
//! LLM client that actually sends prompts and streams tokens". The engine
//! depends only on this trait, never on a concrete model or vendor;
//! `workflow-orchestrator-providers` supplies the implementations.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A handle to a conversation session with an `AgentClient`.
///
/// Opaque to the engine: it is only ever stored and passed back to the
/// same provider on a later call that shares an agent (`sessionRef` in the
/// data model).
pub type SessionRef = String;

/// Agent configuration resolved for a step (project-local agent by short
/// id, project agent by role, or global agent config -- resolution order is
/// the Agent executor's responsibility, not the client's).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AgentConfig {
    pub role: Option<String>,
    pub model: Option<String>,
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub extra: HashMap<String, serde_json::Value>,
}

/// A single request to send to an agent, with optional session resumption.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRequest {
    pub task: String,
    pub project_id: Option<String>,
    pub session_ref: Option<SessionRef>,
    pub project_path: Option<String>,
    pub agent_config: AgentConfig,
}

/// The agent's response: text plus the (possibly new) session handle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentResponse {
    pub response: String,
    pub session_ref: Option<SessionRef>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("HTTP request failed: {0}")]
    HttpError(String),

    #[error("authentication failed: {0}")]
    AuthError(String),

    #[error("rate limit exceeded")]
    RateLimitExceeded,

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("provider error: {0}")]
    ProviderSpecific(String),

    #[error("serialization error: {0}")]
    SerializationError(String),

    #[error("request timed out")]
    Timeout,

    #[error("cancelled")]
    Cancelled,

    #[error("unknown error: {0}")]
    Unknown(String),
}

impl From<serde_json::Error> for ProviderError {
    fn from(err: serde_json::Error) -> Self {
        Self::SerializationError(err.to_string())
    }
}

/// The LLM client interface the engine drives. Implementations live in
/// `workflow-orchestrator-providers`; the engine only ever sees this trait
/// object, per the out-of-scope boundary in §1.
#[async_trait]
pub trait AgentClient: Send + Sync {
    /// Sends a task to the agent and awaits its response. Implementations
    /// MUST observe `cancel` cooperatively and return `ProviderError::Cancelled`
    /// promptly once it fires -- this is how workflow abort reaches a
    /// long-running LLM call.
    async fn send(
        &self,
        request: AgentRequest,
        cancel: tokio_util::sync::CancellationToken,
    ) -> Result<AgentResponse, ProviderError>;

    /// Provider name, for registry lookup and logging.
    fn name(&self) -> &str;

    /// Liveness probe; default impl assumes healthy.
    async fn health_check(&self) -> Result<(), ProviderError> {
        Ok(())
    }
}
