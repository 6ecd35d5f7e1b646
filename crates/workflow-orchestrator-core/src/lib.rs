// Copyright (c) 2025 LLM DevOps
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Workflow orchestration engine: DAG construction, dependency-ordered
//! scheduling, template-variable resolution, conditional branching, status
//! evaluation, checkpoint-based resume, abort propagation, progress
//! fan-out, and the human-approval sub-protocol.
//!
//! This crate depends on no concrete LLM vendor: it drives the
//! [`providers::AgentClient`] trait, implemented out-of-tree by
//! `workflow-orchestrator-providers`. Durable checkpoint storage is
//! likewise out-of-tree, behind the `state-persistence` feature
//! (`workflow-orchestrator-state`); the in-process default lives in
//! [`checkpoint::InMemoryCheckpointer`].

pub mod approval;
pub mod checkpoint;
pub mod condition;
pub mod context;
pub mod dag;
pub mod error;
pub mod event;
pub mod executor;
pub mod graph;
pub mod jsexpr;
pub mod orchestrator;
pub mod providers;
pub mod registry;
pub mod retry;
pub mod state;
pub mod status;
pub mod template;
pub mod workflow;

pub use dag::WorkflowGraph;
pub use error::{OrchestratorError, Result};
pub use orchestrator::{InvokeResponse, Orchestrator};
pub use state::{StepResult, WorkflowState, WorkflowStatus};
pub use workflow::{InvokeRequest, StepKind, WorkflowStep};

/// Library version, exposed for the `/api` health endpoint and the CLI's
/// `--version` output.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Process-wide configuration read from environment variables (§6).
/// Constructed once at process start by the CLI/API binary and handed
/// down to whichever provider/transport implementations need it --
/// the engine itself never reads the environment directly.
#[derive(Debug, Clone, Default)]
pub struct OrchestratorConfig {
    /// `USE_MOCK_AI`: forces the Mock executor cluster-wide, substituting
    /// `MockAgentClient` for `agent` steps as well as `mock` ones.
    pub use_mock_ai: bool,
    /// `CLAUDE_STUDIO_API`: base URL for the Anthropic-compatible client.
    pub claude_studio_api: Option<String>,
    /// `REDIS_URL`: cross-process event transport, enabling
    /// [`event::redis_bus`] behind the `redis-transport` feature.
    pub redis_url: Option<String>,
}

impl OrchestratorConfig {
    /// Reads the three documented environment variables (§6). Missing
    /// variables default to disabled/local behavior, never an error --
    /// the engine must run standalone with no external services configured.
    pub fn from_env() -> Self {
        Self {
            use_mock_ai: std::env::var("USE_MOCK_AI")
                .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
                .unwrap_or(false),
            claude_studio_api: std::env::var("CLAUDE_STUDIO_API").ok(),
            redis_url: std::env::var("REDIS_URL").ok(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults_to_mock_disabled() {
        let cfg = OrchestratorConfig::default();
        assert!(!cfg.use_mock_ai);
        assert!(cfg.redis_url.is_none());
    }
}
