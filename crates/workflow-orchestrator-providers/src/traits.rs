// Copyright (c) 2025 LLM DevOps
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Re-exports of the `AgentClient` interface core depends on. The trait
//! lives in `workflow-orchestrator-core` (the engine must compile without
//! any concrete provider, per the out-of-scope boundary in the design);
//! this crate only supplies implementations.

pub use workflow_orchestrator_core::providers::{
    AgentClient, AgentConfig, AgentRequest, AgentResponse, ProviderError, SessionRef,
};
