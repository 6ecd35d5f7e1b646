// Copyright (c) 2025 LLM DevOps
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `AgentClient` implementations for the workflow orchestrator.

pub mod anthropic;
pub mod mock;
pub mod openai;
pub mod traits;

pub use anthropic::AnthropicProvider;
pub use mock::MockAgentClient;
pub use openai::OpenAIProvider;
pub use traits::{AgentClient, AgentConfig, AgentRequest, AgentResponse, ProviderError, SessionRef};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
