// Copyright (c) 2025 LLM DevOps
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `MockAgentClient`: the `AgentClient` substituted cluster-wide when
//! `USE_MOCK_AI` is set (§6), so `agent` steps get the same deterministic
//! pattern-matched text the `mock` step kind's executor produces without
//! ever dialing out to a real provider.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use workflow_orchestrator_core::executor::mock_response_for;
use workflow_orchestrator_core::providers::{AgentClient, AgentRequest, AgentResponse, ProviderError};

#[derive(Debug, Clone, Default)]
pub struct MockAgentClient {
    /// Optional artificial per-call delay, used by tests that exercise
    /// abort-mid-flight (§8 scenario 4).
    pub delay: Option<std::time::Duration>,
}

impl MockAgentClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(delay: std::time::Duration) -> Self {
        Self { delay: Some(delay) }
    }
}

#[async_trait]
impl AgentClient for MockAgentClient {
    async fn send(
        &self,
        request: AgentRequest,
        cancel: CancellationToken,
    ) -> Result<AgentResponse, ProviderError> {
        if let Some(delay) = self.delay {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel.cancelled() => return Err(ProviderError::Cancelled),
            }
        }
        if cancel.is_cancelled() {
            return Err(ProviderError::Cancelled);
        }
        Ok(AgentResponse {
            response: mock_response_for(&request.task),
            session_ref: request.session_ref.or_else(|| Some(uuid::Uuid::new_v4().to_string())),
            metadata: Default::default(),
        })
    }

    fn name(&self) -> &str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn returns_pattern_matched_response() {
        let client = MockAgentClient::new();
        let request = AgentRequest {
            task: "design the architecture".to_string(),
            project_id: None,
            session_ref: None,
            project_path: None,
            agent_config: Default::default(),
        };
        let response = client.send(request, CancellationToken::new()).await.unwrap();
        assert!(response.response.to_lowercase().contains("architecture"));
    }

    #[tokio::test]
    async fn cancellation_short_circuits_before_delay_elapses() {
        let client = MockAgentClient::with_delay(std::time::Duration::from_secs(30));
        let cancel = CancellationToken::new();
        cancel.cancel();
        let request = AgentRequest {
            task: "anything".to_string(),
            project_id: None,
            session_ref: None,
            project_path: None,
            agent_config: Default::default(),
        };
        let result = client.send(request, cancel).await;
        assert!(matches!(result, Err(ProviderError::Cancelled)));
    }
}
