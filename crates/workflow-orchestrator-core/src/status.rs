// Copyright (c) 2025 LLM DevOps
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Status Operator: classifies an LLM output as `success` / `blocked` /
//! `failed` given the executing role and task (§4.3).

use crate::providers::{AgentClient, AgentConfig, AgentRequest};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

/// Fixed system prompt for the classifier call. The operator MUST return
/// exactly one of the three status words, case-insensitive.
pub const STATUS_OPERATOR_SYSTEM_PROMPT: &str = "\
You are a workflow status classifier. You will be shown the role and task \
of an agent step and the text that agent produced. Respond with exactly \
one word: success, blocked, or failed. success means the task was \
completed as requested. blocked means the agent could not proceed without \
more information or a decision from a human. failed means the agent \
encountered an error or could not complete the task. Respond with nothing \
else.";

/// Terminal status an executed step can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Success,
    Blocked,
    Failed,
    NotExecuted,
    Skipped,
    Aborted,
}

/// Context passed to the classifier: the executing role/task, not the
/// output (that is the first argument to `classify`).
#[derive(Debug, Clone, Default)]
pub struct StatusContext {
    pub role: Option<String>,
    pub task: Option<String>,
    pub role_system_prompt: Option<String>,
}

/// Outcome of a classification.
#[derive(Debug, Clone)]
pub struct StatusOutcome {
    pub status: StepStatus,
    pub reason: Option<String>,
}

/// Classifies an agent's output. Empty output short-circuits to `failed`
/// without invoking the model (§4.3); any model response other than the
/// three status words is coerced to `failed` with a fixed reason. The
/// engine never retries a malformed classifier response.
pub async fn classify(
    agent_output: &str,
    ctx: StatusContext,
    client: &dyn AgentClient,
) -> StatusOutcome {
    if agent_output.trim().is_empty() {
        return StatusOutcome {
            status: StepStatus::Failed,
            reason: Some("empty agent output".to_string()),
        };
    }

    let mut prompt = STATUS_OPERATOR_SYSTEM_PROMPT.to_string();
    if let Some(role) = &ctx.role {
        prompt.push_str(&format!("\n\nRole: {role}"));
    }
    if let Some(task) = &ctx.task {
        prompt.push_str(&format!("\n\nTask: {task}"));
    }
    if let Some(role_prompt) = &ctx.role_system_prompt {
        prompt.push_str(&format!("\n\nRole system prompt: {role_prompt}"));
    }

    let request = AgentRequest {
        task: format!("Agent output to classify:\n\n{agent_output}"),
        project_id: None,
        session_ref: None,
        project_path: None,
        agent_config: AgentConfig {
            role: Some("status-operator".to_string()),
            system_prompt: Some(prompt),
            ..Default::default()
        },
    };

    match client.send(request, CancellationToken::new()).await {
        Ok(response) => parse_status_word(&response.response),
        Err(err) => StatusOutcome {
            status: StepStatus::Failed,
            reason: Some(format!("status operator call failed: {err}")),
        },
    }
}

fn parse_status_word(text: &str) -> StatusOutcome {
    match text.trim().to_ascii_lowercase().as_str() {
        "success" => StatusOutcome {
            status: StepStatus::Success,
            reason: None,
        },
        "blocked" => StatusOutcome {
            status: StepStatus::Blocked,
            reason: None,
        },
        "failed" => StatusOutcome {
            status: StepStatus::Failed,
            reason: None,
        },
        _ => StatusOutcome {
            status: StepStatus::Failed,
            reason: Some("invalid operator response".to_string()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{AgentResponse, ProviderError};
    use async_trait::async_trait;

    struct StubClient(&'static str);

    #[async_trait]
    impl AgentClient for StubClient {
        async fn send(
            &self,
            _request: AgentRequest,
            _cancel: CancellationToken,
        ) -> Result<AgentResponse, ProviderError> {
            Ok(AgentResponse {
                response: self.0.to_string(),
                session_ref: None,
                metadata: Default::default(),
            })
        }

        fn name(&self) -> &str {
            "stub"
        }
    }

    #[tokio::test]
    async fn empty_output_fails_without_calling_model() {
        struct PanicsIfCalled;
        #[async_trait]
        impl AgentClient for PanicsIfCalled {
            async fn send(
                &self,
                _r: AgentRequest,
                _c: CancellationToken,
            ) -> Result<AgentResponse, ProviderError> {
                panic!("classifier must not call the model on empty output")
            }
            fn name(&self) -> &str {
                "panic"
            }
        }

        let outcome = classify("", StatusContext::default(), &PanicsIfCalled).await;
        assert_eq!(outcome.status, StepStatus::Failed);
    }

    #[tokio::test]
    async fn recognizes_status_words_case_insensitively() {
        let outcome = classify("hi", StatusContext::default(), &StubClient("SUCCESS")).await;
        assert_eq!(outcome.status, StepStatus::Success);

        let outcome = classify("hi", StatusContext::default(), &StubClient("Blocked")).await;
        assert_eq!(outcome.status, StepStatus::Blocked);
    }

    #[tokio::test]
    async fn malformed_response_coerces_to_failed() {
        let outcome = classify("hi", StatusContext::default(), &StubClient("maybe?")).await;
        assert_eq!(outcome.status, StepStatus::Failed);
        assert_eq!(outcome.reason.as_deref(), Some("invalid operator response"));
    }
}
