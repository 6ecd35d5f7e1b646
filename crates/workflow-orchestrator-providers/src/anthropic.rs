// Copyright (c) 2025 LLM DevOps
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Anthropic (Claude) `AgentClient` implementation: the HTTP edge the Agent
//! executor drives through the `AgentClient` trait (`workflow-orchestrator-core`
//! keeps no dependency on this crate).

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use workflow_orchestrator_core::providers::{AgentClient, AgentRequest, AgentResponse, ProviderError};

/// Anthropic API provider.
pub struct AnthropicProvider {
    client: Client,
    api_key: String,
    base_url: String,
    api_version: String,
    default_model: String,
}

#[derive(Debug, Serialize)]
struct MessagesRequest {
    model: String,
    messages: Vec<Message>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    id: String,
    content: Vec<ContentBlock>,
    model: String,
    stop_reason: Option<String>,
    usage: Usage,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    #[allow(dead_code)]
    content_type: String,
    text: String,
}

#[derive(Debug, Deserialize)]
struct Usage {
    input_tokens: u32,
    output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct AnthropicErrorResponse {
    error: AnthropicError,
}

#[derive(Debug, Deserialize)]
struct AnthropicError {
    #[serde(rename = "type")]
    error_type: String,
    message: String,
}

impl AnthropicProvider {
    fn convert_reqwest_error(err: reqwest::Error) -> ProviderError {
        if err.is_timeout() {
            ProviderError::Timeout
        } else if let Some(status) = err.status() {
            if status == 401 || status == 403 {
                ProviderError::AuthError(err.to_string())
            } else if status == 429 {
                ProviderError::RateLimitExceeded
            } else {
                ProviderError::HttpError(err.to_string())
            }
        } else {
            ProviderError::HttpError(err.to_string())
        }
    }

    pub fn new(api_key: String) -> Self {
        Self::with_base_url(
            api_key,
            "https://api.anthropic.com/v1".to_string(),
            "2023-06-01".to_string(),
        )
    }

    pub fn with_base_url(api_key: String, base_url: String, api_version: String) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .expect("failed to build anthropic http client");

        Self {
            client,
            api_key,
            base_url,
            api_version,
            default_model: "claude-3-5-sonnet-20241022".to_string(),
        }
    }

    pub fn from_env() -> Result<Self, ProviderError> {
        let api_key = std::env::var("ANTHROPIC_API_KEY").map_err(|_| {
            ProviderError::InvalidRequest("ANTHROPIC_API_KEY environment variable not set".to_string())
        })?;
        Ok(Self::new(api_key))
    }

    fn to_messages_request(&self, request: &AgentRequest) -> MessagesRequest {
        MessagesRequest {
            model: request
                .agent_config
                .model
                .clone()
                .unwrap_or_else(|| self.default_model.clone()),
            messages: vec![Message {
                role: "user".to_string(),
                content: request.task.clone(),
            }],
            max_tokens: 4096,
            system: request.agent_config.system_prompt.clone(),
            temperature: None,
        }
    }

    fn parse_error(&self, status: StatusCode, body: &str) -> ProviderError {
        if let Ok(error_response) = serde_json::from_str::<AnthropicErrorResponse>(body) {
            let error = error_response.error;
            if status == StatusCode::TOO_MANY_REQUESTS || error.error_type == "rate_limit_error" {
                return ProviderError::RateLimitExceeded;
            }
            if status == StatusCode::UNAUTHORIZED
                || status == StatusCode::FORBIDDEN
                || error.error_type == "authentication_error"
                || error.error_type == "permission_error"
            {
                return ProviderError::AuthError(error.message);
            }
            if error.error_type == "invalid_request_error" {
                return ProviderError::InvalidRequest(error.message);
            }
            return ProviderError::ProviderSpecific(format!(
                "[{}] {}: {}",
                status.as_u16(),
                error.error_type,
                error.message
            ));
        }
        ProviderError::HttpError(format!("[{}] {}", status.as_u16(), body))
    }
}

#[async_trait]
impl AgentClient for AnthropicProvider {
    async fn send(
        &self,
        request: AgentRequest,
        cancel: CancellationToken,
    ) -> Result<AgentResponse, ProviderError> {
        let body = self.to_messages_request(&request);

        let send_fut = self
            .client
            .post(format!("{}/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", &self.api_version)
            .header("Content-Type", "application/json")
            .json(&body)
            .send();

        let response = tokio::select! {
            result = send_fut => result.map_err(Self::convert_reqwest_error)?,
            _ = cancel.cancelled() => return Err(ProviderError::Cancelled),
        };

        let status = response.status();
        let text = response
            .text()
            .await
            .unwrap_or_else(|_| "failed to read response body".to_string());

        if !status.is_success() {
            return Err(self.parse_error(status, &text));
        }

        let parsed: MessagesResponse = serde_json::from_str(&text)?;
        let text_out = parsed.content.iter().map(|c| c.text.clone()).collect::<Vec<_>>().join("");

        let mut metadata = std::collections::HashMap::new();
        metadata.insert(
            "usage".to_string(),
            serde_json::json!({
                "input_tokens": parsed.usage.input_tokens,
                "output_tokens": parsed.usage.output_tokens,
            }),
        );
        if let Some(stop_reason) = &parsed.stop_reason {
            metadata.insert("stop_reason".to_string(), serde_json::json!(stop_reason));
        }
        metadata.insert("model".to_string(), serde_json::json!(parsed.model));

        Ok(AgentResponse {
            response: text_out,
            session_ref: Some(parsed.id),
            metadata,
        })
    }

    fn name(&self) -> &str {
        "anthropic"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_creation_defaults_base_url() {
        let provider = AnthropicProvider::new("test-key".to_string());
        assert_eq!(provider.name(), "anthropic");
        assert_eq!(provider.base_url, "https://api.anthropic.com/v1");
    }

    #[test]
    fn to_messages_request_falls_back_to_default_model() {
        let provider = AnthropicProvider::new("test-key".to_string());
        let request = AgentRequest {
            task: "hello".to_string(),
            project_id: None,
            session_ref: None,
            project_path: None,
            agent_config: Default::default(),
        };
        let body = provider.to_messages_request(&request);
        assert_eq!(body.model, provider.default_model);
        assert_eq!(body.messages[0].content, "hello");
    }

    #[test]
    fn parse_rate_limit_error() {
        let provider = AnthropicProvider::new("test-key".to_string());
        let error_json = r#"{"error":{"type":"rate_limit_error","message":"slow down"}}"#;
        let error = provider.parse_error(StatusCode::TOO_MANY_REQUESTS, error_json);
        matches!(error, ProviderError::RateLimitExceeded);
    }

    #[test]
    fn parse_auth_error() {
        let provider = AnthropicProvider::new("test-key".to_string());
        let error_json = r#"{"error":{"type":"authentication_error","message":"bad key"}}"#;
        let error = provider.parse_error(StatusCode::UNAUTHORIZED, error_json);
        match error {
            ProviderError::AuthError(msg) => assert_eq!(msg, "bad key"),
            other => panic!("expected AuthError, got {other:?}"),
        }
    }
}
