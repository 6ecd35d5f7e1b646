// Copyright (c) 2025 LLM DevOps
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Step Executors (§4.4): one `StepExecutor` per `StepKind`, registered in
//! an `ExecutorRegistry` that dispatches first-match-wins, mirroring the
//! teacher's provider registry pattern. Conditional routing is not a
//! registered executor -- it is handled by the Scheduler directly.

use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::approval::{Approval, ApprovalContextBuilder, ApprovalStore};
use crate::context::ExecutionContext;
use crate::error::OrchestratorError;
use crate::event::{EventBus, EventEnvelope};
use crate::jsexpr;
use crate::providers::{AgentClient, AgentConfig, AgentRequest};
use crate::retry::{RetryExecutor, RetryPolicy};
use crate::state::StepResult;
use crate::status::{self, StatusContext, StepStatus};
use crate::workflow::{BackoffStrategy, RetryConfig, StepKind, TimeoutBehavior, WorkflowStep};

/// Pattern-matched deterministic response used by `MockExecutor` and by
/// `workflow-orchestrator-providers::MockAgentClient` (the `USE_MOCK_AI`
/// substitution for `agent` steps, §6), so both paths agree on what a
/// mocked task "does" without dialing out to a real provider.
pub fn mock_response_for(task: &str) -> String {
    let lower = task.to_lowercase();
    if lower.contains("architecture") || lower.contains("design") {
        "Proposed architecture: a modular, layered design separating concerns into clear \
         boundaries, with well-defined interfaces between components."
            .to_string()
    } else if lower.contains("implement") {
        "Implementation complete: code written to satisfy the task, following existing \
         module conventions."
            .to_string()
    } else if lower.contains("test") {
        "Test specification generated: cases covering the primary code paths and the \
         edge cases called out in the task."
            .to_string()
    } else if lower.contains("review") {
        "Code review complete: no blocking issues found; two minor style suggestions noted.".to_string()
    } else if lower.contains("security") {
        "Security analysis complete: no critical vulnerabilities found; informational \
         findings noted."
            .to_string()
    } else if lower.contains("deploy") {
        "Deployment completed successfully to the target environment.".to_string()
    } else if lower.contains("document") {
        "Documentation generated: usage guide and reference material covering the task.".to_string()
    } else {
        format!("Mock response for task: {task}")
    }
}

fn retry_policy_from(cfg: Option<&RetryConfig>) -> RetryPolicy {
    match cfg {
        None => RetryPolicy::default(),
        Some(cfg) => {
            // BackoffStrategy::Linear/Constant don't fit RetryPolicy's
            // multiplicative formula exactly; a multiplier of 1.0
            // approximates both as a fixed delay between attempts, while
            // Exponential keeps the configured growth.
            let multiplier = match cfg.backoff {
                BackoffStrategy::Exponential => 2.0,
                BackoffStrategy::Linear | BackoffStrategy::Constant => 1.0,
            };
            RetryPolicy::new(
                cfg.max_attempts,
                Duration::from_millis(cfg.initial_delay_ms),
                multiplier,
                Duration::from_millis(cfg.max_delay_ms),
            )
        }
    }
}

/// Shared contract every step kind's executor implements. `execute` never
/// returns an `Err` -- execution failures are encoded as a `failed` /
/// `blocked` `StepResult`, matching the Scheduler's totality requirement.
#[async_trait]
pub trait StepExecutor: Send + Sync {
    fn can_handle(&self, step: &WorkflowStep) -> bool;
    async fn execute(&self, step: &WorkflowStep, ctx: &ExecutionContext) -> StepResult;
}

/// First-match-wins dispatcher over the registered executors: an ordered
/// list rather than a map, since step kind dispatch is static rather than
/// dynamically keyed.
#[derive(Clone, Default)]
pub struct ExecutorRegistry {
    executors: Vec<Arc<dyn StepExecutor>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, executor: Arc<dyn StepExecutor>) {
        self.executors.push(executor);
    }

    pub async fn execute(&self, step: &WorkflowStep, ctx: &ExecutionContext) -> StepResult {
        for executor in &self.executors {
            if executor.can_handle(step) {
                return executor.execute(step, ctx).await;
            }
        }
        StepResult::failed(
            step.id.clone(),
            format!("no executor registered for step kind {:?}", step.kind),
            0,
        )
    }
}

/// Invoked by `ParallelExecutor` to run a `parallelSteps` child back through
/// the Scheduler. A fresh `Weak` handle is wired in by the Scheduler after
/// construction (see `ParallelExecutor::wire`) rather than the executor
/// holding a strong `Arc` back to it, which would create a reference cycle
/// (Scheduler -> registry -> `ParallelExecutor` -> Scheduler).
#[async_trait]
pub trait ChildRunner: Send + Sync {
    async fn run_child(&self, thread_id: &str, step_id: &str) -> StepResult;
}

/// Executes `agent` steps: renders the task template, resolves which
/// session to resume, calls the `AgentClient`, then classifies the
/// response with the Status Operator.
pub struct AgentExecutor {
    client: Arc<dyn AgentClient>,
    status_client: Arc<dyn AgentClient>,
}

impl AgentExecutor {
    pub fn new(client: Arc<dyn AgentClient>, status_client: Arc<dyn AgentClient>) -> Self {
        Self { client, status_client }
    }
}

#[async_trait]
impl StepExecutor for AgentExecutor {
    fn can_handle(&self, step: &WorkflowStep) -> bool {
        step.kind == StepKind::Agent
    }

    async fn execute(&self, step: &WorkflowStep, ctx: &ExecutionContext) -> StepResult {
        let started = Instant::now();
        let task = ctx.render_template(&step.task).await;
        let cancel = ctx.cancellation_token();

        // Open Question #3: a resumed session (recorded from a prior run
        // of this exact step) wins over the step's declared session and
        // over `startNewConversation`.
        let session_ref = ctx
            .get_session_ref(&step.id)
            .await
            .or_else(|| step.session_ref.clone());

        let snapshot = ctx.snapshot().await;
        let request = AgentRequest {
            task: task.clone(),
            project_id: snapshot.project_id.clone(),
            session_ref: session_ref.clone(),
            project_path: None,
            agent_config: AgentConfig {
                role: step.role.clone().or_else(|| step.agent_ref.clone()),
                model: None,
                system_prompt: None,
                extra: Default::default(),
            },
        };

        let policy = retry_policy_from(step.retry.as_ref());
        let retrier = RetryExecutor::new(policy);
        let client = self.client.clone();
        let step_id = step.id.clone();
        let attempt_cancel = cancel.clone();
        let call = retrier.execute(|| {
            let client = client.clone();
            let request = request.clone();
            let step_id = step_id.clone();
            let cancel = attempt_cancel.clone();
            async move {
                client
                    .send(request, cancel)
                    .await
                    .map_err(|err| OrchestratorError::Executor {
                        step_id,
                        message: err.to_string(),
                    })
            }
        });

        let result = tokio::select! {
            result = call => result,
            _ = cancel.cancelled() => {
                let duration_ms = started.elapsed().as_millis() as u64;
                return StepResult::aborted(step.id.clone(), session_ref, duration_ms);
            }
        };

        let duration_ms = started.elapsed().as_millis() as u64;
        let response = match result {
            Ok(response) => response,
            Err(OrchestratorError::Executor { message, .. }) if message.contains("cancelled") => {
                return StepResult::aborted(step.id.clone(), session_ref, duration_ms);
            }
            Err(err) => return StepResult::failed(step.id.clone(), err.to_string(), duration_ms),
        };

        let outcome = status::classify(
            &response.response,
            StatusContext {
                role: step.role.clone(),
                task: Some(task),
                role_system_prompt: None,
            },
            self.status_client.as_ref(),
        )
        .await;

        let response_text = if outcome.status == StepStatus::Success {
            response.response
        } else {
            outcome.reason.unwrap_or(response.response)
        };

        StepResult {
            id: step.id.clone(),
            status: outcome.status,
            response: response_text,
            session_ref: response.session_ref,
            duration_ms,
            aborted_at: None,
        }
    }
}

/// Executes `mock` steps: a deterministic, pattern-matched response with no
/// outbound call, always `success`.
#[derive(Default)]
pub struct MockExecutor;

impl MockExecutor {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl StepExecutor for MockExecutor {
    fn can_handle(&self, step: &WorkflowStep) -> bool {
        step.kind == StepKind::Mock
    }

    async fn execute(&self, step: &WorkflowStep, ctx: &ExecutionContext) -> StepResult {
        let started = Instant::now();
        let task = ctx.render_template(&step.task).await;
        let response = mock_response_for(&task);
        StepResult::success(step.id.clone(), response, started.elapsed().as_millis() as u64)
    }
}

/// Executes `loop` steps: per Open Question #2, the loop summarizes its
/// iterations into a single `StepResult` rather than fanning each
/// iteration out as its own DAG node.
pub struct LoopExecutor {
    client: Arc<dyn AgentClient>,
}

impl LoopExecutor {
    pub fn new(client: Arc<dyn AgentClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl StepExecutor for LoopExecutor {
    fn can_handle(&self, step: &WorkflowStep) -> bool {
        step.kind == StepKind::Loop
    }

    async fn execute(&self, step: &WorkflowStep, ctx: &ExecutionContext) -> StepResult {
        let started = Instant::now();
        let Some(loop_cfg) = step.config.loop_config.as_ref() else {
            return StepResult::failed(step.id.clone(), "loop step missing loop config".to_string(), 0);
        };
        let limit = loop_cfg
            .max_iterations
            .unwrap_or(loop_cfg.items.len())
            .min(loop_cfg.items.len());

        let cancel = ctx.cancellation_token();
        let mut summaries = Vec::with_capacity(limit);
        let mut any_failed = false;
        for item in loop_cfg.items.iter().take(limit) {
            if cancel.is_cancelled() {
                let duration_ms = started.elapsed().as_millis() as u64;
                return StepResult::aborted(step.id.clone(), None, duration_ms);
            }
            let substituted = step.task.replace(&format!("{{{}}}", loop_cfg.loop_var), item);
            let rendered = ctx.render_template(&substituted).await;
            let request = AgentRequest {
                task: rendered.clone(),
                project_id: ctx.snapshot().await.project_id.clone(),
                session_ref: None,
                project_path: None,
                agent_config: AgentConfig {
                    role: step.role.clone().or_else(|| step.agent_ref.clone()),
                    ..Default::default()
                },
            };
            match self.client.send(request, cancel.clone()).await {
                Ok(response) => summaries.push(format!("[{item}] {}", response.response)),
                Err(err) => {
                    any_failed = true;
                    summaries.push(format!("[{item}] error: {err}"));
                }
            }
        }

        let combined = summaries.join("\n");
        let duration_ms = started.elapsed().as_millis() as u64;
        if any_failed {
            StepResult::failed(step.id.clone(), combined, duration_ms)
        } else {
            StepResult::success(step.id.clone(), combined, duration_ms)
        }
    }
}

/// Executes `parallel` steps by fanning its `parallelSteps` children out
/// through the Scheduler concurrently and aggregating their results.
pub struct ParallelExecutor {
    runner: tokio::sync::OnceCell<Weak<dyn ChildRunner>>,
}

impl Default for ParallelExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl ParallelExecutor {
    pub fn new() -> Self {
        Self {
            runner: tokio::sync::OnceCell::new(),
        }
    }

    /// Wires the Scheduler in as this executor's `ChildRunner` after both
    /// have been constructed, avoiding an `Arc` cycle between them.
    pub fn wire(&self, runner: Weak<dyn ChildRunner>) {
        let _ = self.runner.set(runner);
    }
}

#[async_trait]
impl StepExecutor for ParallelExecutor {
    fn can_handle(&self, step: &WorkflowStep) -> bool {
        step.kind == StepKind::Parallel
    }

    async fn execute(&self, step: &WorkflowStep, ctx: &ExecutionContext) -> StepResult {
        let started = Instant::now();
        let Some(children) = step.config.parallel_steps.as_ref() else {
            return StepResult::failed(step.id.clone(), "parallel step missing parallelSteps".to_string(), 0);
        };
        let Some(runner) = self.runner.get().and_then(Weak::upgrade) else {
            return StepResult::failed(step.id.clone(), "parallel executor has no scheduler wired".to_string(), 0);
        };
        let thread_id = ctx.thread_id().await;

        let futures = children.iter().map(|id| {
            let runner = runner.clone();
            let id = id.clone();
            let thread_id = thread_id.clone();
            async move { runner.run_child(&thread_id, &id).await }
        });
        let results: Vec<StepResult> = futures::future::join_all(futures).await;

        let duration_ms = started.elapsed().as_millis() as u64;
        let all_success = results.iter().all(|r| r.status == StepStatus::Success);
        let combined = results
            .iter()
            .map(|r| format!("{}: {}", r.id, r.response))
            .collect::<Vec<_>>()
            .join("\n");
        if all_success {
            StepResult::success(step.id.clone(), combined, duration_ms)
        } else {
            StepResult::failed(step.id.clone(), combined, duration_ms)
        }
    }
}

const APPROVAL_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Executes `human` steps: creates an `Approval`, publishes it to the event
/// bus, and waits for a reviewer decision or timeout per the step's
/// `timeoutBehavior`.
pub struct HumanExecutor {
    approvals: Arc<ApprovalStore>,
    events: Arc<dyn EventBus>,
}

impl HumanExecutor {
    pub fn new(approvals: Arc<ApprovalStore>, events: Arc<dyn EventBus>) -> Self {
        Self { approvals, events }
    }
}

#[async_trait]
impl StepExecutor for HumanExecutor {
    fn can_handle(&self, step: &WorkflowStep) -> bool {
        step.kind == StepKind::Human
    }

    async fn execute(&self, step: &WorkflowStep, ctx: &ExecutionContext) -> StepResult {
        let started = Instant::now();
        let Some(prompt_tmpl) = step.config.prompt.as_ref() else {
            return StepResult::failed(step.id.clone(), "human step missing prompt".to_string(), 0);
        };
        let prompt = ctx.render_template(prompt_tmpl).await;
        let task = ctx.render_template(&step.task).await;
        let (prompt, risk) = ApprovalContextBuilder::build(&prompt, step.config.risk_level, &task);
        let timeout_seconds = step.config.timeout_seconds.unwrap_or(3600);
        let behavior = step.config.timeout_behavior.unwrap_or(TimeoutBehavior::Fail);
        let thread_id = ctx.thread_id().await;

        let approval = Approval::new(uuid::Uuid::new_v4().to_string(), thread_id.clone(), step.id.clone(), prompt, risk)
            .with_timeout(timeout_seconds, behavior == TimeoutBehavior::AutoApprove);
        self.approvals.insert(approval.clone());
        self.events
            .publish(
                &thread_id,
                EventEnvelope::approval_requested(&thread_id, serde_json::to_value(&approval).unwrap_or_default()),
            )
            .await;

        let cancel = ctx.cancellation_token();
        let deadline = Instant::now() + Duration::from_secs(timeout_seconds);
        let final_approval = loop {
            if let Some(current) = self.approvals.get(&approval.id) {
                if current.is_terminal() {
                    break current;
                }
            }
            if cancel.is_cancelled() {
                let resolved = self.approvals.cancel(&approval.id).unwrap_or_else(|_| approval.clone());
                self.events
                    .publish(
                        &thread_id,
                        EventEnvelope::approval_decided(&thread_id, serde_json::to_value(&resolved).unwrap_or_default()),
                    )
                    .await;
                return StepResult::aborted(step.id.clone(), None, started.elapsed().as_millis() as u64);
            }
            if behavior != TimeoutBehavior::Infinite && Instant::now() >= deadline {
                let resolved = match behavior {
                    TimeoutBehavior::AutoApprove => self.approvals.decide(
                        &approval.id,
                        true,
                        "system-auto-approve",
                        Some("auto-approved after timeout".to_string()),
                    ),
                    _ => self.approvals.time_out(&approval.id),
                };
                break resolved.unwrap_or_else(|_| approval.clone());
            }
            tokio::time::sleep(APPROVAL_POLL_INTERVAL).await;
        };

        self.events
            .publish(
                &thread_id,
                EventEnvelope::approval_decided(&thread_id, serde_json::to_value(&final_approval).unwrap_or_default()),
            )
            .await;

        let duration_ms = started.elapsed().as_millis() as u64;
        let response = serde_json::to_string(&crate::approval::ApprovalOutcome::from(final_approval.clone()))
            .unwrap_or_default();
        use crate::approval::ApprovalStatus;
        match final_approval.status {
            ApprovalStatus::Approved => StepResult::success(step.id.clone(), response, duration_ms),
            _ => StepResult::failed(step.id.clone(), response, duration_ms),
        }
    }
}

/// Executes `javascript` steps via the small expression evaluator in
/// `jsexpr`, after resolving template references in the script text.
#[derive(Default)]
pub struct JavaScriptExecutor;

impl JavaScriptExecutor {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl StepExecutor for JavaScriptExecutor {
    fn can_handle(&self, step: &WorkflowStep) -> bool {
        step.kind == StepKind::Javascript
    }

    async fn execute(&self, step: &WorkflowStep, ctx: &ExecutionContext) -> StepResult {
        let started = Instant::now();
        let Some(script) = step.config.script.as_ref() else {
            return StepResult::failed(step.id.clone(), "javascript step missing script".to_string(), 0);
        };
        let rendered = ctx.render_template(script).await;
        let duration_ms = started.elapsed().as_millis() as u64;
        match jsexpr::evaluate(&rendered) {
            Ok(value) => StepResult::success(step.id.clone(), value.to_string(), duration_ms),
            Err(err) => StepResult::failed(step.id.clone(), err, duration_ms),
        }
    }
}

const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(30);
const WEBHOOK_MAX_ATTEMPTS: u32 = 3;
/// Per-step output truncation for the webhook payload (§4.4): 1 KiB.
const WEBHOOK_OUTPUT_TRUNCATE_BYTES: usize = 1024;

/// Truncates `s` to at most `max_bytes` bytes, respecting UTF-8 char
/// boundaries (never splits a multi-byte codepoint).
fn truncate_bytes(s: &str, max_bytes: usize) -> String {
    if s.len() <= max_bytes {
        return s.to_string();
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_string()
}

/// Executes `webhook` steps by POSTing the rendered task to `webhookUrl`.
pub struct WebhookExecutor {
    http: reqwest::Client,
}

impl Default for WebhookExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl WebhookExecutor {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
        }
    }

    pub fn with_client(http: reqwest::Client) -> Self {
        Self { http }
    }
}

#[async_trait]
impl StepExecutor for WebhookExecutor {
    fn can_handle(&self, step: &WorkflowStep) -> bool {
        step.kind == StepKind::Webhook
    }

    async fn execute(&self, step: &WorkflowStep, ctx: &ExecutionContext) -> StepResult {
        let started = Instant::now();
        let Some(url) = step.config.webhook_url.as_ref() else {
            return StepResult::failed(step.id.clone(), "webhook step missing webhookUrl".to_string(), 0);
        };
        let task = ctx.render_template(&step.task).await;
        let snapshot = ctx.snapshot().await;

        let outputs: serde_json::Map<String, serde_json::Value> = snapshot
            .step_outputs
            .iter()
            .map(|(id, output)| (id.clone(), serde_json::Value::String(truncate_bytes(output, WEBHOOK_OUTPUT_TRUNCATE_BYTES))))
            .collect();
        let successful = snapshot
            .step_results
            .values()
            .filter(|r| r.status == StepStatus::Success)
            .count();
        let summary = format!(
            "workflow {} step {}: {}/{} prior steps succeeded",
            snapshot.thread_id,
            step.id,
            successful,
            snapshot.step_results.len()
        );
        let payload = serde_json::json!({
            "metadata": {
                "threadId": snapshot.thread_id,
                "stepId": step.id,
                "projectId": snapshot.project_id,
            },
            "step": { "id": step.id, "task": task },
            "outputs": outputs,
            "summary": summary,
        });

        let mut last_err = String::new();
        for attempt in 1..=WEBHOOK_MAX_ATTEMPTS {
            if attempt > 1 {
                let delay = Duration::from_secs(1u64 << (attempt - 2));
                tokio::time::sleep(delay).await;
            }
            let send = self.http.post(url).json(&payload).timeout(WEBHOOK_TIMEOUT).send();
            match send.await {
                Ok(response) if response.status().is_success() => {
                    let body = response.text().await.unwrap_or_default();
                    return StepResult::success(step.id.clone(), body, started.elapsed().as_millis() as u64);
                }
                Ok(response) => {
                    last_err = format!("webhook returned status {}", response.status());
                }
                Err(err) => {
                    last_err = format!("webhook request failed: {err}");
                }
            }
        }
        StepResult::failed(step.id.clone(), last_err, started.elapsed().as_millis() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{AgentResponse, ProviderError};
    use crate::state::WorkflowState;
    use crate::workflow::StepConfig;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn step(id: &str, kind: StepKind, config: StepConfig) -> WorkflowStep {
        WorkflowStep {
            id: id.to_string(),
            kind,
            task: "do the thing".to_string(),
            deps: vec![],
            role: Some("dev".to_string()),
            agent_ref: None,
            session_ref: None,
            config,
            retry: None,
        }
    }

    struct StubClient {
        response: String,
        calls: AtomicU32,
    }

    #[async_trait]
    impl AgentClient for StubClient {
        async fn send(&self, _request: AgentRequest, _cancel: CancellationToken) -> Result<AgentResponse, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(AgentResponse {
                response: self.response.clone(),
                session_ref: Some("sess-1".to_string()),
                metadata: Default::default(),
            })
        }
        fn name(&self) -> &str {
            "stub"
        }
    }

    #[tokio::test]
    async fn mock_executor_is_deterministic_and_successful() {
        let executor = MockExecutor::new();
        let step = step("s1", StepKind::Mock, StepConfig::default());
        let ctx = ExecutionContext::new(WorkflowState::new("t1", vec![step.clone()]));
        let result = executor.execute(&step, &ctx).await;
        assert_eq!(result.status, StepStatus::Success);
    }

    #[tokio::test]
    async fn agent_executor_classifies_success_response() {
        let agent_client = Arc::new(StubClient {
            response: "done".to_string(),
            calls: AtomicU32::new(0),
        });
        let status_client = Arc::new(StubClient {
            response: "success".to_string(),
            calls: AtomicU32::new(0),
        });
        let executor = AgentExecutor::new(agent_client, status_client);
        let step = step("s1", StepKind::Agent, StepConfig::default());
        let ctx = ExecutionContext::new(WorkflowState::new("t1", vec![step.clone()]));
        let result = executor.execute(&step, &ctx).await;
        assert_eq!(result.status, StepStatus::Success);
        assert_eq!(result.session_ref.as_deref(), Some("sess-1"));
    }

    #[tokio::test]
    async fn javascript_executor_evaluates_expression() {
        let executor = JavaScriptExecutor::new();
        let mut config = StepConfig::default();
        config.script = Some("sum(1, 2, 3)".to_string());
        let step = step("s1", StepKind::Javascript, config);
        let ctx = ExecutionContext::new(WorkflowState::new("t1", vec![step.clone()]));
        let result = executor.execute(&step, &ctx).await;
        assert_eq!(result.status, StepStatus::Success);
        assert_eq!(result.response, "6");
    }

    #[tokio::test]
    async fn parallel_executor_fails_without_wired_runner() {
        let executor = ParallelExecutor::new();
        let mut config = StepConfig::default();
        config.parallel_steps = Some(vec!["child".to_string()]);
        let step = step("p1", StepKind::Parallel, config);
        let ctx = ExecutionContext::new(WorkflowState::new("t1", vec![step.clone()]));
        let result = executor.execute(&step, &ctx).await;
        assert_eq!(result.status, StepStatus::Failed);
    }

    #[tokio::test]
    async fn registry_dispatches_to_first_matching_executor() {
        let mut registry = ExecutorRegistry::new();
        registry.register(Arc::new(MockExecutor::new()));
        let step = step("s1", StepKind::Mock, StepConfig::default());
        let ctx = ExecutionContext::new(WorkflowState::new("t1", vec![step.clone()]));
        let result = registry.execute(&step, &ctx).await;
        assert_eq!(result.status, StepStatus::Success);
    }

    #[tokio::test]
    async fn registry_fails_closed_for_unregistered_kind() {
        let registry = ExecutorRegistry::new();
        let step = step("s1", StepKind::Mock, StepConfig::default());
        let ctx = ExecutionContext::new(WorkflowState::new("t1", vec![step.clone()]));
        let result = registry.execute(&step, &ctx).await;
        assert_eq!(result.status, StepStatus::Failed);
    }

    #[test]
    fn mock_response_covers_all_documented_branches() {
        assert!(mock_response_for("design the system").contains("architecture"));
        assert!(mock_response_for("implement the feature").contains("Implementation"));
        assert!(mock_response_for("write the tests").contains("Test specification"));
        assert!(mock_response_for("review the PR").contains("review"));
        assert!(mock_response_for("run a security scan").contains("Security analysis"));
        assert!(mock_response_for("deploy to staging").contains("Deployment"));
        assert!(mock_response_for("document the API").contains("Documentation"));
        assert!(mock_response_for("do something else entirely").contains("Mock response"));
    }

    #[test]
    fn truncate_bytes_respects_char_boundaries() {
        let s = "héllo world";
        let truncated = truncate_bytes(s, 2);
        assert!(truncated.len() <= 2);
        assert!(s.starts_with(&truncated));
    }

    #[test]
    fn truncate_bytes_noop_when_under_limit() {
        assert_eq!(truncate_bytes("short", 1024), "short");
    }

    #[tokio::test]
    async fn webhook_executor_sends_spec_shaped_payload() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/hook")
            .match_body(mockito::Matcher::AllOf(vec![
                mockito::Matcher::Regex("\"metadata\"".into()),
                mockito::Matcher::Regex("\"step\"".into()),
                mockito::Matcher::Regex("\"outputs\"".into()),
                mockito::Matcher::Regex("\"summary\"".into()),
            ]))
            .with_status(200)
            .with_body("ok")
            .create_async()
            .await;

        let executor = WebhookExecutor::new();
        let mut config = StepConfig::default();
        config.webhook_url = Some(format!("{}/hook", server.url()));
        let step = step("s1", StepKind::Webhook, config);
        let ctx = ExecutionContext::new(WorkflowState::new("t1", vec![step.clone()]));
        ctx.record_result(StepResult::success("prior", "a".repeat(2000), 1)).await;

        let result = executor.execute(&step, &ctx).await;
        mock.assert_async().await;
        assert_eq!(result.status, StepStatus::Success);
    }

    #[tokio::test]
    async fn webhook_executor_retries_up_to_three_times() {
        let mut server = mockito::Server::new_async().await;
        let mock = server.mock("POST", "/hook").with_status(500).expect(3).create_async().await;

        let executor = WebhookExecutor::new();
        let mut config = StepConfig::default();
        config.webhook_url = Some(format!("{}/hook", server.url()));
        let step = step("s1", StepKind::Webhook, config);
        let ctx = ExecutionContext::new(WorkflowState::new("t1", vec![step.clone()]));

        let result = executor.execute(&step, &ctx).await;
        mock.assert_async().await;
        assert_eq!(result.status, StepStatus::Failed);
    }
}
