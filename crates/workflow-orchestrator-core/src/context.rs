// Copyright (c) 2025 LLM DevOps
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `ExecutionContext`: the shared, concurrency-safe handle Executors use to
//! read prior outputs, render templates, evaluate conditions, and record
//! their own result back into the run's `WorkflowState`.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::condition::{self, ConditionContext, StepResultView};
use crate::state::{StepResult, WorkflowState};
use crate::template::{self, TemplateContext};
use crate::workflow::Condition;

/// Shared, cloneable handle over one thread's `WorkflowState`. Carries the
/// thread's cancellation token so every Executor observes the same abort
/// signal (§4.8.6) rather than each minting its own.
#[derive(Clone)]
pub struct ExecutionContext {
    state: Arc<RwLock<WorkflowState>>,
    cancel: CancellationToken,
}

impl ExecutionContext {
    pub fn new(state: WorkflowState) -> Self {
        Self::with_cancellation(state, CancellationToken::new())
    }

    pub fn with_cancellation(state: WorkflowState, cancel: CancellationToken) -> Self {
        Self {
            state: Arc::new(RwLock::new(state)),
            cancel,
        }
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub async fn snapshot(&self) -> WorkflowState {
        self.state.read().await.clone()
    }

    pub async fn thread_id(&self) -> String {
        self.state.read().await.thread_id.clone()
    }

    /// Resolves `template`'s `{stepId.output}` / `{timestamp}` / ... markers
    /// against the current snapshot (§4.1).
    pub async fn render_template(&self, tmpl: &str) -> String {
        let guard = self.state.read().await;
        let ctx = TemplateContext {
            step_outputs: &guard.step_outputs,
            thread_id: &guard.thread_id,
            project_id: guard.project_id.as_deref(),
        };
        template::resolve(tmpl, &ctx)
    }

    /// Evaluates a condition against the current snapshot. Totality is the
    /// contract: this always returns a bool and never an `Err`; evaluation
    /// errors are logged and the `false` branch is taken (§4.2, §8).
    pub async fn evaluate_condition(&self, condition: &Condition) -> bool {
        let guard = self.state.read().await;
        let views: HashMap<String, StepResultView> = guard
            .step_results
            .iter()
            .map(|(id, r)| {
                (
                    id.clone(),
                    StepResultView {
                        status: r.status,
                        response: r.response.clone(),
                    },
                )
            })
            .collect();
        let ctx = ConditionContext {
            step_results: &views,
            step_outputs: &guard.step_outputs,
            thread_id: &guard.thread_id,
            project_id: guard.project_id.as_deref(),
        };
        let outcome = condition::evaluate(condition, &ctx);
        if let Some(err) = &outcome.error {
            tracing::warn!(thread_id = %guard.thread_id, error = %err, "condition evaluation error, taking false branch");
        }
        outcome.result
    }

    pub async fn record_result(&self, result: StepResult) {
        let mut guard = self.state.write().await;
        guard.record_result(result);
    }

    pub async fn get_output(&self, step_id: &str) -> Option<String> {
        self.state.read().await.step_outputs.get(step_id).cloned()
    }

    pub async fn get_result(&self, step_id: &str) -> Option<StepResult> {
        self.state.read().await.step_results.get(step_id).cloned()
    }

    pub async fn get_session_ref(&self, step_id: &str) -> Option<String> {
        self.state.read().await.session_refs.get(step_id).cloned()
    }

    pub async fn set_status(&self, status: crate::state::WorkflowStatus) {
        self.state.write().await.status = status;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::{StepConfig, StepKind, WorkflowStep};

    fn empty_step(id: &str) -> WorkflowStep {
        WorkflowStep {
            id: id.to_string(),
            kind: StepKind::Agent,
            task: String::new(),
            deps: vec![],
            role: Some("dev".to_string()),
            agent_ref: None,
            session_ref: None,
            config: StepConfig::default(),
            retry: None,
        }
    }

    #[tokio::test]
    async fn render_template_reads_recorded_output() {
        let ctx = ExecutionContext::new(WorkflowState::new("t1", vec![empty_step("s1")]));
        ctx.record_result(StepResult::success("s1", "hi", 1)).await;
        let rendered = ctx.render_template("value: {s1.output}").await;
        assert_eq!(rendered, "value: hi");
    }

    #[tokio::test]
    async fn evaluate_condition_never_errors_out() {
        let ctx = ExecutionContext::new(WorkflowState::new("t1", vec![]));
        let cond = Condition::Bare("{missing.output} == \"x\"".to_string());
        let result = ctx.evaluate_condition(&cond).await;
        assert!(!result);
    }
}
