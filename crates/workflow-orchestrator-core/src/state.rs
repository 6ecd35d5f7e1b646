// Copyright (c) 2025 LLM DevOps
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `WorkflowState` (§3): the in-memory + checkpointed snapshot of one
//! thread's run. Mutated only by the Orchestrator; Executors read from a
//! snapshot handed to them via `ExecutionContext`.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::status::StepStatus;
use crate::workflow::WorkflowStep;

/// Overall workflow status, derived once the frontier is empty (§4.8.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Running,
    Completed,
    Partial,
    Failed,
    Aborted,
}

/// A single step's result. `status == Success` implies `response` is
/// non-empty; `status == Aborted` implies `aborted_at` is set (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    pub id: String,
    pub status: StepStatus,
    pub response: String,
    pub session_ref: Option<String>,
    pub duration_ms: u64,
    pub aborted_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl StepResult {
    pub fn success(id: impl Into<String>, response: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            id: id.into(),
            status: StepStatus::Success,
            response: response.into(),
            session_ref: None,
            duration_ms,
            aborted_at: None,
        }
    }

    pub fn failed(id: impl Into<String>, reason: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            id: id.into(),
            status: StepStatus::Failed,
            response: reason.into(),
            session_ref: None,
            duration_ms,
            aborted_at: None,
        }
    }

    pub fn not_executed(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: StepStatus::NotExecuted,
            response: reason.into(),
            session_ref: None,
            duration_ms: 0,
            aborted_at: None,
        }
    }

    pub fn aborted(id: impl Into<String>, session_ref: Option<String>, duration_ms: u64) -> Self {
        Self {
            id: id.into(),
            status: StepStatus::Aborted,
            response: String::new(),
            session_ref,
            duration_ms,
            aborted_at: Some(chrono::Utc::now()),
        }
    }

    pub fn with_session_ref(mut self, session_ref: Option<String>) -> Self {
        self.session_ref = session_ref;
        self
    }
}

/// The checkpointed snapshot for one thread.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowState {
    pub thread_id: String,
    pub project_id: Option<String>,
    pub steps: Vec<WorkflowStep>,
    pub step_results: HashMap<String, StepResult>,
    pub step_outputs: HashMap<String, String>,
    pub session_refs: HashMap<String, String>,
    pub current_step_index: usize,
    pub status: WorkflowStatus,
    pub start_new_conversation: bool,
}

impl WorkflowState {
    pub fn new(thread_id: impl Into<String>, steps: Vec<WorkflowStep>) -> Self {
        Self {
            thread_id: thread_id.into(),
            project_id: None,
            steps,
            step_results: HashMap::new(),
            step_outputs: HashMap::new(),
            session_refs: HashMap::new(),
            current_step_index: 0,
            status: WorkflowStatus::Running,
            start_new_conversation: false,
        }
    }

    /// Records a step result, updating `step_outputs`/`session_refs` in
    /// lockstep per the §3 invariant `stepOutputs[id] ==
    /// stepResults[id].response` whenever the result is `success`.
    pub fn record_result(&mut self, result: StepResult) {
        if result.status == StepStatus::Success {
            self.step_outputs
                .insert(result.id.clone(), result.response.clone());
        }
        if let Some(session_ref) = &result.session_ref {
            self.session_refs
                .insert(result.id.clone(), session_ref.clone());
        }
        self.step_results.insert(result.id.clone(), result);
    }

    /// Final workflow status per the Scheduler's completion rule (§4.8.5).
    pub fn compute_final_status(&self) -> WorkflowStatus {
        let relevant = self
            .steps
            .iter()
            .filter_map(|s| self.step_results.get(&s.id).map(|r| r.status));
        status_from_step_statuses(relevant)
    }
}

/// Pure form of the Scheduler's completion rule (§4.8.5), shared by
/// [`WorkflowState::compute_final_status`] and the
/// `/api/invoke-status/status/:threadId` computed-state endpoint, which
/// takes an arbitrary client-supplied step list rather than a live run.
pub fn status_from_step_statuses(statuses: impl IntoIterator<Item = StepStatus>) -> WorkflowStatus {
    let relevant: Vec<StepStatus> = statuses.into_iter().collect();
    if relevant.iter().any(|s| *s == StepStatus::Aborted) {
        return WorkflowStatus::Aborted;
    }
    let all_success = !relevant.is_empty() && relevant.iter().all(|s| *s == StepStatus::Success);
    if all_success {
        return WorkflowStatus::Completed;
    }
    let any_success = relevant.iter().any(|s| *s == StepStatus::Success);
    let any_non_success = relevant.iter().any(|s| *s != StepStatus::Success);
    if any_success && any_non_success {
        WorkflowStatus::Partial
    } else {
        WorkflowStatus::Failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::{StepConfig, StepKind};

    fn step(id: &str) -> WorkflowStep {
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

    #[test]
    fn success_result_populates_step_outputs() {
        let mut state = WorkflowState::new("t1", vec![step("s1")]);
        state.record_result(StepResult::success("s1", "hello", 5));
        assert_eq!(state.step_outputs.get("s1"), Some(&"hello".to_string()));
    }

    #[test]
    fn all_success_is_completed() {
        let mut state = WorkflowState::new("t1", vec![step("s1"), step("s2")]);
        state.record_result(StepResult::success("s1", "a", 1));
        state.record_result(StepResult::success("s2", "b", 1));
        assert_eq!(state.compute_final_status(), WorkflowStatus::Completed);
    }

    #[test]
    fn mixed_results_is_partial() {
        let mut state = WorkflowState::new("t1", vec![step("s1"), step("s2")]);
        state.record_result(StepResult::success("s1", "a", 1));
        state.record_result(StepResult::failed("s2", "boom", 1));
        assert_eq!(state.compute_final_status(), WorkflowStatus::Partial);
    }

    #[test]
    fn any_aborted_is_aborted() {
        let mut state = WorkflowState::new("t1", vec![step("s1")]);
        state.record_result(StepResult::aborted("s1", None, 1));
        assert_eq!(state.compute_final_status(), WorkflowStatus::Aborted);
    }

    #[test]
    fn all_failed_is_failed() {
        let mut state = WorkflowState::new("t1", vec![step("s1")]);
        state.record_result(StepResult::failed("s1", "boom", 1));
        assert_eq!(state.compute_final_status(), WorkflowStatus::Failed);
    }
}
