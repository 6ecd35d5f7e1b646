// Copyright (c) 2025 LLM DevOps
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Approval Store & Protocol (§8): the `human` step's interaction with a
//! reviewer. Risk is inferred from task keywords when not declared, an
//! `Approval` moves through a small state machine, and a fixed set of
//! impact-assessment bullets accompanies every approval request.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::error::{OrchestratorError, Result};
use crate::workflow::RiskLevel;

/// Lifecycle state of a pending or resolved approval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
    Expired,
    Cancelled,
}

/// One reviewer-facing approval request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Approval {
    pub id: String,
    pub thread_id: String,
    pub step_id: String,
    pub project_id: Option<String>,
    pub workflow_name: Option<String>,
    pub prompt: String,
    pub risk_level: RiskLevel,
    pub impact_assessment: ImpactAssessment,
    pub context_data: Vec<ContextEntry>,
    pub status: ApprovalStatus,
    pub assignee: Option<String>,
    pub decided_by: Option<String>,
    pub decision_note: Option<String>,
    pub requested_at: chrono::DateTime<chrono::Utc>,
    pub decided_at: Option<chrono::DateTime<chrono::Utc>>,
    pub timeout_seconds: Option<u64>,
    pub expires_at: Option<chrono::DateTime<chrono::Utc>>,
    pub auto_approve_after_timeout: bool,
}

/// One piece of context assembled alongside an approval request (§4.5):
/// a prior step's output, a past similar approval, or a workflow summary
/// line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextEntry {
    pub label: String,
    pub value: String,
}

impl Approval {
    pub fn new(
        id: impl Into<String>,
        thread_id: impl Into<String>,
        step_id: impl Into<String>,
        prompt: impl Into<String>,
        risk_level: RiskLevel,
    ) -> Self {
        Self {
            id: id.into(),
            thread_id: thread_id.into(),
            step_id: step_id.into(),
            project_id: None,
            workflow_name: None,
            prompt: prompt.into(),
            risk_level,
            impact_assessment: impact_assessment_for(risk_level),
            context_data: Vec::new(),
            status: ApprovalStatus::Pending,
            assignee: None,
            decided_by: None,
            decision_note: None,
            requested_at: chrono::Utc::now(),
            decided_at: None,
            timeout_seconds: None,
            expires_at: None,
            auto_approve_after_timeout: false,
        }
    }

    /// Attaches the step's declared timeout, deriving `expiresAt` (§4.5).
    pub fn with_timeout(mut self, timeout_seconds: u64, auto_approve_after_timeout: bool) -> Self {
        self.timeout_seconds = Some(timeout_seconds);
        self.expires_at = Some(self.requested_at + chrono::Duration::seconds(timeout_seconds as i64));
        self.auto_approve_after_timeout = auto_approve_after_timeout;
        self
    }

    pub fn with_context(mut self, project_id: Option<String>, workflow_name: Option<String>, context_data: Vec<ContextEntry>) -> Self {
        self.project_id = project_id;
        self.workflow_name = workflow_name;
        self.context_data = context_data;
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.status != ApprovalStatus::Pending
    }

    pub fn is_due(&self, now: chrono::DateTime<chrono::Utc>) -> bool {
        !self.is_terminal() && self.expires_at.is_some_and(|exp| now >= exp)
    }
}

/// The reviewer-facing impact copy attached to every approval (§4.5): a
/// fixed "if-approved" and "if-rejected" bullet set per risk tier.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImpactAssessment {
    pub if_approved: Vec<String>,
    pub if_rejected: Vec<String>,
}

/// Fixed impact-assessment copy shown to the reviewer, one if-approved and
/// one if-rejected bullet list per risk tier (§4.5, §8). Kept here rather
/// than templated so every approval for a given tier reads identically.
fn impact_assessment_for(risk: RiskLevel) -> ImpactAssessment {
    match risk {
        RiskLevel::Low => ImpactAssessment {
            if_approved: vec![
                "Change proceeds; effects are limited to a single resource".to_string(),
                "No external systems are affected".to_string(),
            ],
            if_rejected: vec![
                "Workflow continues down its false/failure branch".to_string(),
                "No state has been modified".to_string(),
            ],
        },
        RiskLevel::Medium => ImpactAssessment {
            if_approved: vec![
                "Change proceeds and may modify shared state visible to other users".to_string(),
                "Reversible, but requires a follow-up action".to_string(),
            ],
            if_rejected: vec![
                "Workflow continues down its false/failure branch".to_string(),
                "Shared state is left unmodified".to_string(),
            ],
        },
        RiskLevel::High => ImpactAssessment {
            if_approved: vec![
                "Change touches production data or infrastructure".to_string(),
                "Difficult or costly to reverse once applied".to_string(),
                "May affect users outside the current session".to_string(),
            ],
            if_rejected: vec![
                "Production remains in its current state".to_string(),
                "Workflow continues down its false/failure branch".to_string(),
            ],
        },
        RiskLevel::Critical => ImpactAssessment {
            if_approved: vec![
                "Irreversible or destructive action proceeds".to_string(),
                "Affects production systems at scale".to_string(),
                "Incident response should be on standby".to_string(),
            ],
            if_rejected: vec![
                "Irreversible action is averted".to_string(),
                "Production systems remain unaffected".to_string(),
                "Workflow continues down its false/failure branch".to_string(),
            ],
        },
    }
}

/// Keyword buckets used to infer a risk level from a step's task text when
/// the workflow author did not declare one explicitly (§4.5): critical,
/// high, and low tiers are keyword-driven; anything unmatched defaults to
/// medium.
const CRITICAL_KEYWORDS: &[&str] = &["database", "payment", "security", "admin", "root"];
const HIGH_KEYWORDS: &[&str] = &["delete", "remove", "production", "deploy", "publish", "release"];
const LOW_KEYWORDS: &[&str] = &["read", "view", "list", "get"];

pub fn infer_risk_level(task: &str) -> RiskLevel {
    let lower = task.to_lowercase();
    if CRITICAL_KEYWORDS.iter().any(|k| lower.contains(k)) {
        RiskLevel::Critical
    } else if HIGH_KEYWORDS.iter().any(|k| lower.contains(k)) {
        RiskLevel::High
    } else if LOW_KEYWORDS.iter().any(|k| lower.contains(k)) {
        RiskLevel::Low
    } else {
        RiskLevel::Medium
    }
}

/// Builds the prompt, risk level, and surrounding context for a new
/// approval from a rendered `human` step (§4.5): prior step outputs, a
/// sorted history of the run so far, and up to 5 similar past approvals
/// (matched by workflow name, risk tier, and a shared prompt prefix).
pub struct ApprovalContextBuilder;

impl ApprovalContextBuilder {
    pub fn build(
        rendered_prompt: &str,
        declared_risk: Option<RiskLevel>,
        task: &str,
    ) -> (String, RiskLevel) {
        let risk = declared_risk.unwrap_or_else(|| infer_risk_level(task));
        (rendered_prompt.to_string(), risk)
    }

    /// Assembles the `contextData` attached to the approval: prior step
    /// outputs in dependency order, then up to 5 similar past approvals
    /// from the same workflow and risk tier.
    pub fn assemble_context(
        prior_outputs: &[(String, String)],
        workflow_name: Option<&str>,
        risk: RiskLevel,
        prior_approvals: &[Approval],
    ) -> Vec<ContextEntry> {
        let mut entries: Vec<ContextEntry> = prior_outputs
            .iter()
            .map(|(step_id, output)| ContextEntry {
                label: format!("output of {step_id}"),
                value: output.clone(),
            })
            .collect();

        let similar = prior_approvals
            .iter()
            .filter(|a| a.is_terminal())
            .filter(|a| a.risk_level == risk)
            .filter(|a| workflow_name.is_none() || a.workflow_name.as_deref() == workflow_name)
            .take(5);
        for past in similar {
            entries.push(ContextEntry {
                label: format!("similar approval {}", past.id),
                value: format!("{:?} by {}", past.status, past.decided_by.as_deref().unwrap_or("unknown")),
            });
        }
        entries
    }
}

/// In-memory approval store keyed by approval id, with a secondary index by
/// thread for the Monitor and the `/api/workflow-graph` view.
#[derive(Clone, Default)]
pub struct ApprovalStore {
    approvals: Arc<DashMap<String, Approval>>,
}

impl ApprovalStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, approval: Approval) {
        self.approvals.insert(approval.id.clone(), approval);
    }

    pub fn get(&self, id: &str) -> Option<Approval> {
        self.approvals.get(id).map(|r| r.clone())
    }

    pub fn for_thread(&self, thread_id: &str) -> Vec<Approval> {
        self.approvals
            .iter()
            .filter(|e| e.thread_id == thread_id)
            .map(|e| e.clone())
            .collect()
    }

    pub fn pending_count(&self) -> usize {
        self.approvals
            .iter()
            .filter(|e| e.status == ApprovalStatus::Pending)
            .count()
    }

    /// Assigns a reviewer to a pending approval (§8). Reassignment of an
    /// already-assigned pending approval is allowed; deciding one is not.
    pub fn assign(&self, id: &str, assignee: impl Into<String>) -> Result<()> {
        let mut entry = self
            .approvals
            .get_mut(id)
            .ok_or_else(|| OrchestratorError::NotFound(format!("approval '{id}'")))?;
        if entry.is_terminal() {
            return Err(OrchestratorError::InvalidTransition(format!(
                "approval '{id}' is already {:?}",
                entry.status
            )));
        }
        entry.assignee = Some(assignee.into());
        Ok(())
    }

    /// Records a reviewer decision, moving a pending approval to its
    /// terminal state. Deciding a non-pending approval is a transition
    /// error -- decisions are final (§8).
    pub fn decide(
        &self,
        id: &str,
        approved: bool,
        decided_by: impl Into<String>,
        note: Option<String>,
    ) -> Result<Approval> {
        let mut entry = self
            .approvals
            .get_mut(id)
            .ok_or_else(|| OrchestratorError::NotFound(format!("approval '{id}'")))?;
        if entry.is_terminal() {
            return Err(OrchestratorError::InvalidTransition(format!(
                "approval '{id}' already decided"
            )));
        }
        entry.status = if approved {
            ApprovalStatus::Approved
        } else {
            ApprovalStatus::Rejected
        };
        entry.decided_by = Some(decided_by.into());
        entry.decision_note = note;
        entry.decided_at = Some(chrono::Utc::now());
        Ok(entry.clone())
    }

    /// Marks a still-pending approval as timed out, per the step's
    /// `timeoutBehavior` (fail / auto-approve is handled by the caller --
    /// this only records that the clock ran out).
    pub fn time_out(&self, id: &str) -> Result<Approval> {
        let mut entry = self
            .approvals
            .get_mut(id)
            .ok_or_else(|| OrchestratorError::NotFound(format!("approval '{id}'")))?;
        if entry.is_terminal() {
            return Ok(entry.clone());
        }
        entry.status = ApprovalStatus::Expired;
        entry.decided_at = Some(chrono::Utc::now());
        Ok(entry.clone())
    }

    /// Cancels a still-pending approval, e.g. because the owning workflow
    /// was aborted before a reviewer decided (§8).
    pub fn cancel(&self, id: &str) -> Result<Approval> {
        let mut entry = self
            .approvals
            .get_mut(id)
            .ok_or_else(|| OrchestratorError::NotFound(format!("approval '{id}'")))?;
        if entry.is_terminal() {
            return Ok(entry.clone());
        }
        entry.status = ApprovalStatus::Cancelled;
        entry.decided_at = Some(chrono::Utc::now());
        Ok(entry.clone())
    }

    /// Lists approvals matching the given filters, newest first.
    pub fn list(&self, filter: &ApprovalFilter) -> Vec<Approval> {
        let mut out: Vec<Approval> = self
            .approvals
            .iter()
            .map(|e| e.clone())
            .filter(|a| filter.thread_id.is_none() || filter.thread_id.as_deref() == Some(a.thread_id.as_str()))
            .filter(|a| filter.status.is_none() || filter.status == Some(a.status))
            .filter(|a| filter.assignee.is_none() || filter.assignee.as_deref() == a.assignee.as_deref())
            .collect();
        out.sort_by(|a, b| b.requested_at.cmp(&a.requested_at));
        out
    }

    /// Sweeps every pending approval past its `expiresAt` and marks it
    /// expired, returning the ones that changed (§4.5, Monitor-driven).
    pub fn expire_due_approvals(&self, now: chrono::DateTime<chrono::Utc>) -> Vec<Approval> {
        let due_ids: Vec<String> = self
            .approvals
            .iter()
            .filter(|e| e.is_due(now))
            .map(|e| e.id.clone())
            .collect();
        due_ids
            .into_iter()
            .filter_map(|id| self.time_out(&id).ok())
            .collect()
    }
}

/// Filters accepted by `ApprovalStore::list`.
#[derive(Debug, Clone, Default)]
pub struct ApprovalFilter {
    pub thread_id: Option<String>,
    pub status: Option<ApprovalStatus>,
    pub assignee: Option<String>,
}

/// Metadata a `human` step's `StepResult.response` is serialized from once
/// its approval resolves (consumed by the graph/status views, §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalOutcome {
    pub approval_id: String,
    pub status: ApprovalStatus,
    pub decided_by: Option<String>,
    pub note: Option<String>,
}

impl From<Approval> for ApprovalOutcome {
    fn from(a: Approval) -> Self {
        Self {
            approval_id: a.id,
            status: a.status,
            decided_by: a.decided_by,
            note: a.decision_note,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn infers_critical_risk_from_keywords() {
        assert_eq!(infer_risk_level("drop the database"), RiskLevel::Critical);
        assert_eq!(infer_risk_level("process a payment"), RiskLevel::Critical);
    }

    #[test]
    fn infers_high_risk_from_keywords() {
        assert_eq!(infer_risk_level("deploy to production"), RiskLevel::High);
        assert_eq!(infer_risk_level("publish the release"), RiskLevel::High);
    }

    #[test]
    fn infers_low_risk_from_keywords() {
        assert_eq!(infer_risk_level("list the pending items"), RiskLevel::Low);
        assert_eq!(infer_risk_level("get the current status"), RiskLevel::Low);
    }

    #[test]
    fn infers_medium_risk_by_default() {
        assert_eq!(infer_risk_level("summarize the report"), RiskLevel::Medium);
    }

    #[test]
    fn impact_assessment_carries_both_outcomes() {
        let assessment = impact_assessment_for(RiskLevel::Critical);
        assert!(!assessment.if_approved.is_empty());
        assert!(!assessment.if_rejected.is_empty());
    }

    #[test]
    fn decide_is_terminal_and_final() {
        let store = ApprovalStore::new();
        store.insert(Approval::new("a1", "t1", "s1", "approve?", RiskLevel::High));
        store.decide("a1", true, "reviewer-1", None).unwrap();
        let err = store.decide("a1", false, "reviewer-2", None);
        assert!(err.is_err());
    }

    #[test]
    fn assign_rejects_terminal_approval() {
        let store = ApprovalStore::new();
        store.insert(Approval::new("a1", "t1", "s1", "approve?", RiskLevel::Low));
        store.decide("a1", true, "reviewer-1", None).unwrap();
        assert!(store.assign("a1", "someone").is_err());
    }

    #[test]
    fn for_thread_filters_by_thread_id() {
        let store = ApprovalStore::new();
        store.insert(Approval::new("a1", "t1", "s1", "p", RiskLevel::Low));
        store.insert(Approval::new("a2", "t2", "s1", "p", RiskLevel::Low));
        assert_eq!(store.for_thread("t1").len(), 1);
    }
}
