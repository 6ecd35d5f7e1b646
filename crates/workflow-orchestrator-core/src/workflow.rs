// Copyright (c) 2025 LLM DevOps
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Workflow step definitions: the typed DAG node shapes described by the
//! engine's data model (agent, mock, conditional, loop, parallel, human,
//! javascript, webhook steps) plus the structured/legacy condition union.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::error::{OrchestratorError, Result};

/// The eight step kinds the engine knows how to schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    Agent,
    Mock,
    Conditional,
    Loop,
    Parallel,
    Human,
    Javascript,
    Webhook,
}

/// Interaction type for a `human` step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionType {
    Approval,
    Notification,
    Input,
}

/// What happens to a `human` step when its approval times out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TimeoutBehavior {
    Fail,
    AutoApprove,
    Infinite,
}

/// Risk level of a human-approval step; inferred from task keywords when absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::Critical => "critical",
        };
        write!(f, "{s}")
    }
}

/// Backoff strategy for the Builder's retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    Exponential,
    Linear,
    Constant,
}

/// Retry configuration attached to a step by the Workflow Builder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_attempts: u32,
    #[serde(default = "default_backoff")]
    pub backoff: BackoffStrategy,
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_backoff() -> BackoffStrategy {
    BackoffStrategy::Exponential
}
fn default_initial_delay_ms() -> u64 {
    1_000
}
fn default_max_delay_ms() -> u64 {
    5_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            backoff: BackoffStrategy::Exponential,
            initial_delay_ms: 1_000,
            max_delay_ms: 5_000,
        }
    }
}

/// An operand in a structured condition rule: either a reference to a prior
/// step's field, or a literal value.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConditionOperand {
    StepField {
        #[serde(rename = "stepId")]
        step_id: String,
        field: StepField,
    },
    Literal {
        #[serde(rename = "type")]
        data_type: ConditionDataType,
        value: serde_json::Value,
    },
}

/// Which field of a prior step's result a structured condition reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepField {
    Output,
    Status,
    Response,
}

/// Declared data type for a structured condition rule's operands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionDataType {
    String,
    Number,
    Boolean,
}

/// Comparison operator for a structured condition rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOp {
    Equals,
    NotEquals,
    GreaterThan,
    GreaterThanOrEqual,
    LessThan,
    LessThanOrEqual,
    Contains,
    NotContains,
}

/// A single comparison within a structured condition group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConditionRule {
    pub left: ConditionOperand,
    pub op: ConditionOp,
    pub right: ConditionOperand,
    #[serde(rename = "dataType")]
    pub data_type: ConditionDataType,
}

/// Boolean combinator joining a group's rules and subgroups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Combinator {
    And,
    Or,
}

/// A node in the structured v2.0 condition tree.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ConditionGroup {
    pub combinator: Combinator,
    #[serde(default)]
    pub rules: Vec<ConditionRule>,
    #[serde(default)]
    pub subgroups: Vec<ConditionGroup>,
}

impl Default for Combinator {
    fn default() -> Self {
        Combinator::And
    }
}

/// A structured v2.0 condition: a versioned root group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuredCondition {
    pub version: String,
    #[serde(rename = "rootGroup")]
    pub root_group: ConditionGroup,
}

/// A conditional step's condition: structured tree, legacy expression, or a
/// bare string (equivalent to a legacy expression).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Condition {
    Structured(StructuredCondition),
    Legacy { expression: String },
    Bare(String),
}

impl Condition {
    /// The legacy/bare expression text, when this condition is not structured.
    pub fn as_legacy_expr(&self) -> Option<&str> {
        match self {
            Condition::Legacy { expression } => Some(expression),
            Condition::Bare(s) => Some(s),
            Condition::Structured(_) => None,
        }
    }

    /// Every `stepId` referenced anywhere in the condition (for dependency
    /// validation and for the legacy expression scanner).
    pub fn referenced_step_ids(&self) -> HashSet<String> {
        let mut out = HashSet::new();
        match self {
            Condition::Structured(sc) => collect_group_refs(&sc.root_group, &mut out),
            Condition::Legacy { expression } | Condition::Bare(expression) => {
                for cap in template_step_refs(expression) {
                    out.insert(cap);
                }
            }
        }
        out
    }
}

fn collect_group_refs(group: &ConditionGroup, out: &mut HashSet<String>) {
    for rule in &group.rules {
        if let ConditionOperand::StepField { step_id, .. } = &rule.left {
            out.insert(step_id.clone());
        }
        if let ConditionOperand::StepField { step_id, .. } = &rule.right {
            out.insert(step_id.clone());
        }
    }
    for sub in &group.subgroups {
        collect_group_refs(sub, out);
    }
}

/// Scans `{stepId.output}` / `{stepId}` references out of a legacy
/// expression or template string without executing anything.
pub fn template_step_refs(text: &str) -> Vec<String> {
    let mut refs = Vec::new();
    let bytes = text.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'{' {
            if let Some(end) = text[i..].find('}') {
                let inner = &text[i + 1..i + end];
                let step_id = inner.split('.').next().unwrap_or(inner);
                if !step_id.is_empty()
                    && step_id != "timestamp"
                    && step_id != "threadId"
                    && step_id != "projectId"
                {
                    refs.push(step_id.to_string());
                }
                i += end + 1;
                continue;
            }
        }
        i += 1;
    }
    refs
}

/// Items a `loop` step iterates over.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoopConfig {
    pub items: Vec<String>,
    #[serde(default = "default_loop_var")]
    pub loop_var: String,
    pub max_iterations: Option<usize>,
}

fn default_loop_var() -> String {
    "item".to_string()
}

/// Kind-specific configuration, one variant per `StepKind`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct StepConfig {
    // conditional
    pub condition: Option<Condition>,
    pub true_branch: Option<String>,
    pub false_branch: Option<String>,

    // loop
    #[serde(rename = "loop")]
    pub loop_config: Option<LoopConfig>,

    // parallel
    pub parallel_steps: Option<Vec<String>>,

    // human
    pub prompt: Option<String>,
    pub interaction_type: Option<InteractionType>,
    pub timeout_seconds: Option<u64>,
    pub timeout_behavior: Option<TimeoutBehavior>,
    pub risk_level: Option<RiskLevel>,

    // webhook
    pub webhook_url: Option<String>,

    // javascript
    pub script: Option<String>,
}

/// One node in the workflow DAG.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowStep {
    pub id: String,
    pub kind: StepKind,
    #[serde(default)]
    pub task: String,
    #[serde(default)]
    pub deps: Vec<String>,
    pub role: Option<String>,
    pub agent_ref: Option<String>,
    pub session_ref: Option<String>,
    #[serde(default, flatten)]
    pub config: StepConfig,
    #[serde(default)]
    pub retry: Option<RetryConfig>,
}

impl WorkflowStep {
    /// Validates the invariants from §3 that are local to a single step
    /// (agent/mock binding, human-step field presence, parallel non-empty).
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(OrchestratorError::Validation("step id must not be empty".into()));
        }
        match self.kind {
            StepKind::Agent | StepKind::Mock => {
                if self.role.is_none() && self.agent_ref.is_none() {
                    return Err(OrchestratorError::Validation(format!(
                        "step '{}': agent/mock steps require role or agentRef",
                        self.id
                    )));
                }
            }
            StepKind::Conditional => {
                if self.config.condition.is_none() {
                    return Err(OrchestratorError::Validation(format!(
                        "step '{}': conditional steps require a condition",
                        self.id
                    )));
                }
                if self.config.true_branch.is_none() && self.config.false_branch.is_none() {
                    return Err(OrchestratorError::Validation(format!(
                        "step '{}': conditional step has neither trueBranch nor falseBranch",
                        self.id
                    )));
                }
            }
            StepKind::Loop => {
                let cfg = self.config.loop_config.as_ref().ok_or_else(|| {
                    OrchestratorError::Validation(format!(
                        "step '{}': loop steps require items/loopVar",
                        self.id
                    ))
                })?;
                if let Some(max) = cfg.max_iterations {
                    if max > cfg.items.len() {
                        return Err(OrchestratorError::Validation(format!(
                            "step '{}': maxIterations exceeds item count",
                            self.id
                        )));
                    }
                }
            }
            StepKind::Parallel => {
                let steps = self.config.parallel_steps.as_ref().ok_or_else(|| {
                    OrchestratorError::Validation(format!(
                        "step '{}': parallel steps require parallelSteps",
                        self.id
                    ))
                })?;
                if steps.is_empty() {
                    return Err(OrchestratorError::Validation(format!(
                        "step '{}': parallelSteps must be non-empty",
                        self.id
                    )));
                }
            }
            StepKind::Human => {
                if self.config.prompt.is_none() {
                    return Err(OrchestratorError::Validation(format!(
                        "step '{}': human steps require a prompt",
                        self.id
                    )));
                }
                let timeout = self.config.timeout_seconds.ok_or_else(|| {
                    OrchestratorError::Validation(format!(
                        "step '{}': human steps require timeoutSeconds",
                        self.id
                    ))
                })?;
                if timeout == 0 {
                    return Err(OrchestratorError::Validation(format!(
                        "step '{}': timeoutSeconds must be > 0",
                        self.id
                    )));
                }
            }
            StepKind::Webhook => {
                let url = self.config.webhook_url.as_ref().ok_or_else(|| {
                    OrchestratorError::Validation(format!(
                        "step '{}': webhook steps require webhookUrl",
                        self.id
                    ))
                })?;
                if !(url.starts_with("http://") || url.starts_with("https://")) {
                    return Err(OrchestratorError::Validation(format!(
                        "step '{}': webhookUrl must be http(s)",
                        self.id
                    )));
                }
            }
            StepKind::Javascript => {
                if self.config.script.is_none() {
                    return Err(OrchestratorError::Validation(format!(
                        "step '{}': javascript steps require a script",
                        self.id
                    )));
                }
            }
        }

        // Every referenced stepId in a conditional condition must be a dep.
        if let Some(cond) = &self.config.condition {
            let deps: HashSet<&str> = self.deps.iter().map(|s| s.as_str()).collect();
            for referenced in cond.referenced_step_ids() {
                if !deps.contains(referenced.as_str()) {
                    return Err(OrchestratorError::Validation(format!(
                        "step '{}': condition references '{}' which is not a dependency",
                        self.id, referenced
                    )));
                }
            }
        }

        Ok(())
    }
}

/// Assigns missing step ids (`step-<index>`), per the Orchestrator's
/// normalization step (§4.8.1).
pub fn normalize_steps(mut steps: Vec<WorkflowStep>) -> Vec<WorkflowStep> {
    for (i, step) in steps.iter_mut().enumerate() {
        if step.id.trim().is_empty() {
            step.id = format!("step-{i}");
        }
    }
    steps
}

/// Validates a full step list: per-step invariants, unique ids, and that
/// every `deps` entry names a real step.
pub fn validate_steps(steps: &[WorkflowStep]) -> Result<()> {
    let mut seen = HashSet::new();
    for step in steps {
        step.validate()?;
        if !seen.insert(step.id.clone()) {
            return Err(OrchestratorError::Validation(format!(
                "duplicate step id '{}'",
                step.id
            )));
        }
    }
    let ids: HashSet<&str> = steps.iter().map(|s| s.id.as_str()).collect();
    for step in steps {
        for dep in &step.deps {
            if !ids.contains(dep.as_str()) {
                return Err(OrchestratorError::Validation(format!(
                    "step '{}' depends on unknown step '{}'",
                    step.id, dep
                )));
            }
        }
        if let Some(tb) = &step.config.true_branch {
            if tb != "end" && !ids.contains(tb.as_str()) {
                return Err(OrchestratorError::Validation(format!(
                    "step '{}': trueBranch references unknown step '{}'",
                    step.id, tb
                )));
            }
        }
        if let Some(fb) = &step.config.false_branch {
            if fb != "end" && !ids.contains(fb.as_str()) {
                return Err(OrchestratorError::Validation(format!(
                    "step '{}': falseBranch references unknown step '{}'",
                    step.id, fb
                )));
            }
        }
        if let Some(parallel) = &step.config.parallel_steps {
            for p in parallel {
                if !ids.contains(p.as_str()) {
                    return Err(OrchestratorError::Validation(format!(
                        "step '{}': parallelSteps references unknown step '{}'",
                        step.id, p
                    )));
                }
            }
        }
    }
    Ok(())
}

/// Top-level per-run metadata accepted by `/api/invoke`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct InvokeOptions {
    pub thread_id: Option<String>,
    #[serde(default)]
    pub start_new_conversation: bool,
    pub project_id: Option<String>,
    pub saved_workflow_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseFormat {
    Json,
    Text,
}

impl Default for ResponseFormat {
    fn default() -> Self {
        ResponseFormat::Json
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvokeRequest {
    pub workflow: Vec<WorkflowStep>,
    #[serde(flatten)]
    pub options: InvokeOptions,
    #[serde(default)]
    pub format: ResponseFormat,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agent_step(id: &str, deps: &[&str]) -> WorkflowStep {
        WorkflowStep {
            id: id.to_string(),
            kind: StepKind::Agent,
            task: "do work".to_string(),
            deps: deps.iter().map(|s| s.to_string()).collect(),
            role: Some("dev".to_string()),
            agent_ref: None,
            session_ref: None,
            config: StepConfig::default(),
            retry: None,
        }
    }

    #[test]
    fn agent_step_requires_role_or_agent_ref() {
        let mut step = agent_step("s1", &[]);
        step.role = None;
        assert!(step.validate().is_err());
    }

    #[test]
    fn parallel_requires_nonempty_steps() {
        let mut step = agent_step("p1", &[]);
        step.kind = StepKind::Parallel;
        step.config.parallel_steps = Some(vec![]);
        assert!(step.validate().is_err());
    }

    #[test]
    fn human_requires_positive_timeout() {
        let mut step = agent_step("h1", &[]);
        step.kind = StepKind::Human;
        step.config.prompt = Some("approve?".to_string());
        step.config.timeout_seconds = Some(0);
        assert!(step.validate().is_err());
    }

    #[test]
    fn conditional_requires_a_branch() {
        let mut step = agent_step("c1", &["s1"]);
        step.kind = StepKind::Conditional;
        step.config.condition = Some(Condition::Bare("{s1.output} == \"ok\"".to_string()));
        step.config.true_branch = None;
        step.config.false_branch = None;
        assert!(step.validate().is_err());
    }

    #[test]
    fn condition_must_reference_a_dependency() {
        let mut step = agent_step("c1", &[]);
        step.kind = StepKind::Conditional;
        step.config.condition = Some(Condition::Bare("{other.output} == \"ok\"".to_string()));
        step.config.true_branch = Some("end".to_string());
        assert!(step.validate().is_err());
    }

    #[test]
    fn normalize_fills_missing_ids() {
        let mut step = agent_step("", &[]);
        step.id = String::new();
        let steps = normalize_steps(vec![step]);
        assert_eq!(steps[0].id, "step-0");
    }

    #[test]
    fn validate_steps_rejects_duplicate_ids() {
        let steps = vec![agent_step("s1", &[]), agent_step("s1", &[])];
        assert!(validate_steps(&steps).is_err());
    }

    #[test]
    fn validate_steps_rejects_unknown_dep() {
        let steps = vec![agent_step("s1", &["missing"])];
        assert!(validate_steps(&steps).is_err());
    }

    #[test]
    fn deserializes_camel_case_wire_shape() {
        let json = serde_json::json!({
            "id": "c",
            "kind": "conditional",
            "deps": ["s1"],
            "condition": "{s1.output} == \"ok\"",
            "trueBranch": "ok",
            "falseBranch": "bad"
        });
        let step: WorkflowStep = serde_json::from_value(json).unwrap();
        assert_eq!(step.config.true_branch.as_deref(), Some("ok"));
        assert_eq!(step.config.false_branch.as_deref(), Some("bad"));
        assert!(step.validate().is_ok());
    }

    #[test]
    fn deserializes_loop_and_human_camel_case_fields() {
        let json = serde_json::json!({
            "id": "l1",
            "kind": "loop",
            "loop": { "items": ["a", "b"], "loopVar": "x", "maxIterations": 1 }
        });
        let step: WorkflowStep = serde_json::from_value(json).unwrap();
        let loop_cfg = step.config.loop_config.as_ref().unwrap();
        assert_eq!(loop_cfg.loop_var, "x");
        assert_eq!(loop_cfg.max_iterations, Some(1));

        let json = serde_json::json!({
            "id": "h1",
            "kind": "human",
            "prompt": "approve?",
            "interactionType": "approval",
            "timeoutSeconds": 30,
            "timeoutBehavior": "auto-approve",
            "riskLevel": "high"
        });
        let step: WorkflowStep = serde_json::from_value(json).unwrap();
        assert_eq!(step.config.interaction_type, Some(InteractionType::Approval));
        assert_eq!(step.config.timeout_seconds, Some(30));
        assert_eq!(step.config.timeout_behavior, Some(TimeoutBehavior::AutoApprove));
        assert_eq!(step.config.risk_level, Some(RiskLevel::High));
    }

    #[test]
    fn deserializes_invoke_options_camel_case() {
        let json = serde_json::json!({
            "threadId": "t1",
            "startNewConversation": true,
            "projectId": "p1",
            "savedWorkflowId": "w1"
        });
        let options: InvokeOptions = serde_json::from_value(json).unwrap();
        assert_eq!(options.thread_id.as_deref(), Some("t1"));
        assert!(options.start_new_conversation);
        assert_eq!(options.project_id.as_deref(), Some("p1"));
        assert_eq!(options.saved_workflow_id.as_deref(), Some("w1"));
    }
}
