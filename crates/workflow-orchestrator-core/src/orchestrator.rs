// Copyright (c) 2025 LLM DevOps
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Scheduler (§4.8): drives one thread's `WorkflowGraph` to completion.
//!
//! The frontier is the set of steps whose dependencies are all accounted
//! for (success, failure, blocked, not-executed, or skipped) and that have
//! not themselves run yet. Frontier steps spawn concurrently; conditional
//! steps never enter the frontier as executable nodes (§4.7) -- they are
//! evaluated inline the moment their dependency completes, and route
//! exactly one of `trueBranch`/`falseBranch` into the `activated` set that
//! gates readiness for the branch targets.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::approval::ApprovalStore;
use crate::checkpoint::Checkpointer;
use crate::context::ExecutionContext;
use crate::dag::WorkflowGraph;
use crate::error::{OrchestratorError, Result};
use crate::event::{EventBus, EventEnvelope};
use crate::executor::{
    AgentExecutor, ChildRunner, ExecutorRegistry, HumanExecutor, JavaScriptExecutor, LoopExecutor, MockExecutor,
    ParallelExecutor, WebhookExecutor,
};
use crate::providers::AgentClient;
use crate::registry::{RegistryStepEntry, RegistryStepStatus, WorkflowRegistry, WorkflowRegistryEntry};
use crate::state::{StepResult, WorkflowState, WorkflowStatus};
use crate::status::StepStatus;
use crate::workflow::{
    normalize_steps, validate_steps, InvokeOptions, InvokeRequest, ResponseFormat, StepKind, WorkflowStep,
};

/// `/api/invoke` response shape (§6).
#[derive(Debug, Clone, serde::Serialize)]
pub struct InvokeResponse {
    pub thread_id: String,
    pub status: WorkflowStatus,
    pub session_ids: HashMap<String, String>,
    pub results: HashMap<String, String>,
    pub summary: Option<String>,
}

fn new_thread_id() -> String {
    format!("thread-{}", Uuid::new_v4())
}

fn registry_status_for(status: StepStatus) -> RegistryStepStatus {
    match status {
        StepStatus::Success => RegistryStepStatus::Success,
        StepStatus::Blocked => RegistryStepStatus::Blocked,
        StepStatus::Failed => RegistryStepStatus::Failed,
        StepStatus::NotExecuted => RegistryStepStatus::NotExecuted,
        StepStatus::Skipped => RegistryStepStatus::Skipped,
        StepStatus::Aborted => RegistryStepStatus::Aborted,
    }
}

/// One live run's scheduling state, kept separately from `Orchestrator` so
/// `parallelSteps` children dispatched back in through `ChildRunner` can
/// find the graph and context they belong to without threading them
/// through the executor trait object.
struct ActiveRun {
    graph: Arc<WorkflowGraph>,
    ctx: ExecutionContext,
}

/// Drives workflows to completion. Owns no per-run state directly; each
/// `invoke`/`invoke_async` call registers an `ActiveRun` for the duration
/// of the drive loop and a `CancellationToken` for `abort` to signal.
pub struct Orchestrator {
    executors: ExecutorRegistry,
    checkpointer: Arc<dyn Checkpointer>,
    events: Arc<dyn EventBus>,
    registry: Arc<dyn WorkflowRegistry>,
    controllers: DashMap<String, CancellationToken>,
    active_runs: DashMap<String, ActiveRun>,
}

impl Orchestrator {
    pub fn new(
        executors: ExecutorRegistry,
        checkpointer: Arc<dyn Checkpointer>,
        events: Arc<dyn EventBus>,
        registry: Arc<dyn WorkflowRegistry>,
    ) -> Arc<Self> {
        Arc::new(Self {
            executors,
            checkpointer,
            events,
            registry,
            controllers: DashMap::new(),
            active_runs: DashMap::new(),
        })
    }

    /// Assembles the stock `ExecutorRegistry` (one executor per `StepKind`)
    /// and wires the `ParallelExecutor`'s `ChildRunner` back to the
    /// Scheduler via a `Weak` handle, avoiding an `Arc` cycle.
    pub fn bootstrap(
        agent_client: Arc<dyn AgentClient>,
        status_client: Arc<dyn AgentClient>,
        approvals: Arc<ApprovalStore>,
        checkpointer: Arc<dyn Checkpointer>,
        events: Arc<dyn EventBus>,
        registry: Arc<dyn WorkflowRegistry>,
    ) -> Arc<Self> {
        let parallel = Arc::new(ParallelExecutor::new());

        let mut executors = ExecutorRegistry::new();
        executors.register(Arc::new(AgentExecutor::new(agent_client.clone(), status_client)));
        executors.register(Arc::new(MockExecutor::new()));
        executors.register(Arc::new(LoopExecutor::new(agent_client)));
        executors.register(parallel.clone());
        executors.register(Arc::new(HumanExecutor::new(approvals, events.clone())));
        executors.register(Arc::new(JavaScriptExecutor::new()));
        executors.register(Arc::new(WebhookExecutor::new()));

        let orchestrator = Self::new(executors, checkpointer, events, registry);
        parallel.wire(Arc::downgrade(&orchestrator) as std::sync::Weak<dyn ChildRunner>);
        orchestrator
    }

    /// Runs the workflow to completion and returns the final response. The
    /// caller is expected to have already resolved `request.workflow` into
    /// whatever `agentRef`/role bindings it needs; the Scheduler only knows
    /// about compiled `WorkflowStep`s. Takes `Arc<Self>` by value (clone the
    /// handle before calling) since the drive loop spawns tasks that must
    /// outlive the call.
    pub async fn invoke(self: Arc<Self>, request: InvokeRequest) -> Result<InvokeResponse> {
        let (thread_id, state) = self.prepare_run(request.workflow, &request.options).await?;
        let format = request.format;
        let final_state = self.clone().run_thread(thread_id, state).await?;
        Ok(self.to_response(final_state, format))
    }

    /// Starts the run in the background and returns immediately with the
    /// thread id the caller should poll/subscribe on (§6 `/invoke/async`).
    pub async fn invoke_async(self: Arc<Self>, request: InvokeRequest) -> Result<String> {
        let (thread_id, state) = self.prepare_run(request.workflow, &request.options).await?;
        let orchestrator = self.clone();
        let tid = thread_id.clone();
        tokio::spawn(async move {
            if let Err(err) = orchestrator.run_thread(tid.clone(), state).await {
                tracing::error!(thread_id = %tid, error = %err, "background workflow run failed");
            }
        });
        Ok(thread_id)
    }

    /// Exposes the Checkpointer for read-only views (the `/api/workflow-graph`
    /// handler rebuilds a completed thread's graph from its last snapshot,
    /// since `active_runs` only holds in-flight ones).
    pub fn checkpointer(&self) -> Arc<dyn Checkpointer> {
        self.checkpointer.clone()
    }

    /// Idempotent abort: flips the thread's cancellation token, publishes a
    /// `workflow_abort` event on the Event Bus, and lets the drive loop
    /// unwind cooperatively (§4.8.6). A repeat call while the thread is
    /// still registered is idempotent -- cancelling an already-cancelled
    /// token is a no-op and a second `workflow_abort` event is harmless for
    /// the bus's at-least-once contract. Aborting a `threadId` the
    /// orchestrator has never seen (or has already finished and dropped
    /// from the controller map) is a `NotFound` error, not a no-op.
    pub async fn abort(&self, thread_id: &str) -> Result<()> {
        match self.controllers.get(thread_id) {
            Some(token) => {
                token.cancel();
                self.events.publish(thread_id, EventEnvelope::workflow_abort(thread_id)).await;
                Ok(())
            }
            None => Err(OrchestratorError::NotFound(format!("no running thread '{thread_id}'"))),
        }
    }

    async fn prepare_run(
        &self,
        steps: Vec<WorkflowStep>,
        options: &InvokeOptions,
    ) -> Result<(String, WorkflowState)> {
        let steps = normalize_steps(steps);
        validate_steps(&steps)?;

        let (thread_id, mut state) = match (&options.thread_id, options.start_new_conversation) {
            // A resumed sessionRef wins over startNewConversation when both
            // are present (decision recorded in SPEC_FULL.md's Open Questions).
            (Some(tid), _) => match self.checkpointer.load(tid).await? {
                Some(existing) => (tid.clone(), existing),
                None => (tid.clone(), WorkflowState::new(tid.clone(), steps)),
            },
            (None, _) => {
                let tid = new_thread_id();
                (tid.clone(), WorkflowState::new(tid, steps))
            }
        };
        state.project_id = options.project_id.clone().or(state.project_id.take());
        state.start_new_conversation = options.start_new_conversation;
        state.status = WorkflowStatus::Running;

        self.checkpointer.save(&state).await?;
        self.registry.upsert(WorkflowRegistryEntry::new(
            thread_id.clone(),
            state
                .steps
                .iter()
                .map(|s| RegistryStepEntry {
                    id: s.id.clone(),
                    status: RegistryStepStatus::Pending,
                })
                .collect(),
        ));
        self.events
            .publish(
                &thread_id,
                EventEnvelope::workflow_created(&thread_id, options.project_id.as_deref()),
            )
            .await;

        Ok((thread_id, state))
    }

    /// The drive loop itself. Builds a fresh `WorkflowGraph` from the
    /// checkpointed steps, registers the run, and spawns ready steps until
    /// the frontier and every in-flight task have drained.
    async fn run_thread(self: &Arc<Self>, thread_id: String, state: WorkflowState) -> Result<WorkflowState> {
        let graph = Arc::new(WorkflowGraph::build(state.steps.clone())?);
        let cancel = CancellationToken::new();
        self.controllers.insert(thread_id.clone(), cancel.clone());
        let ctx = ExecutionContext::with_cancellation(state, cancel.clone());
        self.active_runs.insert(
            thread_id.clone(),
            ActiveRun {
                graph: graph.clone(),
                ctx: ctx.clone(),
            },
        );

        let conditional_ids: HashSet<&str> = graph
            .all_step_ids()
            .filter(|&id| graph.step(id).map(|s| s.kind == StepKind::Conditional).unwrap_or(false))
            .collect();
        let conditional_targets: HashSet<String> = conditional_ids
            .iter()
            .filter_map(|&id| graph.step(id))
            .flat_map(|s| {
                [s.config.true_branch.clone(), s.config.false_branch.clone()]
                    .into_iter()
                    .flatten()
            })
            .filter(|t| t != "end")
            .collect();
        let parallel_children: HashSet<String> = graph
            .all_step_ids()
            .filter_map(|id| graph.step(id))
            .filter(|s| s.kind == StepKind::Parallel)
            .filter_map(|s| s.config.parallel_steps.clone())
            .flatten()
            .collect();

        // `accounted` gates readiness the same way `dag::ready_steps` does:
        // a step's deps are satisfied once every dep is in this set,
        // regardless of whether it actually produced a result (blocked /
        // not-executed / aborted steps still unblock their dependents so
        // the cascade in `on_terminal` can route them).
        let mut accounted: HashSet<String> = HashSet::new();
        let mut activated: HashSet<String> = HashSet::new();
        let mut triggered_edges: HashSet<(String, String)> = HashSet::new();
        let mut in_flight: HashSet<String> = HashSet::new();
        let mut joins: JoinSet<StepResult> = JoinSet::new();

        // Conditional steps with no deps evaluate once, up front, instead of
        // waiting on a dependency-completion event that will never come.
        for &id in &conditional_ids {
            let step = graph.step(id).expect("conditional id came from graph");
            if step.deps.is_empty() {
                self.route_conditional(&graph, step, true, &ctx, &mut activated).await;
            }
        }

        loop {
            if cancel.is_cancelled() {
                break;
            }

            let mut ready: Vec<&WorkflowStep> = graph
                .ready_steps(&accounted, &accounted)
                .into_iter()
                .filter(|s| s.kind != StepKind::Conditional)
                .filter(|s| !parallel_children.contains(&s.id))
                .filter(|s| !in_flight.contains(&s.id))
                .filter(|s| !conditional_targets.contains(&s.id) || activated.contains(&s.id))
                .collect();
            // §5 determinism: `(dependencyDepth, stepId)`.
            ready.sort_by(|a, b| graph.depth(&a.id).cmp(&graph.depth(&b.id)).then(a.id.cmp(&b.id)));

            if ready.is_empty() && in_flight.is_empty() {
                break;
            }

            for step in ready {
                in_flight.insert(step.id.clone());
                let step = step.clone();
                let orchestrator = self.clone();
                let ctx = ctx.clone();
                let thread_id = thread_id.clone();
                joins.spawn(async move { orchestrator.execute_one(&thread_id, &step, &ctx).await });
            }

            let Some(joined) = joins.join_next().await else {
                break;
            };
            let result = match joined {
                Ok(result) => result,
                Err(join_err) => {
                    tracing::error!(thread_id = %thread_id, error = %join_err, "step task panicked");
                    continue;
                }
            };

            in_flight.remove(&result.id);
            accounted.insert(result.id.clone());
            self.on_terminal(&graph, &thread_id, &result, &ctx, &mut activated, &mut triggered_edges, &mut accounted)
                .await;
        }

        // Cooperative cancellation: let in-flight tasks settle before
        // tearing down instead of orphaning their sessions.
        while let Some(joined) = joins.join_next().await {
            if let Ok(result) = joined {
                in_flight.remove(&result.id);
                accounted.insert(result.id.clone());
                ctx.record_result(result).await;
            }
        }

        self.active_runs.remove(&thread_id);
        self.controllers.remove(&thread_id);

        let mut final_state = ctx.snapshot().await;
        final_state.status = final_state.compute_final_status();
        self.checkpointer.save(&final_state).await?;
        self.checkpointer.tombstone(&thread_id).await?;

        if let Some(mut entry) = self.registry.get(&thread_id) {
            entry.status = final_state.status;
            entry.session_refs = final_state.session_refs.clone();
            entry.last_update = chrono::Utc::now();
            for step_entry in entry.steps.iter_mut() {
                if let Some(result) = final_state.step_results.get(&step_entry.id) {
                    step_entry.status = registry_status_for(result.status);
                }
            }
            self.registry.upsert(entry);
        }

        let status_str = match final_state.status {
            WorkflowStatus::Running => "running",
            WorkflowStatus::Completed => "completed",
            WorkflowStatus::Partial => "partial",
            WorkflowStatus::Failed => "failed",
            WorkflowStatus::Aborted => "aborted",
        };
        self.events
            .publish(&thread_id, EventEnvelope::workflow_status(&thread_id, status_str, None))
            .await;

        Ok(final_state)
    }

    /// Runs one step: emits `step_start`, dispatches through the registry,
    /// records the result, checkpoints, emits `step_complete`/`step_failed`,
    /// and refreshes the registry heartbeat.
    async fn execute_one(self: &Arc<Self>, thread_id: &str, step: &WorkflowStep, ctx: &ExecutionContext) -> StepResult {
        // At-most-once: a step already terminal (e.g. cascaded before its
        // own task was polled off the frontier) is never re-run.
        if let Some(existing) = ctx.get_result(&step.id).await {
            return existing;
        }

        self.events.publish(thread_id, EventEnvelope::step_start(thread_id, &step.id)).await;
        self.registry.update_heartbeat(thread_id);

        let result = self.executors.execute(step, ctx).await;

        ctx.record_result(result.clone()).await;
        let snapshot = ctx.snapshot().await;
        let _ = self.checkpointer.save(&snapshot).await;
        self.registry.update_heartbeat(thread_id);

        let status_str = format!("{:?}", result.status).to_lowercase();
        let event = if result.status == StepStatus::Success {
            EventEnvelope::step_complete(thread_id, &step.id, &status_str, result.session_ref.as_deref())
        } else {
            EventEnvelope::step_failed(thread_id, &step.id, &status_str, result.session_ref.as_deref())
        };
        self.events.publish(thread_id, event).await;

        if let Some(run) = self.active_runs.get(thread_id) {
            let graph_view = crate::graph::generate(&run.graph, &snapshot, false);
            if let Ok(graph_json) = serde_json::to_value(&graph_view) {
                self.events
                    .publish(thread_id, EventEnvelope::graph_update(thread_id, graph_json))
                    .await;
            }
        }

        result
    }

    /// Reacts to a step's terminal result: on success, triggers any
    /// conditional step gated on it; on anything else, cascades
    /// `not_executed` (or a forced false-branch route, for conditional
    /// dependents) down the dependency chain (§4.8.3, §4.8.4).
    async fn on_terminal(
        self: &Arc<Self>,
        graph: &WorkflowGraph,
        thread_id: &str,
        result: &StepResult,
        ctx: &ExecutionContext,
        activated: &mut HashSet<String>,
        triggered_edges: &mut HashSet<(String, String)>,
        accounted: &mut HashSet<String>,
    ) {
        let success = result.status == StepStatus::Success;
        for dependent_id in graph.direct_dependents(&result.id) {
            let Some(dependent) = graph.step(dependent_id) else {
                continue;
            };
            if dependent.kind == StepKind::Conditional {
                let edge = (dependent.id.clone(), result.id.clone());
                if triggered_edges.contains(&edge) {
                    continue;
                }
                triggered_edges.insert(edge);
                self.route_conditional(graph, dependent, success, ctx, activated).await;
                continue;
            }
            if success || accounted.contains(dependent_id) {
                continue;
            }
            let cascaded = StepResult::not_executed(
                dependent.id.clone(),
                format!("blocked: dependency '{}' did not complete successfully", result.id),
            );
            self.events
                .publish(thread_id, EventEnvelope::step_failed(thread_id, &dependent.id, "not_executed", None))
                .await;
            ctx.record_result(cascaded.clone()).await;
            accounted.insert(dependent.id.clone());
            // Recurse synchronously: a cascaded `not_executed` can itself
            // unblock further dependents or gate a downstream conditional.
            Box::pin(self.on_terminal(graph, thread_id, &cascaded, ctx, activated, triggered_edges, accounted)).await;
        }
    }

    /// Evaluates a conditional step's `condition` (or forces the false
    /// branch when `dep_succeeded` is false, since a failed dependency's
    /// output is unreliable to evaluate against) and activates the chosen
    /// branch target.
    async fn route_conditional(
        self: &Arc<Self>,
        graph: &WorkflowGraph,
        step: &WorkflowStep,
        dep_succeeded: bool,
        ctx: &ExecutionContext,
        activated: &mut HashSet<String>,
    ) {
        let taken = if !dep_succeeded {
            false
        } else {
            match &step.config.condition {
                Some(condition) => ctx.evaluate_condition(condition).await,
                None => false,
            }
        };
        let target = if taken {
            step.config.true_branch.as_deref()
        } else {
            step.config.false_branch.as_deref()
        };
        if let Some(target) = target {
            if target != "end" && graph.step(target).is_some() {
                activated.insert(target.to_string());
            }
        }
    }

    fn to_response(&self, state: WorkflowState, format: ResponseFormat) -> InvokeResponse {
        let results: HashMap<String, String> = state
            .step_results
            .iter()
            .map(|(id, r)| (id.clone(), r.response.clone()))
            .collect();
        let summary = match format {
            ResponseFormat::Text => {
                let total = state.steps.len();
                let successful = state
                    .step_results
                    .values()
                    .filter(|r| r.status == StepStatus::Success)
                    .count();
                Some(format!(
                    "workflow {} finished {:?}: {}/{} steps succeeded",
                    state.thread_id, state.status, successful, total
                ))
            }
            ResponseFormat::Json => None,
        };
        InvokeResponse {
            thread_id: state.thread_id,
            status: state.status,
            session_ids: state.session_refs,
            results,
            summary,
        }
    }
}

#[async_trait]
impl ChildRunner for Orchestrator {
    /// Wired into `ParallelExecutor` after construction. Looks up the
    /// child's own `WorkflowGraph`/`ExecutionContext` by thread id rather
    /// than threading them through the `StepExecutor` trait, since a
    /// `ParallelExecutor` instance is shared across every concurrently
    /// running thread.
    async fn run_child(&self, thread_id: &str, step_id: &str) -> StepResult {
        let Some(run) = self.active_runs.get(thread_id) else {
            return StepResult::failed(step_id, "no active run for thread", 0);
        };
        if let Some(existing) = run.ctx.get_result(step_id).await {
            return existing;
        }
        let Some(step) = run.graph.step(step_id).cloned() else {
            return StepResult::failed(step_id, format!("unknown parallel child '{step_id}'"), 0);
        };
        let graph = run.graph.clone();
        let ctx = run.ctx.clone();
        drop(run);
        self.events.publish(thread_id, EventEnvelope::step_start(thread_id, step_id)).await;
        let result = self.executors.execute(&step, &ctx).await;
        ctx.record_result(result.clone()).await;
        let snapshot_state = ctx.snapshot().await;
        let _ = self.checkpointer.save(&snapshot_state).await;
        let status_str = format!("{:?}", result.status).to_lowercase();
        let event = if result.status == StepStatus::Success {
            EventEnvelope::step_complete(thread_id, step_id, &status_str, result.session_ref.as_deref())
        } else {
            EventEnvelope::step_failed(thread_id, step_id, &status_str, result.session_ref.as_deref())
        };
        self.events.publish(thread_id, event).await;
        let _ = graph; // kept alive for the duration of the child's execution
        result
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::approval::ApprovalStore;
    use crate::checkpoint::InMemoryCheckpointer;
    use crate::event::LocalEventBus;
    use crate::providers::{AgentRequest, AgentResponse, ProviderError};
    use crate::registry::InMemoryWorkflowRegistry;
    use crate::workflow::{
        Combinator, Condition, ConditionDataType, ConditionGroup, ConditionOp, ConditionOperand, ConditionRule,
        StepConfig, StepField, StructuredCondition,
    };

    fn step(id: &str, kind: StepKind, deps: Vec<&str>, config: StepConfig) -> WorkflowStep {
        WorkflowStep {
            id: id.to_string(),
            kind,
            task: format!("{id} task"),
            deps: deps.into_iter().map(String::from).collect(),
            role: Some("dev".to_string()),
            agent_ref: None,
            session_ref: None,
            config,
            retry: None,
        }
    }

    /// An `AgentClient` whose `send` always fails, used to drive the
    /// dependency-cascade ("not_executed") path without a real provider.
    struct FailingClient;

    #[async_trait]
    impl AgentClient for FailingClient {
        async fn send(
            &self,
            _request: AgentRequest,
            _cancel: CancellationToken,
        ) -> std::result::Result<AgentResponse, ProviderError> {
            Err(ProviderError::ProviderSpecific("boom".to_string()))
        }
        fn name(&self) -> &str {
            "failing"
        }
    }

    /// An `AgentClient` that sleeps for a fixed delay before answering,
    /// observing cancellation cooperatively like a real provider must
    /// (§4.8.6). Lets tests land an `abort` call while a step is in flight.
    struct DelayedClient {
        delay: Duration,
    }

    #[async_trait]
    impl AgentClient for DelayedClient {
        async fn send(
            &self,
            _request: AgentRequest,
            cancel: CancellationToken,
        ) -> std::result::Result<AgentResponse, ProviderError> {
            tokio::select! {
                _ = tokio::time::sleep(self.delay) => Ok(AgentResponse {
                    response: "success".to_string(),
                    session_ref: Some("sess-delayed".to_string()),
                    metadata: Default::default(),
                }),
                _ = cancel.cancelled() => Err(ProviderError::Cancelled),
            }
        }
        fn name(&self) -> &str {
            "delayed"
        }
    }

    fn test_orchestrator(agent_client: Arc<dyn AgentClient>) -> Arc<Orchestrator> {
        Orchestrator::bootstrap(
            agent_client.clone(),
            agent_client,
            Arc::new(ApprovalStore::new()),
            Arc::new(InMemoryCheckpointer::new()),
            Arc::new(LocalEventBus::new()),
            Arc::new(InMemoryWorkflowRegistry::new()),
        )
    }

    fn invoke_request(steps: Vec<WorkflowStep>, thread_id: Option<&str>) -> InvokeRequest {
        InvokeRequest {
            workflow: steps,
            options: InvokeOptions {
                thread_id: thread_id.map(String::from),
                start_new_conversation: false,
                project_id: None,
                saved_workflow_id: None,
            },
            format: ResponseFormat::Json,
        }
    }

    #[tokio::test]
    async fn diamond_dependency_runs_concurrently_but_completes_ordered() {
        let orchestrator = test_orchestrator(Arc::new(FailingClient));
        let steps = vec![
            step("req", StepKind::Mock, vec![], StepConfig::default()),
            step("math", StepKind::Mock, vec!["req"], StepConfig::default()),
            step("ui", StepKind::Mock, vec!["req"], StepConfig::default()),
            step("integrate", StepKind::Mock, vec!["math", "ui"], StepConfig::default()),
        ];

        let response = orchestrator.invoke(invoke_request(steps, None)).await.unwrap();

        assert_eq!(response.status, WorkflowStatus::Completed);
        for id in ["req", "math", "ui", "integrate"] {
            assert!(response.results.contains_key(id), "missing result for '{id}'");
        }
    }

    #[tokio::test]
    async fn structured_condition_routes_exactly_one_branch() {
        let orchestrator = test_orchestrator(Arc::new(FailingClient));
        let condition = Condition::Structured(StructuredCondition {
            version: "2.0".to_string(),
            root_group: ConditionGroup {
                combinator: Combinator::And,
                rules: vec![ConditionRule {
                    left: ConditionOperand::StepField {
                        step_id: "req".to_string(),
                        field: StepField::Status,
                    },
                    op: ConditionOp::Equals,
                    right: ConditionOperand::Literal {
                        data_type: ConditionDataType::String,
                        value: serde_json::json!("success"),
                    },
                    data_type: ConditionDataType::String,
                }],
                subgroups: vec![],
            },
        });
        let mut cond_config = StepConfig::default();
        cond_config.condition = Some(condition);
        cond_config.true_branch = Some("approved".to_string());
        cond_config.false_branch = Some("rejected".to_string());

        let steps = vec![
            step("req", StepKind::Mock, vec![], StepConfig::default()),
            step("cond", StepKind::Conditional, vec!["req"], cond_config),
            step("approved", StepKind::Mock, vec![], StepConfig::default()),
            step("rejected", StepKind::Mock, vec![], StepConfig::default()),
        ];

        let response = orchestrator.invoke(invoke_request(steps, None)).await.unwrap();

        assert_eq!(response.status, WorkflowStatus::Completed);
        assert!(response.results.contains_key("approved"));
        assert!(!response.results.contains_key("rejected"));
        assert!(!response.results.contains_key("cond"), "conditional steps never execute as nodes");
    }

    #[tokio::test]
    async fn failed_dependency_cascades_not_executed() {
        let orchestrator = test_orchestrator(Arc::new(FailingClient));
        let mut a = step("a", StepKind::Agent, vec![], StepConfig::default());
        a.retry = Some(crate::workflow::RetryConfig {
            max_attempts: 1,
            backoff: crate::workflow::BackoffStrategy::Constant,
            initial_delay_ms: 0,
            max_delay_ms: 0,
        });
        let steps = vec![
            a,
            step("b", StepKind::Mock, vec!["a"], StepConfig::default()),
            step("c", StepKind::Mock, vec!["b"], StepConfig::default()),
        ];

        let response = orchestrator.invoke(invoke_request(steps, None)).await.unwrap();

        assert_eq!(response.status, WorkflowStatus::Failed);
        assert!(response.results["a"].contains("boom"));
        assert!(response.results["b"].contains("did not complete successfully"));
        assert!(response.results["c"].contains("did not complete successfully"));
    }

    #[tokio::test]
    async fn abort_preserves_session_ref_and_cascades() {
        let orchestrator = test_orchestrator(Arc::new(DelayedClient {
            delay: Duration::from_millis(30),
        }));
        let thread_id = "abort-thread";
        let steps = vec![
            step("first", StepKind::Agent, vec![], StepConfig::default()),
            step("second", StepKind::Agent, vec!["first"], StepConfig::default()),
            step("third", StepKind::Agent, vec!["second"], StepConfig::default()),
        ];

        let run_orchestrator = orchestrator.clone();
        let request = invoke_request(steps, Some(thread_id));
        let handle = tokio::spawn(async move { run_orchestrator.invoke(request).await });

        // `first` finishes around t=30ms; `second` is then in flight from
        // t=30ms to t=60ms. Land the abort in the middle of that window.
        tokio::time::sleep(Duration::from_millis(45)).await;
        orchestrator.abort(thread_id).await.expect("thread should still be running");

        let response = handle.await.unwrap().unwrap();

        assert_eq!(response.status, WorkflowStatus::Aborted);
        assert_eq!(response.session_ids.get("first").map(String::as_str), Some("sess-delayed"));
        assert!(!response.results.contains_key("third"), "step past the aborted one must not run");
    }

    #[tokio::test]
    async fn abort_on_unknown_thread_is_an_error() {
        let orchestrator = test_orchestrator(Arc::new(FailingClient));
        let err = orchestrator.abort("no-such-thread").await.unwrap_err();
        assert!(matches!(err, OrchestratorError::NotFound(_)));
    }

    #[tokio::test]
    async fn abort_publishes_workflow_abort_event() {
        let orchestrator = test_orchestrator(Arc::new(DelayedClient {
            delay: Duration::from_millis(50),
        }));
        let thread_id = "abort-event-thread";
        let steps = vec![step("first", StepKind::Agent, vec![], StepConfig::default())];

        let mut global = orchestrator.events.subscribe_global();
        let run_orchestrator = orchestrator.clone();
        let request = invoke_request(steps, Some(thread_id));
        let handle = tokio::spawn(async move { run_orchestrator.invoke(request).await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        orchestrator.abort(thread_id).await.expect("thread should still be running");

        let mut saw_abort = false;
        while let Ok(envelope) = tokio::time::timeout(Duration::from_millis(200), global.recv()).await {
            let Ok(envelope) = envelope else { break };
            if envelope.event == "workflow_abort" {
                saw_abort = true;
                break;
            }
        }
        assert!(saw_abort, "abort should publish a workflow_abort event");

        let _ = handle.await;
    }
}
