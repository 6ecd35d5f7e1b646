// Copyright (c) 2025 LLM DevOps
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Workflow Registry & Monitor (§4.10): lifecycle metadata per thread, plus
//! the background task that recovers orphaned threads at startup and
//! sweeps heartbeat-timed-out threads on a tick.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::checkpoint::Checkpointer;
use crate::event::{EventBus, EventEnvelope};
use crate::state::WorkflowStatus;

/// Default window after which a thread with no heartbeat is considered
/// dead (§5).
pub const DEFAULT_HEARTBEAT_WINDOW: Duration = Duration::from_secs(5 * 60);
/// Default Monitor tick interval (§4.10).
pub const MONITOR_TICK_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistryStepStatus {
    Pending,
    Running,
    Success,
    Blocked,
    Failed,
    NotExecuted,
    Skipped,
    Aborted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryStepEntry {
    pub id: String,
    pub status: RegistryStepStatus,
}

/// Lifecycle metadata the Registry tracks per thread (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowRegistryEntry {
    pub thread_id: String,
    pub status: WorkflowStatus,
    pub steps: Vec<RegistryStepEntry>,
    pub session_refs: HashMap<String, String>,
    pub project_id: Option<String>,
    pub project_name: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub last_update: chrono::DateTime<chrono::Utc>,
    pub saved_workflow_id: Option<String>,
    pub invocation_summary: Option<String>,
    pub started_by: Option<String>,
}

impl WorkflowRegistryEntry {
    pub fn new(thread_id: impl Into<String>, steps: Vec<RegistryStepEntry>) -> Self {
        let now = chrono::Utc::now();
        Self {
            thread_id: thread_id.into(),
            status: WorkflowStatus::Running,
            steps,
            session_refs: HashMap::new(),
            project_id: None,
            project_name: None,
            created_at: now,
            last_update: now,
            saved_workflow_id: None,
            invocation_summary: None,
            started_by: None,
        }
    }
}

/// Filters accepted by `WorkflowRegistry::list`.
#[derive(Debug, Clone, Default)]
pub struct RegistryFilter {
    pub project_id: Option<String>,
    pub status: Option<WorkflowStatus>,
}

/// Lifecycle store the Monitor and `/api/invoke-status` endpoints share.
pub trait WorkflowRegistry: Send + Sync {
    fn upsert(&self, entry: WorkflowRegistryEntry);
    fn get(&self, thread_id: &str) -> Option<WorkflowRegistryEntry>;
    fn list(&self, filter: &RegistryFilter) -> Vec<WorkflowRegistryEntry>;
    fn update_heartbeat(&self, thread_id: &str);
    fn last_heartbeat(&self, thread_id: &str) -> Option<chrono::DateTime<chrono::Utc>>;
    fn remove(&self, thread_id: &str);
}

/// Default `DashMap`-backed registry. One hour TTL after a terminal status
/// is enforced by callers sweeping `list` results, not by this store
/// itself (§3's lifecycle note).
#[derive(Clone, Default)]
pub struct InMemoryWorkflowRegistry {
    entries: Arc<DashMap<String, WorkflowRegistryEntry>>,
    heartbeats: Arc<DashMap<String, chrono::DateTime<chrono::Utc>>>,
}

impl InMemoryWorkflowRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

impl WorkflowRegistry for InMemoryWorkflowRegistry {
    fn upsert(&self, entry: WorkflowRegistryEntry) {
        self.heartbeats.insert(entry.thread_id.clone(), chrono::Utc::now());
        self.entries.insert(entry.thread_id.clone(), entry);
    }

    fn get(&self, thread_id: &str) -> Option<WorkflowRegistryEntry> {
        self.entries.get(thread_id).map(|e| e.clone())
    }

    fn list(&self, filter: &RegistryFilter) -> Vec<WorkflowRegistryEntry> {
        self.entries
            .iter()
            .map(|e| e.clone())
            .filter(|e| filter.project_id.is_none() || e.project_id == filter.project_id)
            .filter(|e| filter.status.is_none() || Some(e.status) == filter.status)
            .collect()
    }

    fn update_heartbeat(&self, thread_id: &str) {
        self.heartbeats.insert(thread_id.to_string(), chrono::Utc::now());
    }

    fn last_heartbeat(&self, thread_id: &str) -> Option<chrono::DateTime<chrono::Utc>> {
        self.heartbeats.get(thread_id).map(|e| *e)
    }

    fn remove(&self, thread_id: &str) {
        self.entries.remove(thread_id);
        self.heartbeats.remove(thread_id);
    }
}

/// Background recovery task (§4.10). On construction, callers should invoke
/// [`Monitor::recover_orphans`] once before spawning [`Monitor::run`].
pub struct Monitor {
    registry: Arc<dyn WorkflowRegistry>,
    checkpointer: Arc<dyn Checkpointer>,
    event_bus: Arc<dyn EventBus>,
    heartbeat_window: Duration,
    tick_interval: Duration,
}

impl Monitor {
    pub fn new(
        registry: Arc<dyn WorkflowRegistry>,
        checkpointer: Arc<dyn Checkpointer>,
        event_bus: Arc<dyn EventBus>,
    ) -> Self {
        Self {
            registry,
            checkpointer,
            event_bus,
            heartbeat_window: DEFAULT_HEARTBEAT_WINDOW,
            tick_interval: MONITOR_TICK_INTERVAL,
        }
    }

    pub fn with_heartbeat_window(mut self, window: Duration) -> Self {
        self.heartbeat_window = window;
        self
    }

    /// Startup recovery (§4.10, §8 scenario 6): every Registry entry still
    /// `running` is an orphan of a previous process. Its still-`running`
    /// steps are marked `failed` with a fixed error, the thread is marked
    /// `aborted`, and a `workflow_failed`-shaped status event is emitted
    /// carrying `lastStep` for resume UX (§7).
    pub async fn recover_orphans(&self) {
        for mut entry in self.registry.list(&RegistryFilter::default()) {
            if entry.status != WorkflowStatus::Running {
                continue;
            }
            let mut last_step = None;
            for step in entry.steps.iter_mut() {
                if step.status == RegistryStepStatus::Running || step.status == RegistryStepStatus::Pending {
                    step.status = RegistryStepStatus::Failed;
                    last_step = Some(step.id.clone());
                }
            }
            entry.status = WorkflowStatus::Aborted;
            entry.last_update = chrono::Utc::now();
            self.registry.upsert(entry.clone());

            if let Ok(Some(mut state)) = self.checkpointer.load(&entry.thread_id).await {
                state.status = WorkflowStatus::Aborted;
                let _ = self.checkpointer.save(&state).await;
                let _ = self.checkpointer.tombstone(&entry.thread_id).await;
            }

            self.event_bus
                .publish(
                    &entry.thread_id,
                    EventEnvelope::workflow_status(&entry.thread_id, "aborted", last_step.as_deref()),
                )
                .await;
            tracing::warn!(thread_id = %entry.thread_id, "recovered orphaned workflow after restart");
        }
    }

    /// Periodic sweep (§4.10): threads with no heartbeat within the window
    /// are marked `aborted`.
    pub async fn sweep_once(&self) {
        let now = chrono::Utc::now();
        for entry in self.registry.list(&RegistryFilter::default()) {
            if entry.status != WorkflowStatus::Running {
                continue;
            }
            let Some(last_beat) = self.registry.last_heartbeat(&entry.thread_id) else {
                continue;
            };
            let elapsed = now.signed_duration_since(last_beat);
            if elapsed.to_std().unwrap_or_default() > self.heartbeat_window {
                let mut updated = entry.clone();
                updated.status = WorkflowStatus::Aborted;
                updated.last_update = now;
                self.registry.upsert(updated);
                self.event_bus
                    .publish(&entry.thread_id, EventEnvelope::workflow_abort(&entry.thread_id))
                    .await;
                tracing::warn!(thread_id = %entry.thread_id, "aborted workflow with no heartbeat");
            }
        }
    }

    /// Runs the periodic tick forever; intended to be `tokio::spawn`ed once
    /// per process at startup, after `recover_orphans` has run.
    pub async fn run(self: Arc<Self>) {
        let mut interval = tokio::time::interval(self.tick_interval);
        loop {
            interval.tick().await;
            self.sweep_once().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::InMemoryCheckpointer;
    use crate::event::LocalEventBus;

    #[tokio::test]
    async fn recover_orphans_marks_running_threads_aborted() {
        let registry = Arc::new(InMemoryWorkflowRegistry::new());
        let checkpointer: Arc<dyn Checkpointer> = Arc::new(InMemoryCheckpointer::new());
        let bus: Arc<dyn EventBus> = Arc::new(LocalEventBus::new());

        let mut entry = WorkflowRegistryEntry::new(
            "t1",
            vec![
                RegistryStepEntry { id: "s1".into(), status: RegistryStepStatus::Success },
                RegistryStepEntry { id: "s2".into(), status: RegistryStepStatus::Running },
            ],
        );
        entry.status = WorkflowStatus::Running;
        registry.upsert(entry);

        let monitor = Monitor::new(registry.clone(), checkpointer, bus);
        monitor.recover_orphans().await;

        let updated = registry.get("t1").unwrap();
        assert_eq!(updated.status, WorkflowStatus::Aborted);
        assert_eq!(updated.steps[1].status, RegistryStepStatus::Failed);
        assert_eq!(updated.steps[0].status, RegistryStepStatus::Success);
    }

    #[tokio::test]
    async fn sweep_ignores_threads_with_recent_heartbeat() {
        let registry = Arc::new(InMemoryWorkflowRegistry::new());
        let checkpointer: Arc<dyn Checkpointer> = Arc::new(InMemoryCheckpointer::new());
        let bus: Arc<dyn EventBus> = Arc::new(LocalEventBus::new());

        registry.upsert(WorkflowRegistryEntry::new("t1", vec![]));
        let monitor = Monitor::new(registry.clone(), checkpointer, bus).with_heartbeat_window(Duration::from_secs(300));
        monitor.sweep_once().await;

        assert_eq!(registry.get("t1").unwrap().status, WorkflowStatus::Running);
    }

    #[tokio::test]
    async fn sweep_aborts_stale_heartbeats() {
        let registry = Arc::new(InMemoryWorkflowRegistry::new());
        let checkpointer: Arc<dyn Checkpointer> = Arc::new(InMemoryCheckpointer::new());
        let bus: Arc<dyn EventBus> = Arc::new(LocalEventBus::new());

        registry.upsert(WorkflowRegistryEntry::new("t1", vec![]));
        let monitor = Monitor::new(registry.clone(), checkpointer, bus).with_heartbeat_window(Duration::from_millis(0));
        tokio::time::sleep(Duration::from_millis(5)).await;
        monitor.sweep_once().await;

        assert_eq!(registry.get("t1").unwrap().status, WorkflowStatus::Aborted);
    }
}
