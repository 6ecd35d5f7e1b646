// Copyright (c) 2025 LLM DevOps
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Checkpointer (§4.6): persists `WorkflowState` after every transition and
//! is the sole authority for resume. `InMemoryCheckpointer` is the default,
//! process-local implementation; `workflow-orchestrator-state` supplies a
//! durable SQLx-backed one behind the `state-persistence` feature.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;

use crate::error::Result;
use crate::state::{WorkflowState, WorkflowStatus};

/// Secondary-index row the Monitor scans for orphan recovery (§4.10).
#[derive(Debug, Clone)]
pub struct CheckpointIndexEntry {
    pub thread_id: String,
    pub status: WorkflowStatus,
    pub last_update: chrono::DateTime<chrono::Utc>,
}

/// Persistence contract for `WorkflowState`. `save` MUST be atomic per
/// thread: a concurrent `load` observes either the pre- or post-transition
/// state, never a partial merge (§4.6).
#[async_trait]
pub trait Checkpointer: Send + Sync {
    async fn save(&self, state: &WorkflowState) -> Result<()>;
    async fn load(&self, thread_id: &str) -> Result<Option<WorkflowState>>;
    /// Marks a thread's final snapshot immutable. The snapshot itself is
    /// retained -- tombstoning is a write-barrier, not a delete.
    async fn tombstone(&self, thread_id: &str) -> Result<()>;
    async fn index(&self) -> Result<Vec<CheckpointIndexEntry>>;
}

/// Default in-process checkpointer. One `parking_lot::Mutex` per thread id
/// (a striping table keyed by `DashMap`) gives atomic per-thread writes
/// without serializing unrelated threads against each other.
#[derive(Clone, Default)]
pub struct InMemoryCheckpointer {
    states: Arc<DashMap<String, Arc<Mutex<WorkflowState>>>>,
    tombstoned: Arc<DashMap<String, bool>>,
}

impl InMemoryCheckpointer {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Checkpointer for InMemoryCheckpointer {
    async fn save(&self, state: &WorkflowState) -> Result<()> {
        if self.tombstoned.contains_key(&state.thread_id) {
            return Ok(());
        }
        let entry = self
            .states
            .entry(state.thread_id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(state.clone())));
        *entry.lock() = state.clone();
        Ok(())
    }

    async fn load(&self, thread_id: &str) -> Result<Option<WorkflowState>> {
        Ok(self.states.get(thread_id).map(|e| e.lock().clone()))
    }

    async fn tombstone(&self, thread_id: &str) -> Result<()> {
        self.tombstoned.insert(thread_id.to_string(), true);
        Ok(())
    }

    async fn index(&self) -> Result<Vec<CheckpointIndexEntry>> {
        Ok(self
            .states
            .iter()
            .map(|e| {
                let state = e.lock();
                CheckpointIndexEntry {
                    thread_id: state.thread_id.clone(),
                    status: state.status,
                    last_update: chrono::Utc::now(),
                }
            })
            .collect())
    }
}

/// Reference snapshot of per-thread checkpoints, used by tests that assert
/// the `load(save(state)) == state` round-trip law (§8).
pub fn snapshot_map(entries: &[(String, WorkflowState)]) -> HashMap<String, WorkflowState> {
    entries.iter().cloned().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::WorkflowStep;

    fn empty_state(thread_id: &str) -> WorkflowState {
        WorkflowState::new(thread_id, Vec::<WorkflowStep>::new())
    }

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let checkpointer = InMemoryCheckpointer::new();
        let state = empty_state("t1");
        checkpointer.save(&state).await.unwrap();
        let loaded = checkpointer.load("t1").await.unwrap().unwrap();
        assert_eq!(loaded.thread_id, state.thread_id);
        assert_eq!(loaded.status, state.status);
    }

    #[tokio::test]
    async fn load_of_unknown_thread_is_none() {
        let checkpointer = InMemoryCheckpointer::new();
        assert!(checkpointer.load("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn tombstone_freezes_the_final_snapshot() {
        let checkpointer = InMemoryCheckpointer::new();
        let mut state = empty_state("t1");
        state.status = WorkflowStatus::Completed;
        checkpointer.save(&state).await.unwrap();
        checkpointer.tombstone("t1").await.unwrap();

        let mut mutated = state.clone();
        mutated.status = WorkflowStatus::Running;
        checkpointer.save(&mutated).await.unwrap();

        let loaded = checkpointer.load("t1").await.unwrap().unwrap();
        assert_eq!(loaded.status, WorkflowStatus::Completed);
    }

    #[tokio::test]
    async fn index_reports_every_saved_thread() {
        let checkpointer = InMemoryCheckpointer::new();
        checkpointer.save(&empty_state("t1")).await.unwrap();
        checkpointer.save(&empty_state("t2")).await.unwrap();
        let index = checkpointer.index().await.unwrap();
        assert_eq!(index.len(), 2);
    }
}
