// Copyright (c) 2025 LLM DevOps
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Durable checkpoint persistence (§4.6) behind the core crate's
//! [`Checkpointer`](workflow_orchestrator_core::checkpoint::Checkpointer)
//! trait, backed by `sqlx::Any` so the same queries run against either
//! Postgres or SQLite depending on the connection string's scheme.
//!
//! The whole `WorkflowState` snapshot is stored as a single JSON blob per
//! thread, keyed by `thread_id`. This crate does not attempt to normalize
//! step results into relational columns: the snapshot is only ever read or
//! written as a whole, so a blob is the honest shape for it, and it avoids
//! a migration every time a field is added to `WorkflowState`.

use async_trait::async_trait;
use sqlx::any::{install_default_drivers, AnyPoolOptions};
use sqlx::{AnyPool, Row};

use workflow_orchestrator_core::checkpoint::{CheckpointIndexEntry, Checkpointer};
use workflow_orchestrator_core::error::{OrchestratorError, Result};
use workflow_orchestrator_core::state::{WorkflowState, WorkflowStatus};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// SQLx-backed [`Checkpointer`]. Construct with [`SqlCheckpointer::connect`]
/// against any URL `sqlx::Any` understands (`sqlite://`, `postgres://`).
#[derive(Clone)]
pub struct SqlCheckpointer {
    pool: AnyPool,
}

impl SqlCheckpointer {
    /// Opens (and, for SQLite, creates) the database at `url` and ensures
    /// the `workflow_state` table exists. Safe to call concurrently from
    /// multiple processes against the same Postgres database.
    pub async fn connect(url: &str) -> Result<Self> {
        install_default_drivers();
        let pool = AnyPoolOptions::new()
            .max_connections(10)
            .connect(url)
            .await
            .map_err(|err| OrchestratorError::Infrastructure(format!("connect: {err}")))?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS workflow_state (
                thread_id TEXT PRIMARY KEY,
                state_json TEXT NOT NULL,
                status TEXT NOT NULL,
                last_update TEXT NOT NULL,
                tombstoned INTEGER NOT NULL DEFAULT 0
            )",
        )
        .execute(&pool)
        .await
        .map_err(|err| OrchestratorError::Infrastructure(format!("create table: {err}")))?;

        Ok(Self { pool })
    }

    /// Wraps an already-open pool, for callers (tests, the API binary) that
    /// manage their own connection lifecycle.
    pub fn with_pool(pool: AnyPool) -> Self {
        Self { pool }
    }
}

fn status_str(status: WorkflowStatus) -> &'static str {
    match status {
        WorkflowStatus::Running => "running",
        WorkflowStatus::Completed => "completed",
        WorkflowStatus::Partial => "partial",
        WorkflowStatus::Failed => "failed",
        WorkflowStatus::Aborted => "aborted",
    }
}

fn parse_status(raw: &str) -> WorkflowStatus {
    match raw {
        "completed" => WorkflowStatus::Completed,
        "partial" => WorkflowStatus::Partial,
        "failed" => WorkflowStatus::Failed,
        "aborted" => WorkflowStatus::Aborted,
        _ => WorkflowStatus::Running,
    }
}

#[async_trait]
impl Checkpointer for SqlCheckpointer {
    async fn save(&self, state: &WorkflowState) -> Result<()> {
        let already_tombstoned: Option<(i64,)> =
            sqlx::query_as("SELECT tombstoned FROM workflow_state WHERE thread_id = ?")
                .bind(&state.thread_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|err| OrchestratorError::Infrastructure(format!("save/check: {err}")))?;
        if matches!(already_tombstoned, Some((1,))) {
            return Ok(());
        }

        let json = serde_json::to_string(state)?;
        let now = chrono::Utc::now().to_rfc3339();

        sqlx::query(
            "INSERT INTO workflow_state (thread_id, state_json, status, last_update, tombstoned)
             VALUES (?, ?, ?, ?, 0)
             ON CONFLICT(thread_id) DO UPDATE SET
                state_json = excluded.state_json,
                status = excluded.status,
                last_update = excluded.last_update",
        )
        .bind(&state.thread_id)
        .bind(json)
        .bind(status_str(state.status))
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|err| OrchestratorError::Infrastructure(format!("save: {err}")))?;

        Ok(())
    }

    async fn load(&self, thread_id: &str) -> Result<Option<WorkflowState>> {
        let row = sqlx::query("SELECT state_json FROM workflow_state WHERE thread_id = ?")
            .bind(thread_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|err| OrchestratorError::Infrastructure(format!("load: {err}")))?;

        match row {
            Some(row) => {
                let json: String = row
                    .try_get("state_json")
                    .map_err(|err| OrchestratorError::Infrastructure(format!("load: {err}")))?;
                let state: WorkflowState = serde_json::from_str(&json)?;
                Ok(Some(state))
            }
            None => Ok(None),
        }
    }

    async fn tombstone(&self, thread_id: &str) -> Result<()> {
        sqlx::query("UPDATE workflow_state SET tombstoned = 1 WHERE thread_id = ?")
            .bind(thread_id)
            .execute(&self.pool)
            .await
            .map_err(|err| OrchestratorError::Infrastructure(format!("tombstone: {err}")))?;
        Ok(())
    }

    async fn index(&self) -> Result<Vec<CheckpointIndexEntry>> {
        let rows = sqlx::query("SELECT thread_id, status, last_update FROM workflow_state")
            .fetch_all(&self.pool)
            .await
            .map_err(|err| OrchestratorError::Infrastructure(format!("index: {err}")))?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            let thread_id: String = row
                .try_get("thread_id")
                .map_err(|err| OrchestratorError::Infrastructure(format!("index: {err}")))?;
            let status: String = row
                .try_get("status")
                .map_err(|err| OrchestratorError::Infrastructure(format!("index: {err}")))?;
            let last_update: String = row
                .try_get("last_update")
                .map_err(|err| OrchestratorError::Infrastructure(format!("index: {err}")))?;
            let last_update = chrono::DateTime::parse_from_rfc3339(&last_update)
                .map(|dt| dt.with_timezone(&chrono::Utc))
                .unwrap_or_else(|_| chrono::Utc::now());
            entries.push(CheckpointIndexEntry {
                thread_id,
                status: parse_status(&status),
                last_update,
            });
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use workflow_orchestrator_core::workflow::WorkflowStep;

    async fn memory_checkpointer() -> SqlCheckpointer {
        SqlCheckpointer::connect("sqlite::memory:").await.unwrap()
    }

    fn empty_state(thread_id: &str) -> WorkflowState {
        WorkflowState::new(thread_id, Vec::<WorkflowStep>::new())
    }

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let checkpointer = memory_checkpointer().await;
        let state = empty_state("t1");
        checkpointer.save(&state).await.unwrap();
        let loaded = checkpointer.load("t1").await.unwrap().unwrap();
        assert_eq!(loaded.thread_id, state.thread_id);
        assert_eq!(loaded.status, state.status);
    }

    #[tokio::test]
    async fn load_of_unknown_thread_is_none() {
        let checkpointer = memory_checkpointer().await;
        assert!(checkpointer.load("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn save_upserts_on_repeated_calls() {
        let checkpointer = memory_checkpointer().await;
        let mut state = empty_state("t1");
        checkpointer.save(&state).await.unwrap();
        state.status = WorkflowStatus::Completed;
        checkpointer.save(&state).await.unwrap();

        let loaded = checkpointer.load("t1").await.unwrap().unwrap();
        assert_eq!(loaded.status, WorkflowStatus::Completed);

        let index = checkpointer.index().await.unwrap();
        assert_eq!(index.len(), 1);
    }

    #[tokio::test]
    async fn tombstone_freezes_the_final_snapshot() {
        let checkpointer = memory_checkpointer().await;
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
        let checkpointer = memory_checkpointer().await;
        checkpointer.save(&empty_state("t1")).await.unwrap();
        checkpointer.save(&empty_state("t2")).await.unwrap();
        let index = checkpointer.index().await.unwrap();
        assert_eq!(index.len(), 2);
    }
}
