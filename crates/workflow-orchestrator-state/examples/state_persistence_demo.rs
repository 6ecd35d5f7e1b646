// Copyright (c) 2025 LLM DevOps
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Demonstrates the durable checkpointer against a throwaway SQLite file:
//! save a running snapshot, simulate a process restart by reconnecting,
//! load it back, then tombstone it on completion.

use workflow_orchestrator_core::checkpoint::Checkpointer;
use workflow_orchestrator_core::state::{StepResult, WorkflowState, WorkflowStatus};
use workflow_orchestrator_core::workflow::WorkflowStep;
use workflow_orchestrator_state::SqlCheckpointer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let dir = tempfile::tempdir()?;
    let db_path = dir.path().join("workflows.sqlite");
    let url = format!("sqlite://{}?mode=rwc", db_path.display());

    let checkpointer = SqlCheckpointer::connect(&url).await?;

    let mut state = WorkflowState::new("demo-thread", Vec::<WorkflowStep>::new());
    state.record_result(StepResult::success("draft", "hello world", 120));
    checkpointer.save(&state).await?;
    tracing::info!(thread_id = %state.thread_id, "checkpoint saved");

    // Simulate the orchestrator process restarting: open a fresh pool
    // against the same file and resume from the last snapshot.
    drop(checkpointer);
    let resumed = SqlCheckpointer::connect(&url).await?;
    let loaded = resumed
        .load("demo-thread")
        .await?
        .expect("checkpoint survives a reconnect");
    tracing::info!(status = ?loaded.status, "checkpoint restored");

    let mut finished = loaded;
    finished.status = WorkflowStatus::Completed;
    resumed.save(&finished).await?;
    resumed.tombstone("demo-thread").await?;

    let index = resumed.index().await?;
    println!("threads in store: {}", index.len());
    for entry in &index {
        println!("  {} -> {:?}", entry.thread_id, entry.status);
    }

    Ok(())
}
