// Copyright (c) 2025 LLM DevOps
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Application state wiring the engine's services together for the HTTP
//! layer. One instance per process, handed to every handler via axum's
//! `State` extractor.

use std::sync::Arc;

use workflow_orchestrator_core::approval::ApprovalStore;
use workflow_orchestrator_core::event::EventBus;
use workflow_orchestrator_core::orchestrator::Orchestrator;
use workflow_orchestrator_core::registry::WorkflowRegistry;

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub approvals: Arc<ApprovalStore>,
    pub registry: Arc<dyn WorkflowRegistry>,
    pub events: Arc<dyn EventBus>,
}
