// Copyright (c) 2025 LLM DevOps
// SPDX-License-Identifier: MIT OR Apache-2.0

//! HTTP, SSE and WebSocket surface for the workflow orchestrator (§6).
//!
//! This crate is a thin transport adapter: every handler delegates to the
//! engine services in `workflow-orchestrator-core` ([`AppState`] just
//! bundles `Arc`s to them) and translates the engine's error taxonomy
//! (§7) into HTTP status codes (`error`). The binary entry point lives in
//! `workflow-orchestrator-cli`, which builds an [`AppState`] and serves
//! [`router::build_router`].

pub mod error;
pub mod handlers;
pub mod router;
pub mod state;

pub use router::build_router;
pub use state::AppState;
