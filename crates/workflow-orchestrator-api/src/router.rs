// Copyright (c) 2025 LLM DevOps
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Axum router wiring every endpoint in §6's table plus the reviewer
//! routes `/api/approvals` needs beyond `decide`/`assign`.

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    let api_routes = Router::new()
        .route("/invoke", post(handlers::invoke::invoke))
        .route("/invoke/async", post(handlers::invoke::invoke_async))
        .route("/invoke/:threadId/abort", post(handlers::invoke::abort))
        .route("/invoke/stream/:threadId", get(handlers::stream::stream_thread))
        .route("/invoke-status/events", get(handlers::stream::stream_global))
        .route(
            "/invoke-status/status/:threadId",
            get(handlers::status::get_status).post(handlers::status::compute_status),
        )
        .route("/workflow-graph/:threadId", get(handlers::graph::get_graph))
        .route("/approvals", get(handlers::approvals::list))
        .route("/approvals/:id", get(handlers::approvals::get))
        .route("/approvals/:id/decide", post(handlers::approvals::decide))
        .route("/approvals/:id/assign", post(handlers::approvals::assign));

    Router::new()
        .nest("/api", api_routes)
        .route("/health", get(health_check))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
