// Copyright (c) 2025 LLM DevOps
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `GET /api/invoke/stream/:threadId` and `GET /api/invoke-status/events`:
//! the SSE adapters over [`EventBus`] (§4.9, §6). Framing is `event:
//! <name>\ndata: <json>\n\n`; the first frame on every connection is
//! `connected`; a `:heartbeat\n\n` comment keeps idle connections alive.

use std::convert::Infallible;

use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use futures::stream::{self, Stream, StreamExt};
use tokio::sync::broadcast;

use workflow_orchestrator_core::error::OrchestratorError;
use workflow_orchestrator_core::event::{EventEnvelope, HEARTBEAT_INTERVAL};

use crate::error::ApiError;
use crate::state::AppState;

fn to_sse_event(envelope: &EventEnvelope) -> Event {
    Event::default()
        .event(envelope.event.clone())
        .data(envelope.data.to_string())
}

/// Prepends the `connected` frame, then forwards the bus indefinitely. A
/// lagged receiver (slow client) logs and keeps going rather than ending
/// the stream -- best-effort delivery is the documented contract (§1/§4.9).
fn fan_out(rx: broadcast::Receiver<EventEnvelope>) -> impl Stream<Item = Result<Event, Infallible>> {
    let connected = stream::once(async { Ok(Event::default().event("connected").data("{}")) });
    let forwarded = stream::unfold(rx, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(envelope) => return Some((Ok(to_sse_event(&envelope)), rx)),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(skipped = n, "SSE subscriber lagged, skipping events");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    });
    connected.chain(forwarded)
}

fn sse_response(rx: broadcast::Receiver<EventEnvelope>) -> Response {
    Sse::new(fan_out(rx))
        .keep_alive(KeepAlive::new().interval(HEARTBEAT_INTERVAL).text("heartbeat"))
        .into_response()
}

/// `GET /api/invoke/stream/:threadId`
pub async fn stream_thread(State(state): State<AppState>, Path(thread_id): Path<String>) -> Response {
    if state.registry.get(&thread_id).is_none() {
        return ApiError::from(OrchestratorError::NotFound(format!("thread '{thread_id}'"))).into_response();
    }
    sse_response(state.events.subscribe_thread(&thread_id))
}

/// `GET /api/invoke-status/events`
pub async fn stream_global(State(state): State<AppState>) -> Response {
    sse_response(state.events.subscribe_global())
}
