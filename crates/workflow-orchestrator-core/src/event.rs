// Copyright (c) 2025 LLM DevOps
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Event Bus (§4.9): broadcasts workflow/step lifecycle events locally and,
//! behind the `redis-transport` feature, across processes. `LocalEventBus`
//! is the default single-process transport; SSE/WebSocket adapters in
//! `workflow-orchestrator-api` subscribe and re-emit.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// How often a long-lived SSE connection emits a heartbeat frame (§4.9).
pub const HEARTBEAT_INTERVAL: std::time::Duration = std::time::Duration::from_secs(30);

/// Channel depth for a thread's topic; old events are dropped for slow
/// subscribers rather than blocking the publisher (best-effort delivery
/// is the documented contract, §1/§4.9).
const CHANNEL_CAPACITY: usize = 256;

/// One event on the wire, matching the SSE framing contract in §6:
/// `event: <name>\ndata: <json>\n\n`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub event: String,
    pub data: serde_json::Value,
}

impl EventEnvelope {
    pub fn new(event: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }

    pub fn connected() -> Self {
        Self::new("connected", serde_json::json!({}))
    }

    pub fn workflow_created(thread_id: &str, project_id: Option<&str>) -> Self {
        Self::new(
            "workflow_created",
            serde_json::json!({ "type": "workflow_created", "threadId": thread_id, "projectId": project_id }),
        )
    }

    pub fn step_start(thread_id: &str, step_id: &str) -> Self {
        Self::new(
            "step_update",
            serde_json::json!({ "type": "step_start", "threadId": thread_id, "stepId": step_id, "status": "running" }),
        )
    }

    pub fn step_complete(thread_id: &str, step_id: &str, status: &str, session_id: Option<&str>) -> Self {
        Self::new(
            "step_update",
            serde_json::json!({
                "type": "step_complete",
                "threadId": thread_id,
                "stepId": step_id,
                "sessionId": session_id,
                "status": status,
            }),
        )
    }

    pub fn step_failed(thread_id: &str, step_id: &str, status: &str, session_id: Option<&str>) -> Self {
        Self::new(
            "step_update",
            serde_json::json!({
                "type": "step_failed",
                "threadId": thread_id,
                "stepId": step_id,
                "sessionId": session_id,
                "status": status,
            }),
        )
    }

    pub fn workflow_status(thread_id: &str, status: &str, last_step: Option<&str>) -> Self {
        Self::new(
            "workflow_status",
            serde_json::json!({ "type": "workflow_status", "threadId": thread_id, "status": status, "lastStep": last_step }),
        )
    }

    pub fn workflow_abort(thread_id: &str) -> Self {
        Self::new(
            "workflow_status",
            serde_json::json!({ "type": "workflow_abort", "threadId": thread_id, "status": "aborted" }),
        )
    }

    pub fn graph_update(thread_id: &str, graph: serde_json::Value) -> Self {
        Self::new(
            "graph_update",
            serde_json::json!({ "type": "graph_update", "threadId": thread_id, "graph": graph }),
        )
    }

    pub fn approval_requested(thread_id: &str, approval: serde_json::Value) -> Self {
        Self::new("approval_requested", approval.clone()).with_thread(thread_id, approval)
    }

    pub fn approval_decided(thread_id: &str, approval: serde_json::Value) -> Self {
        Self::new("approval_decided", approval.clone()).with_thread(thread_id, approval)
    }

    fn with_thread(mut self, thread_id: &str, mut data: serde_json::Value) -> Self {
        if let Some(obj) = data.as_object_mut() {
            obj.insert("threadId".to_string(), serde_json::json!(thread_id));
        }
        self.data = data;
        self
    }
}

/// Pub/sub abstraction the Scheduler and API layer share. Handlers MUST be
/// idempotent: cross-process replay during failover may deliver
/// duplicates (§4.9, at-least-once).
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Publishes to a thread's topic (`/stream/:threadId`) and to the
    /// global topic (`/events`) so both subscriber classes see it.
    async fn publish(&self, thread_id: &str, event: EventEnvelope);

    fn subscribe_thread(&self, thread_id: &str) -> broadcast::Receiver<EventEnvelope>;
    fn subscribe_global(&self) -> broadcast::Receiver<EventEnvelope>;
}

/// Single-process transport: one `tokio::sync::broadcast` channel per
/// thread topic plus one global channel, in a `DashMap`-backed registry.
#[derive(Clone)]
pub struct LocalEventBus {
    thread_topics: Arc<DashMap<String, broadcast::Sender<EventEnvelope>>>,
    global: broadcast::Sender<EventEnvelope>,
}

impl Default for LocalEventBus {
    fn default() -> Self {
        let (global, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            thread_topics: Arc::new(DashMap::new()),
            global,
        }
    }
}

impl LocalEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn thread_sender(&self, thread_id: &str) -> broadcast::Sender<EventEnvelope> {
        self.thread_topics
            .entry(thread_id.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone()
    }
}

#[async_trait]
impl EventBus for LocalEventBus {
    async fn publish(&self, thread_id: &str, event: EventEnvelope) {
        // broadcast::send errors only when there are no receivers; that is
        // expected (no one is watching this thread right now) and not an
        // infrastructure failure.
        let _ = self.thread_sender(thread_id).send(event.clone());
        let _ = self.global.send(event);
    }

    fn subscribe_thread(&self, thread_id: &str) -> broadcast::Receiver<EventEnvelope> {
        self.thread_sender(thread_id).subscribe()
    }

    fn subscribe_global(&self) -> broadcast::Receiver<EventEnvelope> {
        self.global.subscribe()
    }
}

#[cfg(feature = "redis-transport")]
pub mod redis_bus {
    //! Cross-process transport (§4.9: "the reference implementation uses a
    //! Redis-backed pub/sub adapter layered on the WebSocket server").
    //! Publishes are fanned out locally (so same-process subscribers never
    //! depend on a Redis round-trip) and mirrored onto a Redis channel per
    //! thread plus one global channel for other processes in the cluster.

    use super::{EventBus, EventEnvelope, LocalEventBus};
    use async_trait::async_trait;
    use redis::AsyncCommands;
    use tokio::sync::broadcast;

    pub struct RedisEventBus {
        local: LocalEventBus,
        client: redis::Client,
    }

    impl RedisEventBus {
        pub fn new(redis_url: &str, local: LocalEventBus) -> redis::RedisResult<Self> {
            Ok(Self {
                local,
                client: redis::Client::open(redis_url)?,
            })
        }

        fn channel_for(thread_id: &str) -> String {
            format!("workflow:update:{thread_id}")
        }

        /// Spawns the background task that relays Redis pub/sub messages
        /// for `thread_id` back into the local broadcast topic, so a
        /// subscriber on this process observes events published by peers.
        pub async fn relay_thread(&self, thread_id: &str) -> redis::RedisResult<()> {
            let mut pubsub = self.client.get_async_pubsub().await?;
            pubsub.subscribe(Self::channel_for(thread_id)).await?;
            let local = self.local.clone();
            let thread_id = thread_id.to_string();
            tokio::spawn(async move {
                use futures::StreamExt;
                let mut stream = pubsub.on_message();
                while let Some(msg) = stream.next().await {
                    if let Ok(payload) = msg.get_payload::<String>() {
                        if let Ok(event) = serde_json::from_str::<EventEnvelope>(&payload) {
                            local.publish(&thread_id, event).await;
                        }
                    }
                }
            });
            Ok(())
        }
    }

    #[async_trait]
    impl EventBus for RedisEventBus {
        async fn publish(&self, thread_id: &str, event: EventEnvelope) {
            self.local.publish(thread_id, event.clone()).await;
            if let Ok(mut conn) = self.client.get_multiplexed_async_connection().await {
                if let Ok(payload) = serde_json::to_string(&event) {
                    let _: Result<(), _> = conn.publish(Self::channel_for(thread_id), payload).await;
                }
            }
        }

        fn subscribe_thread(&self, thread_id: &str) -> broadcast::Receiver<EventEnvelope> {
            self.local.subscribe_thread(thread_id)
        }

        fn subscribe_global(&self) -> broadcast::Receiver<EventEnvelope> {
            self.local.subscribe_global()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn per_thread_subscriber_only_sees_its_thread() {
        let bus = LocalEventBus::new();
        let mut t1 = bus.subscribe_thread("t1");
        let mut t2 = bus.subscribe_thread("t2");

        bus.publish("t1", EventEnvelope::step_start("t1", "s1")).await;

        let received = t1.recv().await.unwrap();
        assert_eq!(received.data["stepId"], "s1");
        assert!(t2.try_recv().is_err());
    }

    #[tokio::test]
    async fn global_subscriber_sees_every_thread() {
        let bus = LocalEventBus::new();
        let mut global = bus.subscribe_global();
        bus.publish("t1", EventEnvelope::workflow_created("t1", None)).await;
        bus.publish("t2", EventEnvelope::workflow_created("t2", None)).await;

        let first = global.recv().await.unwrap();
        let second = global.recv().await.unwrap();
        assert_eq!(first.event, "workflow_created");
        assert_eq!(second.event, "workflow_created");
    }
}
