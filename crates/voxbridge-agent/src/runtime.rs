// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::{collections::VecDeque, pin::Pin, sync::Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::Stream;
use serde::Serialize;

/// Streamed agent reply: text deltas in arrival order.
pub type ReplyStream = Pin<Box<dyn Stream<Item = anyhow::Result<String>> + Send>>;

/// The peer the utterance came from. Voice sessions always address the agent
/// directly, so the only kind is `direct` with a `session:<id>` id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PeerRef {
    pub kind: &'static str,
    pub id: String,
}

impl PeerRef {
    pub fn direct(id: impl Into<String>) -> Self {
        Self {
            kind: "direct",
            id: id.into(),
        }
    }
}

/// Routing context for one dispatch: which agent, under which session key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteContext {
    pub agent_id: String,
    pub session_key: String,
}

/// One inbound caller turn, recorded before dispatch.
#[derive(Debug, Clone, Serialize)]
pub struct InboundRecord {
    pub session_key: String,
    pub channel: String,
    pub account_id: String,
    pub peer_id: String,
    pub text: String,
    pub received_at: DateTime<Utc>,
}

/// Capability bundle the monitor is constructed with.
///
/// Implementations own the actual transport to the agent back-end; the
/// bundled [`crate::HttpAgentRuntime`] speaks NDJSON over HTTP, and
/// [`MockRuntime`] scripts replies for tests.
#[async_trait]
pub trait AgentRuntime: Send + Sync {
    /// Agent id used in routing contexts.
    fn agent_id(&self) -> &str;

    /// Derive the routing context for one account/peer pair.
    ///
    /// The default shape is stable per (agent, channel, account, peer) so the
    /// agent back-end keeps conversation continuity across turns.
    fn resolve_route(&self, channel: &str, account_id: &str, peer: &PeerRef) -> RouteContext {
        RouteContext {
            agent_id: self.agent_id().to_string(),
            session_key: format!("{}/{}/{}/{}", self.agent_id(), channel, account_id, peer.id),
        }
    }

    /// Persist the inbound turn before dispatching it.
    async fn record_inbound(&self, record: InboundRecord) -> anyhow::Result<()>;

    /// Send the prompt to the agent and stream its reply.
    async fn dispatch(&self, route: &RouteContext, prompt: &str) -> anyhow::Result<ReplyStream>;
}

// ── Mock runtime ──────────────────────────────────────────────────────────────

/// Scripted runtime for tests: pushed replies are returned in order, each as
/// a stream of deltas; an exhausted script yields an empty reply. Recorded
/// inbound turns are kept for assertions.
#[derive(Default)]
pub struct MockRuntime {
    replies: Mutex<VecDeque<Vec<String>>>,
    records: Mutex<Vec<InboundRecord>>,
}

impl MockRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue one reply, delivered as the given deltas.
    pub fn push_reply(&self, deltas: &[&str]) {
        self.replies
            .lock()
            .expect("mock lock poisoned")
            .push_back(deltas.iter().map(|d| d.to_string()).collect());
    }

    /// Inbound records seen so far.
    pub fn records(&self) -> Vec<InboundRecord> {
        self.records.lock().expect("mock lock poisoned").clone()
    }
}

#[async_trait]
impl AgentRuntime for MockRuntime {
    fn agent_id(&self) -> &str {
        "mock"
    }

    async fn record_inbound(&self, record: InboundRecord) -> anyhow::Result<()> {
        self.records.lock().expect("mock lock poisoned").push(record);
        Ok(())
    }

    async fn dispatch(&self, _route: &RouteContext, _prompt: &str) -> anyhow::Result<ReplyStream> {
        let deltas = self
            .replies
            .lock()
            .expect("mock lock poisoned")
            .pop_front()
            .unwrap_or_default();
        Ok(Box::pin(futures::stream::iter(
            deltas.into_iter().map(Ok),
        )))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
