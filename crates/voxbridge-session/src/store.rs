// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Direction of the underlying call, as reported by the telephony peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallDirection {
    Inbound,
    Outbound,
}

impl CallDirection {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "inbound" => Some(CallDirection::Inbound),
            "outbound" => Some(CallDirection::Outbound),
            _ => None,
        }
    }
}

/// Call metadata attached to a session by `session.start` / `session.update`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallInfo {
    pub call_id: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub direction: Option<CallDirection>,
}

/// The bridge's view of one ongoing call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub call_id: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub direction: Option<CallDirection>,
    pub last_seen_at: DateTime<Utc>,
}

/// One out-of-band text waiting to be spoken on the session's next turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedMessage {
    pub message_id: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

/// One account's session partition.
///
/// Invariants, upheld after every operation:
/// - every call-index entry points at a live session;
/// - `latest_session_id` is `None` or names a live session;
/// - queues survive until consumed or the session ends.
#[derive(Debug)]
pub struct SessionStore {
    /// Lower-cased `"<channel>:"` prefix stripped from resolve targets.
    channel_prefix: String,
    sessions: HashMap<String, Session>,
    call_index: HashMap<String, String>,
    queues: HashMap<String, Vec<QueuedMessage>>,
    latest_session_id: Option<String>,
    /// Creation order, for the latest-session fallback after an eviction.
    insert_order: Vec<String>,
}

fn strip_prefix_ci<'a>(s: &'a str, prefix: &str) -> Option<&'a str> {
    if s.len() >= prefix.len() && s[..prefix.len()].eq_ignore_ascii_case(prefix) {
        Some(&s[prefix.len()..])
    } else {
        None
    }
}

impl SessionStore {
    pub fn new(channel: &str) -> Self {
        Self {
            channel_prefix: format!("{}:", channel.to_lowercase()),
            sessions: HashMap::new(),
            call_index: HashMap::new(),
            queues: HashMap::new(),
            latest_session_id: None,
            insert_order: Vec::new(),
        }
    }

    /// Upsert a session, refresh `last_seen_at`, index its call id, and mark
    /// it as the latest session.
    pub fn track(&mut self, session_id: &str, call: Option<&CallInfo>) -> &Session {
        if !self.sessions.contains_key(session_id) {
            self.insert_order.push(session_id.to_string());
            self.sessions.insert(
                session_id.to_string(),
                Session {
                    session_id: session_id.to_string(),
                    call_id: None,
                    from: None,
                    to: None,
                    direction: None,
                    last_seen_at: Utc::now(),
                },
            );
        }
        // Entry is guaranteed present after the insert above.
        let session = self
            .sessions
            .get_mut(session_id)
            .unwrap_or_else(|| unreachable!("session inserted above"));
        session.last_seen_at = Utc::now();
        if let Some(call) = call {
            if let Some(call_id) = &call.call_id {
                session.call_id = Some(call_id.clone());
                self.call_index
                    .insert(call_id.clone(), session_id.to_string());
            }
            if call.from.is_some() {
                session.from = call.from.clone();
            }
            if call.to.is_some() {
                session.to = call.to.clone();
            }
            if call.direction.is_some() {
                session.direction = call.direction;
            }
        }
        self.latest_session_id = Some(session_id.to_string());
        &self.sessions[session_id]
    }

    /// Resolve an outbound-send target to a live session id.
    ///
    /// Empty target → latest session. `session:<id>` → the id iff live.
    /// `call:<id>` → call-index lookup. Bare targets are tried as a session
    /// id, then as a call id. A leading channel prefix (`fortivoice:`) is
    /// stripped first; all prefixes match case-insensitively.
    pub fn resolve(&self, target: Option<&str>) -> Option<String> {
        let raw = target.map(str::trim).unwrap_or("");
        if raw.is_empty() {
            return self.latest_session_id.clone();
        }
        let t = strip_prefix_ci(raw, &self.channel_prefix).unwrap_or(raw);
        if let Some(suffix) = strip_prefix_ci(t, "session:") {
            return self
                .sessions
                .contains_key(suffix)
                .then(|| suffix.to_string());
        }
        if let Some(suffix) = strip_prefix_ci(t, "call:") {
            return self.call_index.get(suffix).cloned();
        }
        if self.sessions.contains_key(t) {
            return Some(t.to_string());
        }
        self.call_index.get(t).cloned()
    }

    /// Append a text to the session's outbound queue.
    ///
    /// The session does not have to exist yet: queued messages may be
    /// attached before the peer's first `session.start` arrives.
    pub fn queue_text(&mut self, session_id: &str, text: &str) -> QueuedMessage {
        let message = QueuedMessage {
            message_id: format!("queued-{}", Uuid::new_v4()),
            text: text.to_string(),
            created_at: Utc::now(),
        };
        self.queues
            .entry(session_id.to_string())
            .or_default()
            .push(message.clone());
        message
    }

    /// Drain the session's queue atomically. A second immediate call
    /// returns empty.
    pub fn consume_queue(&mut self, session_id: &str) -> Vec<QueuedMessage> {
        self.queues.remove(session_id).unwrap_or_default()
    }

    pub fn has_active_session(&self) -> bool {
        !self.sessions.is_empty()
    }

    pub fn get(&self, session_id: &str) -> Option<&Session> {
        self.sessions.get(session_id)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Evict a session: drop it, its queue, and every call-index entry
    /// pointing at it. The latest-session pointer falls back to the most
    /// recently inserted remaining session.
    pub fn end(&mut self, session_id: &str) {
        self.sessions.remove(session_id);
        self.queues.remove(session_id);
        self.call_index.retain(|_, sid| sid != session_id);
        self.insert_order.retain(|sid| sid != session_id);
        if self.latest_session_id.as_deref() == Some(session_id) {
            self.latest_session_id = self.insert_order.last().cloned();
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
