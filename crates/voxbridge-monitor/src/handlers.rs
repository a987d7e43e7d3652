// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Op handlers for inbound frames, run strictly in arrival order by the
//! monitor's pump.
//!
//! Requests get a response payload back (success or a protocol error);
//! events and inbound responses get none. A failing agent dispatch inside
//! `session.update` is downgraded: the response still carries whatever the
//! queue drain produced — the `actions` array is never omitted.

use std::sync::Arc;

use chrono::Utc;
use serde_json::{Map, Value};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use voxbridge_agent::AgentBridge;
use voxbridge_config::ResolvedAccount;
use voxbridge_protocol::{code, Action, Envelope, FrameKind, Op, ResponsePayload};
use voxbridge_session::{CallDirection, CallInfo, SessionStore};

use crate::status::StatusHandle;

/// Greeting spoken as the first action of a `session.start` when
/// `helloWorldOnStart` is enabled.
pub(crate) const GREETING: &str = "Hello from voxbridge! How can I help you today?";

const HEARTBEAT_SEC: u64 = 30;
const DEDUPE_TTL_SEC: u64 = 300;

/// Realtime input types that reach the agent. `transcript_partial` and
/// anything unknown never do.
const ACCEPTED_INPUT_TYPES: [&str; 3] = ["user_utterance", "transcript_final", "tool_result"];

/// Everything a handler needs for one connection.
pub(crate) struct HandlerContext {
    pub account: ResolvedAccount,
    /// Our id for this connection, handed to the peer when it hellos us.
    pub conn_id: String,
    pub store: Arc<Mutex<SessionStore>>,
    pub bridge: Arc<AgentBridge>,
    pub status: StatusHandle,
}

/// Handle one parsed frame; `Some` means "send this response payload".
pub(crate) async fn handle_frame(
    cx: &HandlerContext,
    frame: &Envelope,
) -> anyhow::Result<Option<ResponsePayload>> {
    match frame.kind {
        FrameKind::Res => {
            debug!(op = %frame.op, req_id = ?frame.req_id, "ignoring late inbound response");
            Ok(None)
        }
        FrameKind::Evt => {
            handle_event(cx, frame).await;
            Ok(None)
        }
        FrameKind::Req => handle_request(cx, frame).await.map(Some),
    }
}

async fn handle_event(cx: &HandlerContext, frame: &Envelope) {
    if frame.known_op() == Some(Op::SessionEnd) {
        match &frame.session_id {
            Some(session_id) => {
                cx.store.lock().await.end(session_id);
                info!(session = %session_id, "session ended by peer");
            }
            None => debug!("session.end event without session id, ignoring"),
        }
    } else {
        debug!(op = %frame.op, "ignoring event");
    }
}

async fn handle_request(
    cx: &HandlerContext,
    frame: &Envelope,
) -> anyhow::Result<ResponsePayload> {
    match frame.known_op() {
        Some(Op::SystemHello) => Ok(hello_reply(cx)),
        Some(Op::SystemPing) => Ok(ping_reply(frame)),
        Some(Op::SessionStart) => session_start(cx, frame).await,
        Some(Op::SessionUpdate) => session_update(cx, frame).await,
        // session.end only arrives as an event; as a request it is outside
        // the handled set like any unknown op.
        Some(Op::SessionEnd) | None => Ok(ResponsePayload::error(
            code::UNSUPPORTED_OP,
            format!("unsupported operation `{}`", frame.op),
        )),
    }
}

// ── system.* ──────────────────────────────────────────────────────────────────

fn hello_reply(cx: &HandlerContext) -> ResponsePayload {
    let mut result = Map::new();
    result.insert("conn_id".into(), Value::from(cx.conn_id.clone()));
    result.insert(
        "server".into(),
        serde_json::json!({
            "name": "voxbridge",
            "version": env!("CARGO_PKG_VERSION"),
        }),
    );
    result.insert("heartbeat_sec".into(), Value::from(HEARTBEAT_SEC));
    result.insert("dedupe_ttl_sec".into(), Value::from(DEDUPE_TTL_SEC));
    ResponsePayload::ok(result)
}

fn ping_reply(frame: &Envelope) -> ResponsePayload {
    let mut result = Map::new();
    if let Some(nonce) = frame.payload.get("nonce") {
        result.insert("nonce".into(), nonce.clone());
    }
    ResponsePayload::ok(result)
}

// ── session.* ─────────────────────────────────────────────────────────────────

async fn session_start(
    cx: &HandlerContext,
    frame: &Envelope,
) -> anyhow::Result<ResponsePayload> {
    let Some(session_id) = session_id_of(frame) else {
        return Ok(invalid_session());
    };
    let call = match parse_call(frame.payload.get("call")) {
        Ok(call) => call,
        Err(reply) => return Ok(reply),
    };

    let queued = {
        let mut store = cx.store.lock().await;
        store.track(&session_id, call.as_ref());
        store.consume_queue(&session_id)
    };

    let mut actions = Vec::new();
    if cx.account.hello_world_on_start {
        actions.push(Action::speak(GREETING));
    }
    for message in queued {
        actions.push(Action::speak_with_id(message.message_id, message.text));
    }

    info!(session = %session_id, actions = actions.len(), "session started");
    note_actions(&cx.status, actions.len());
    Ok(actions_reply(actions))
}

async fn session_update(
    cx: &HandlerContext,
    frame: &Envelope,
) -> anyhow::Result<ResponsePayload> {
    let Some(session_id) = session_id_of(frame) else {
        return Ok(invalid_session());
    };

    let (prior_seen, queued) = {
        let mut store = cx.store.lock().await;
        let prior_seen = store.get(&session_id).map(|s| s.last_seen_at);
        store.track(&session_id, None);
        (prior_seen, store.consume_queue(&session_id))
    };

    let mut actions: Vec<Action> = queued
        .into_iter()
        .map(|m| Action::speak_with_id(m.message_id, m.text))
        .collect();

    if let Some((turn_id, text)) = realtime_input(frame) {
        debug!(session = %session_id, turn = %turn_id, "realtime input accepted");
        match cx.bridge.handle_utterance(&session_id, &text, prior_seen).await {
            Ok(mut agent_actions) => actions.append(&mut agent_actions),
            Err(e) => {
                // The response still goes out with the drained actions; the
                // failure is visible through the status sink and the log.
                warn!(session = %session_id, "agent dispatch failed: {e:#}");
                cx.status.update(|s| {
                    s.handler_failures += 1;
                    s.last_error = Some(format!("agent dispatch failed: {e}"));
                });
            }
        }
    }

    note_actions(&cx.status, actions.len());
    Ok(actions_reply(actions))
}

/// Extract `(turn_id, text)` when the update carries agent-worthy realtime
/// input: `realtime.turn_id` and `realtime.input.text` present, and
/// `input.type` in the accepted set.
fn realtime_input(frame: &Envelope) -> Option<(String, String)> {
    let realtime = frame.payload.get("realtime")?.as_object()?;
    let turn_id = realtime.get("turn_id")?.as_str()?;
    let input = realtime.get("input")?.as_object()?;
    let input_type = input.get("type")?.as_str()?;
    if !ACCEPTED_INPUT_TYPES.contains(&input_type) {
        debug!(turn = %turn_id, input_type, "realtime input type not forwarded");
        return None;
    }
    let text = input.get("text")?.as_str()?;
    if text.is_empty() {
        return None;
    }
    Some((turn_id.to_string(), text.to_string()))
}

fn session_id_of(frame: &Envelope) -> Option<String> {
    frame
        .session_id
        .as_deref()
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn parse_call(value: Option<&Value>) -> Result<Option<CallInfo>, ResponsePayload> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Object(call)) => {
            let text = |key: &str| call.get(key).and_then(Value::as_str).map(str::to_string);
            Ok(Some(CallInfo {
                call_id: text("call_id"),
                from: text("from"),
                to: text("to"),
                direction: call
                    .get("direction")
                    .and_then(Value::as_str)
                    .and_then(CallDirection::parse),
            }))
        }
        Some(_) => Err(ResponsePayload::error(
            code::BAD_REQUEST,
            "`call` must be an object",
        )),
    }
}

fn invalid_session() -> ResponsePayload {
    ResponsePayload::error(code::INVALID_SESSION, "missing or empty session_id")
}

fn actions_reply(actions: Vec<Action>) -> ResponsePayload {
    let mut result = Map::new();
    result.insert(
        "actions".into(),
        Value::Array(actions.iter().map(Action::to_value).collect()),
    );
    ResponsePayload::ok(result)
}

fn note_actions(status: &StatusHandle, count: usize) {
    if count > 0 {
        status.update(|s| {
            s.actions_emitted += count as u64;
            s.last_outbound_at = Some(Utc::now());
        });
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
