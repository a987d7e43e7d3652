// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Version-1 envelope framing.
//!
//! Every frame on the wire is a JSON object:
//!
//! ```json
//! {
//!   "v": 1,
//!   "type": "req" | "res" | "evt",
//!   "req_id": "<uuid>",
//!   "session_id": "<id>" | null,
//!   "seq": 7,
//!   "ts": "2026-08-01T12:00:00.000Z",
//!   "op": "session.update",
//!   "payload": { }
//! }
//! ```
//!
//! `req_id` is required for requests and responses; events carry none.
//! `seq` is per-sender and strictly increasing within one connection.
//! Responses inherit `req_id`, `session_id`, and `op` from the request
//! they answer.
//!
//! Parsing is deliberately manual: the wire rules reject shapes a derived
//! `Deserialize` would happily accept (wrong version, unknown frame type,
//! a float where an integer belongs).

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// The only protocol version this bridge speaks.
pub const PROTOCOL_VERSION: i64 = 1;

/// Current UTC timestamp in the RFC-3339 form used on the wire.
pub fn now_ts() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

// ── Frame kind and operations ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameKind {
    Req,
    Res,
    Evt,
}

impl FrameKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FrameKind::Req => "req",
            FrameKind::Res => "res",
            FrameKind::Evt => "evt",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "req" => Some(FrameKind::Req),
            "res" => Some(FrameKind::Res),
            "evt" => Some(FrameKind::Evt),
            _ => None,
        }
    }
}

/// The closed operation set. Anything else on a request is answered with an
/// [`code::UNSUPPORTED_OP`] error by the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    SystemHello,
    SystemPing,
    SessionStart,
    SessionUpdate,
    SessionEnd,
}

impl Op {
    /// All supported operation names, in the order advertised in `system.hello`.
    pub const ALL: [Op; 5] = [
        Op::SystemHello,
        Op::SystemPing,
        Op::SessionStart,
        Op::SessionUpdate,
        Op::SessionEnd,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Op::SystemHello => "system.hello",
            Op::SystemPing => "system.ping",
            Op::SessionStart => "session.start",
            Op::SessionUpdate => "session.update",
            Op::SessionEnd => "session.end",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "system.hello" => Some(Op::SystemHello),
            "system.ping" => Some(Op::SystemPing),
            "session.start" => Some(Op::SessionStart),
            "session.update" => Some(Op::SessionUpdate),
            "session.end" => Some(Op::SessionEnd),
            _ => None,
        }
    }

    /// Operation names as advertised in the `system.hello` `supports.ops` list.
    pub fn supported_ops() -> Vec<&'static str> {
        Op::ALL.iter().map(|o| o.as_str()).collect()
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    #[error("frame is not valid JSON: {0}")]
    Json(String),

    #[error("frame is not a JSON object")]
    NotAnObject,

    #[error("unsupported protocol version {0}")]
    Version(String),

    #[error("unknown frame type `{0}`")]
    BadFrameKind(String),

    #[error("`req_id` is required for req/res frames")]
    MissingReqId,

    #[error("`{field}` must be {expected}")]
    BadField {
        field: &'static str,
        expected: &'static str,
    },
}

fn bad(field: &'static str, expected: &'static str) -> EnvelopeError {
    EnvelopeError::BadField { field, expected }
}

// ── Envelope ──────────────────────────────────────────────────────────────────

/// One parsed (or to-be-emitted) frame.
///
/// `op` stays a raw string: responses must echo the request's operation
/// verbatim, including operations outside the closed set that the dispatcher
/// rejects with `unsupported_op`.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub kind: FrameKind,
    pub req_id: Option<String>,
    pub session_id: Option<String>,
    pub seq: i64,
    pub ts: String,
    pub op: String,
    pub payload: Map<String, Value>,
}

impl Envelope {
    /// Parse one inbound text frame, enforcing the version-1 wire rules.
    pub fn parse(text: &str) -> Result<Envelope, EnvelopeError> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| EnvelopeError::Json(e.to_string()))?;
        let obj = value.as_object().ok_or(EnvelopeError::NotAnObject)?;

        match obj.get("v").and_then(Value::as_i64) {
            Some(PROTOCOL_VERSION) => {}
            _ => {
                let raw = obj.get("v").cloned().unwrap_or(Value::Null);
                return Err(EnvelopeError::Version(raw.to_string()));
            }
        }

        let kind_raw = obj
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| bad("type", "a string"))?;
        let kind = FrameKind::parse(kind_raw)
            .ok_or_else(|| EnvelopeError::BadFrameKind(kind_raw.to_string()))?;

        let op = obj
            .get("op")
            .and_then(Value::as_str)
            .ok_or_else(|| bad("op", "a string"))?
            .to_string();

        let ts = obj
            .get("ts")
            .and_then(Value::as_str)
            .ok_or_else(|| bad("ts", "a string"))?
            .to_string();

        let seq = obj
            .get("seq")
            .and_then(Value::as_i64)
            .ok_or_else(|| bad("seq", "an integer"))?;

        let payload = match obj.get("payload") {
            None | Some(Value::Null) => Map::new(),
            Some(Value::Object(m)) => m.clone(),
            Some(_) => return Err(bad("payload", "an object")),
        };

        let session_id = match obj.get("session_id") {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => Some(s.clone()),
            Some(_) => return Err(bad("session_id", "a string or null")),
        };

        // Events carry no request id; a stray one from a lenient peer is
        // dropped rather than failing the whole frame.
        let req_id = match kind {
            FrameKind::Req | FrameKind::Res => match obj.get("req_id") {
                Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
                _ => return Err(EnvelopeError::MissingReqId),
            },
            FrameKind::Evt => None,
        };

        Ok(Envelope {
            kind,
            req_id,
            session_id,
            seq,
            ts,
            op,
            payload,
        })
    }

    /// Serialise to one wire frame.
    pub fn to_json(&self) -> String {
        let mut obj = Map::new();
        obj.insert("v".into(), Value::from(PROTOCOL_VERSION));
        obj.insert("type".into(), Value::from(self.kind.as_str()));
        if let Some(req_id) = &self.req_id {
            obj.insert("req_id".into(), Value::from(req_id.clone()));
        }
        if let Some(session_id) = &self.session_id {
            obj.insert("session_id".into(), Value::from(session_id.clone()));
        }
        obj.insert("seq".into(), Value::from(self.seq));
        obj.insert("ts".into(), Value::from(self.ts.clone()));
        obj.insert("op".into(), Value::from(self.op.clone()));
        obj.insert("payload".into(), Value::Object(self.payload.clone()));
        Value::Object(obj).to_string()
    }

    /// Build an outbound request with a fresh correlation id.
    pub fn request(op: Op, session_id: Option<String>, seq: i64, payload: Map<String, Value>) -> Envelope {
        Envelope {
            kind: FrameKind::Req,
            req_id: Some(Uuid::new_v4().to_string()),
            session_id,
            seq,
            ts: now_ts(),
            op: op.as_str().to_string(),
            payload,
        }
    }

    /// Build an outbound event (no correlation id).
    pub fn event(op: Op, session_id: Option<String>, seq: i64, payload: Map<String, Value>) -> Envelope {
        Envelope {
            kind: FrameKind::Evt,
            req_id: None,
            session_id,
            seq,
            ts: now_ts(),
            op: op.as_str().to_string(),
            payload,
        }
    }

    /// Build the response to `req`, inheriting its correlation id, session id,
    /// and operation name verbatim.
    pub fn response_to(req: &Envelope, seq: i64, payload: ResponsePayload) -> Envelope {
        Envelope {
            kind: FrameKind::Res,
            req_id: req.req_id.clone(),
            session_id: req.session_id.clone(),
            seq,
            ts: now_ts(),
            op: req.op.clone(),
            payload: payload.into_map(),
        }
    }

    /// The operation, if it belongs to the closed set.
    pub fn known_op(&self) -> Option<Op> {
        Op::parse(&self.op)
    }
}

// ── Response payload ──────────────────────────────────────────────────────────

/// Failure detail inside a `{ok:false}` response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

/// The tagged union every response payload takes:
/// `{ok:true, result:{..}}` or `{ok:false, error:{code, message, details?}}`.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponsePayload {
    Ok(Map<String, Value>),
    Err(ErrorBody),
}

impl ResponsePayload {
    pub fn ok(result: Map<String, Value>) -> Self {
        ResponsePayload::Ok(result)
    }

    /// An empty success result.
    pub fn ok_empty() -> Self {
        ResponsePayload::Ok(Map::new())
    }

    pub fn error(code: &str, message: impl Into<String>) -> Self {
        ResponsePayload::Err(ErrorBody {
            code: code.to_string(),
            message: message.into(),
            details: None,
        })
    }

    pub fn into_map(self) -> Map<String, Value> {
        let mut m = Map::new();
        match self {
            ResponsePayload::Ok(result) => {
                m.insert("ok".into(), Value::Bool(true));
                m.insert("result".into(), Value::Object(result));
            }
            ResponsePayload::Err(error) => {
                m.insert("ok".into(), Value::Bool(false));
                // ErrorBody serialisation cannot fail: strings and an optional Value.
                m.insert(
                    "error".into(),
                    serde_json::to_value(error).unwrap_or(Value::Null),
                );
            }
        }
        m
    }

    /// Validate an inbound response payload (used for the handshake reply).
    pub fn from_map(payload: &Map<String, Value>) -> Result<ResponsePayload, EnvelopeError> {
        match payload.get("ok").and_then(Value::as_bool) {
            Some(true) => {
                let result = payload
                    .get("result")
                    .and_then(Value::as_object)
                    .ok_or_else(|| bad("payload.result", "an object"))?;
                Ok(ResponsePayload::Ok(result.clone()))
            }
            Some(false) => {
                let error = payload
                    .get("error")
                    .cloned()
                    .ok_or_else(|| bad("payload.error", "an object"))?;
                let body: ErrorBody = serde_json::from_value(error)
                    .map_err(|_| bad("payload.error", "an object with code and message"))?;
                Ok(ResponsePayload::Err(body))
            }
            None => Err(bad("payload.ok", "a boolean")),
        }
    }
}

/// Protocol error codes. Closed set plus the transport-level code the agent
/// bridge surfaces.
pub mod code {
    pub const INVALID_SESSION: &str = "invalid_session";
    pub const UNSUPPORTED_OP: &str = "unsupported_op";
    pub const BAD_REQUEST: &str = "bad_request";
    pub const AGENT_ERROR: &str = "agent_error";
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
