// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Voice actions — the units of reply the telephony peer executes on behalf
//! of the caller.
//!
//! Three variants:
//! - `speak` — say one line of text (optionally interruptible, optional
//!   voice hint).
//! - `collect` — gather typed slot values from the caller.
//! - `end` — hang up, optionally transferring first.
//!
//! Agent replies arrive either as a structured JSON envelope
//! `{"actions": [...]}` (possibly inside fenced code blocks) or as plain
//! prose. [`parse_structured_reply`] handles the first shape; validation is
//! all-or-nothing per candidate — a single malformed action rejects the
//! whole envelope rather than producing a partial list.

use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

// ── Types ─────────────────────────────────────────────────────────────────────

/// Slot value types a `collect` action may request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Number,
    Integer,
    Boolean,
    Date,
    Datetime,
}

impl FieldType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::String => "string",
            FieldType::Number => "number",
            FieldType::Integer => "integer",
            FieldType::Boolean => "boolean",
            FieldType::Date => "date",
            FieldType::Datetime => "datetime",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "string" => Some(FieldType::String),
            "number" => Some(FieldType::Number),
            "integer" => Some(FieldType::Integer),
            "boolean" => Some(FieldType::Boolean),
            "date" => Some(FieldType::Date),
            "datetime" => Some(FieldType::Datetime),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CollectField {
    pub key: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    pub required: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CollectSchema {
    pub fields: Vec<CollectField>,
}

/// Optional TTS voice override on a `speak` action.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VoiceHint {
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferMode {
    Warm,
    Cold,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Transfer {
    pub to: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<TransferMode>,
}

/// One voice action.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Action {
    Speak {
        message_id: String,
        text: String,
        barge_in: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        voice: Option<VoiceHint>,
    },
    Collect {
        schema: CollectSchema,
    },
    End {
        reason: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        transfer: Option<Transfer>,
    },
}

impl Action {
    /// A `speak` with a generated message id and default barge-in.
    pub fn speak(text: impl Into<String>) -> Action {
        Action::Speak {
            message_id: format!("m-{}", Uuid::new_v4()),
            text: text.into(),
            barge_in: true,
            voice: None,
        }
    }

    /// A `speak` carrying a caller-supplied message id (queued messages keep
    /// their `queued-` ids through the drain).
    pub fn speak_with_id(message_id: impl Into<String>, text: impl Into<String>) -> Action {
        Action::Speak {
            message_id: message_id.into(),
            text: text.into(),
            barge_in: true,
            voice: None,
        }
    }

    pub fn to_value(&self) -> Value {
        // Serialisation of these variants cannot fail.
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// Validate one agent-authored action value.
    pub fn from_value(v: &Value) -> Result<Action, ActionError> {
        let obj = v.as_object().ok_or(ActionError::NotAnObject)?;
        let kind = obj
            .get("type")
            .and_then(Value::as_str)
            .ok_or(ActionError::Missing("type"))?;
        match kind {
            "speak" => {
                let message_id = require_text(obj, "message_id")?;
                let text = require_text(obj, "text")?;
                let barge_in = match obj.get("barge_in") {
                    None | Some(Value::Null) => true,
                    Some(Value::Bool(b)) => *b,
                    Some(other) => return Err(invalid("barge_in", other)),
                };
                let voice = match obj.get("voice") {
                    None | Some(Value::Null) => None,
                    Some(Value::Object(voice)) => Some(VoiceHint {
                        name: require_text(voice, "name")?,
                    }),
                    Some(other) => return Err(invalid("voice", other)),
                };
                Ok(Action::Speak {
                    message_id,
                    text,
                    barge_in,
                    voice,
                })
            }
            "collect" => {
                let schema = obj
                    .get("schema")
                    .and_then(Value::as_object)
                    .ok_or(ActionError::Missing("schema"))?;
                let raw_fields = schema
                    .get("fields")
                    .and_then(Value::as_array)
                    .ok_or(ActionError::Missing("schema.fields"))?;
                if raw_fields.is_empty() {
                    return Err(ActionError::Empty("schema.fields"));
                }
                let mut fields = Vec::with_capacity(raw_fields.len());
                for raw in raw_fields {
                    let field = raw.as_object().ok_or(ActionError::NotAnObject)?;
                    let key = require_text(field, "key")?;
                    let type_name = field
                        .get("type")
                        .and_then(Value::as_str)
                        .ok_or(ActionError::Missing("field.type"))?;
                    let field_type = FieldType::parse(type_name)
                        .ok_or_else(|| invalid("field.type", &Value::from(type_name)))?;
                    let required = match field.get("required") {
                        None | Some(Value::Null) => false,
                        Some(Value::Bool(b)) => *b,
                        Some(other) => return Err(invalid("field.required", other)),
                    };
                    fields.push(CollectField {
                        key,
                        field_type,
                        required,
                    });
                }
                Ok(Action::Collect {
                    schema: CollectSchema { fields },
                })
            }
            "end" => {
                let reason = require_text(obj, "reason")?;
                let transfer = match obj.get("transfer") {
                    None | Some(Value::Null) => None,
                    Some(Value::Object(transfer)) => {
                        let to = require_text(transfer, "to")?;
                        let mode = match transfer.get("mode") {
                            None | Some(Value::Null) => None,
                            Some(Value::String(s)) if s == "warm" => Some(TransferMode::Warm),
                            Some(Value::String(s)) if s == "cold" => Some(TransferMode::Cold),
                            Some(other) => return Err(invalid("transfer.mode", other)),
                        };
                        Some(Transfer { to, mode })
                    }
                    Some(other) => return Err(invalid("transfer", other)),
                };
                Ok(Action::End { reason, transfer })
            }
            other => Err(ActionError::UnknownType(other.to_string())),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ActionError {
    #[error("action is not a JSON object")]
    NotAnObject,

    #[error("unknown action type `{0}`")]
    UnknownType(String),

    #[error("missing required field `{0}`")]
    Missing(&'static str),

    #[error("field `{0}` must be non-empty")]
    Empty(&'static str),

    #[error("field `{field}` has invalid value {value}")]
    Invalid { field: &'static str, value: String },
}

fn invalid(field: &'static str, value: &Value) -> ActionError {
    ActionError::Invalid {
        field,
        value: value.to_string(),
    }
}

fn require_text(
    obj: &serde_json::Map<String, Value>,
    field: &'static str,
) -> Result<String, ActionError> {
    match obj.get(field) {
        Some(Value::String(s)) if !s.is_empty() => Ok(s.clone()),
        Some(Value::String(_)) => Err(ActionError::Empty(field)),
        Some(other) => Err(invalid(field, other)),
        None => Err(ActionError::Missing(field)),
    }
}

// ── Structured-reply parser ───────────────────────────────────────────────────

/// Try to interpret an agent reply as a structured action envelope.
///
/// Candidates are tried in order: the whole trimmed text first, then each
/// fenced code block. The first candidate that parses as JSON and whose
/// `actions` array validates completely wins. Returns `None` when no
/// candidate matches ("not structured") — the caller falls back to prose
/// handling.
pub fn parse_structured_reply(text: &str) -> Option<Vec<Action>> {
    let mut candidates: Vec<&str> = vec![text.trim()];
    candidates.extend(fenced_blocks(text));

    for candidate in candidates {
        if candidate.is_empty() {
            continue;
        }
        let Ok(value) = serde_json::from_str::<Value>(candidate) else {
            continue;
        };
        let Some(raw_actions) = value.get("actions").and_then(Value::as_array) else {
            continue;
        };
        let mut actions = Vec::with_capacity(raw_actions.len());
        let mut ok = true;
        for raw in raw_actions {
            match Action::from_value(raw) {
                Ok(action) => actions.push(action),
                Err(_) => {
                    // One malformed action poisons the whole candidate.
                    ok = false;
                    break;
                }
            }
        }
        if ok {
            return Some(actions);
        }
    }
    None
}

/// The inner text of every ``` fenced block, language tags stripped.
fn fenced_blocks(text: &str) -> Vec<&str> {
    let mut blocks = Vec::new();
    let mut rest = text;
    while let Some(open) = rest.find("```") {
        let after_fence = &rest[open + 3..];
        // Skip the optional language tag up to end of line.
        let body_start = after_fence.find('\n').map(|i| i + 1).unwrap_or(after_fence.len());
        let body = &after_fence[body_start..];
        match body.find("```") {
            Some(close) => {
                blocks.push(body[..close].trim());
                rest = &body[close + 3..];
            }
            None => break,
        }
    }
    blocks
}

// ── Collect heuristic ─────────────────────────────────────────────────────────

fn city_question_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // Unwrap is fine: the pattern is a compile-time constant.
    RE.get_or_init(|| Regex::new(r"(?i)\b(which|what)\s+city\b").unwrap())
}

/// Infer a `collect` for the city slot from a prose reply.
///
/// Intentionally narrow: the latest caller utterance must mention "weather"
/// and the reply must ask about a city (mentions "city" together with a
/// question mark, a "which/what city" phrase, or a "could you tell me"
/// phrase). Returns the collect action to append after the speak actions.
pub fn infer_city_collect(user_text: &str, reply: &str) -> Option<Action> {
    if !user_text.to_lowercase().contains("weather") {
        return None;
    }
    let reply_lower = reply.to_lowercase();
    if !reply_lower.contains("city") {
        return None;
    }
    let asks = reply.contains('?')
        || city_question_re().is_match(reply)
        || reply_lower.contains("could you tell me");
    if !asks {
        return None;
    }
    Some(Action::Collect {
        schema: CollectSchema {
            fields: vec![CollectField {
                key: "city".into(),
                field_type: FieldType::String,
                required: true,
            }],
        },
    })
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    // ── Action validation ────────────────────────────────────────────────────

    #[test]
    fn speak_parses_with_defaults() {
        let v = json!({"type": "speak", "message_id": "m1", "text": "hi"});
        match Action::from_value(&v).unwrap() {
            Action::Speak {
                message_id,
                text,
                barge_in,
                voice,
            } => {
                assert_eq!(message_id, "m1");
                assert_eq!(text, "hi");
                assert!(barge_in, "barge_in must default to true");
                assert!(voice.is_none());
            }
            other => panic!("expected speak, got {other:?}"),
        }
    }

    #[test]
    fn speak_rejects_empty_text() {
        let v = json!({"type": "speak", "message_id": "m1", "text": ""});
        assert!(matches!(
            Action::from_value(&v),
            Err(ActionError::Empty("text"))
        ));
    }

    #[test]
    fn speak_rejects_missing_message_id() {
        let v = json!({"type": "speak", "text": "hi"});
        assert!(matches!(
            Action::from_value(&v),
            Err(ActionError::Missing("message_id"))
        ));
    }

    #[test]
    fn speak_accepts_voice_hint() {
        let v = json!({
            "type": "speak", "message_id": "m1", "text": "hi",
            "barge_in": false, "voice": {"name": "aurora"}
        });
        match Action::from_value(&v).unwrap() {
            Action::Speak {
                barge_in, voice, ..
            } => {
                assert!(!barge_in);
                assert_eq!(voice.unwrap().name, "aurora");
            }
            other => panic!("expected speak, got {other:?}"),
        }
    }

    #[test]
    fn speak_rejects_non_bool_barge_in() {
        let v = json!({"type": "speak", "message_id": "m1", "text": "hi", "barge_in": "yes"});
        assert!(Action::from_value(&v).is_err());
    }

    #[test]
    fn collect_parses_all_field_types() {
        let v = json!({"type": "collect", "schema": {"fields": [
            {"key": "a", "type": "string"},
            {"key": "b", "type": "number", "required": true},
            {"key": "c", "type": "integer"},
            {"key": "d", "type": "boolean"},
            {"key": "e", "type": "date"},
            {"key": "f", "type": "datetime"}
        ]}});
        match Action::from_value(&v).unwrap() {
            Action::Collect { schema } => {
                assert_eq!(schema.fields.len(), 6);
                assert!(!schema.fields[0].required, "required must default to false");
                assert!(schema.fields[1].required);
            }
            other => panic!("expected collect, got {other:?}"),
        }
    }

    #[test]
    fn collect_rejects_unknown_field_type() {
        let v = json!({"type": "collect", "schema": {"fields": [
            {"key": "a", "type": "uuid"}
        ]}});
        assert!(Action::from_value(&v).is_err());
    }

    #[test]
    fn collect_rejects_empty_fields() {
        let v = json!({"type": "collect", "schema": {"fields": []}});
        assert!(matches!(
            Action::from_value(&v),
            Err(ActionError::Empty("schema.fields"))
        ));
    }

    #[test]
    fn end_parses_transfer_modes() {
        for mode in ["warm", "cold"] {
            let v = json!({"type": "end", "reason": "done",
                "transfer": {"to": "+15551230000", "mode": mode}});
            assert!(Action::from_value(&v).is_ok(), "mode {mode} must parse");
        }
    }

    #[test]
    fn end_rejects_bad_transfer_mode() {
        let v = json!({"type": "end", "reason": "done",
            "transfer": {"to": "+15551230000", "mode": "lukewarm"}});
        assert!(Action::from_value(&v).is_err());
    }

    #[test]
    fn end_rejects_empty_reason() {
        let v = json!({"type": "end", "reason": ""});
        assert!(Action::from_value(&v).is_err());
    }

    #[test]
    fn end_rejects_transfer_without_to() {
        let v = json!({"type": "end", "reason": "done", "transfer": {"mode": "warm"}});
        assert!(Action::from_value(&v).is_err());
    }

    #[test]
    fn unknown_action_type_is_rejected() {
        let v = json!({"type": "whisper", "text": "hi"});
        assert!(matches!(
            Action::from_value(&v),
            Err(ActionError::UnknownType(_))
        ));
    }

    // ── Emit / parse fixed point ─────────────────────────────────────────────

    #[test]
    fn action_emit_parse_is_fixed_point() {
        let actions = vec![
            Action::speak_with_id("m1", "hello"),
            Action::Collect {
                schema: CollectSchema {
                    fields: vec![CollectField {
                        key: "city".into(),
                        field_type: FieldType::String,
                        required: true,
                    }],
                },
            },
            Action::End {
                reason: "caller done".into(),
                transfer: Some(Transfer {
                    to: "+15550001111".into(),
                    mode: Some(TransferMode::Cold),
                }),
            },
        ];
        for action in &actions {
            let back = Action::from_value(&action.to_value()).unwrap();
            assert_eq!(&back, action);
        }
    }

    #[test]
    fn structured_reply_reemit_reparse_is_fixed_point() {
        let reply = json!({"actions": [
            {"type": "speak", "message_id": "m1", "text": "hello", "barge_in": true}
        ]})
        .to_string();
        let first = parse_structured_reply(&reply).unwrap();
        let reemitted = json!({
            "actions": first.iter().map(Action::to_value).collect::<Vec<_>>()
        })
        .to_string();
        let second = parse_structured_reply(&reemitted).unwrap();
        assert_eq!(first, second);
    }

    // ── Structured-reply parsing ─────────────────────────────────────────────

    #[test]
    fn whole_text_candidate_wins() {
        let reply = r#"{"actions": [{"type": "end", "reason": "resolved"}]}"#;
        let actions = parse_structured_reply(reply).unwrap();
        assert_eq!(actions.len(), 1);
    }

    #[test]
    fn fenced_block_candidate_is_found() {
        let reply = "Here you go:\n```json\n{\"actions\": [{\"type\": \"speak\", \
                     \"message_id\": \"m1\", \"text\": \"hi\"}]}\n```\nDone.";
        let actions = parse_structured_reply(reply).unwrap();
        assert_eq!(actions.len(), 1);
    }

    #[test]
    fn second_fenced_block_is_tried_after_first_fails() {
        let reply = "```json\n{\"actions\": [{\"type\": \"nope\"}]}\n```\n\
                     ```json\n{\"actions\": [{\"type\": \"end\", \"reason\": \"ok\"}]}\n```";
        let actions = parse_structured_reply(reply).unwrap();
        assert!(matches!(actions[0], Action::End { .. }));
    }

    #[test]
    fn one_malformed_action_rejects_whole_envelope() {
        let reply = json!({"actions": [
            {"type": "speak", "message_id": "m1", "text": "fine"},
            {"type": "speak", "message_id": "m2", "text": ""}
        ]})
        .to_string();
        assert!(parse_structured_reply(&reply).is_none());
    }

    #[test]
    fn empty_actions_array_is_structured() {
        // An explicitly empty list is a valid agent decision, distinct from
        // "not structured".
        let actions = parse_structured_reply(r#"{"actions": []}"#).unwrap();
        assert!(actions.is_empty());
    }

    #[test]
    fn prose_is_not_structured() {
        assert!(parse_structured_reply("The weather is lovely today.").is_none());
    }

    #[test]
    fn json_without_actions_key_is_not_structured() {
        assert!(parse_structured_reply(r#"{"speak": "hi"}"#).is_none());
    }

    // ── Collect heuristic ────────────────────────────────────────────────────

    #[test]
    fn weather_plus_city_question_triggers_collect() {
        let action = infer_city_collect("What is the weather today?", "Which city?").unwrap();
        match action {
            Action::Collect { schema } => {
                assert_eq!(schema.fields.len(), 1);
                assert_eq!(schema.fields[0].key, "city");
                assert_eq!(schema.fields[0].field_type, FieldType::String);
                assert!(schema.fields[0].required);
            }
            other => panic!("expected collect, got {other:?}"),
        }
    }

    #[test]
    fn which_city_phrase_without_question_mark_triggers() {
        let action = infer_city_collect(
            "weather please",
            "Could you tell me which city you are in",
        );
        assert!(action.is_some());
    }

    #[test]
    fn no_weather_in_utterance_means_no_collect() {
        assert!(infer_city_collect("book a table", "Which city?").is_none());
    }

    #[test]
    fn reply_without_city_means_no_collect() {
        assert!(infer_city_collect("weather?", "It is sunny.").is_none());
    }

    #[test]
    fn city_statement_without_question_means_no_collect() {
        assert!(infer_city_collect("weather?", "The city is large.").is_none());
    }

    #[test]
    fn heuristic_is_case_insensitive() {
        assert!(infer_city_collect("WEATHER update", "WHAT CITY are you in?").is_some());
    }
}
