// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Wire protocol between the voice front-end and the bridge.
//!
//! Two halves:
//! - [`envelope`] — the version-1 JSON frame every message travels in
//!   (request / response / event, correlation ids, sequence numbers).
//! - [`action`] — the tagged union of voice actions an agent reply is
//!   coerced into (`speak` / `collect` / `end`), plus the validating
//!   parser for agent-authored JSON.
//!
//! Envelopes and actions are plain values: cheap to clone, never shared
//! mutably across tasks.

pub mod action;
pub mod envelope;

pub use action::{
    infer_city_collect, parse_structured_reply, Action, ActionError, CollectField, CollectSchema,
    FieldType, Transfer, TransferMode, VoiceHint,
};
pub use envelope::{
    code, now_ts, Envelope, EnvelopeError, ErrorBody, FrameKind, Op, ResponsePayload,
    PROTOCOL_VERSION,
};
