// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! The agent bridge adapter: everything between an inbound caller utterance
//! and the list of voice actions the monitor puts in its response.
//!
//! The connection monitor depends on the [`AgentRuntime`] capability trait,
//! injected at construction — route resolution, inbound-turn recording, and
//! reply dispatch. [`AgentBridge`] drives the reply text through the
//! pipeline: block buffering, markdown-table sanitising, media notices,
//! structured-action parsing, the collect heuristic, and speak chunking.

mod adapter;
mod blocks;
mod chunk;
mod http;
mod markdown;
mod runtime;

pub use adapter::{AgentBridge, BridgeOptions, VOICE_ACTION_INSTRUCTIONS};
pub use blocks::BlockBuffer;
pub use chunk::chunk_text;
pub use http::HttpAgentRuntime;
pub use markdown::{append_media_notices, sanitize_tables};
pub use runtime::{AgentRuntime, InboundRecord, MockRuntime, PeerRef, ReplyStream, RouteContext};
