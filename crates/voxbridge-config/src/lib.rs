// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Configuration for the bridge: a two-level `channels.<channel>` structure
//! with shared fields and per-account overrides, loaded from deep-merged
//! YAML layers, and an account resolver that derives the effective
//! connection parameters (enabled / configured / url / phone / delays) for
//! one account.

mod loader;
mod resolve;
mod schema;

pub use loader::load;
pub use resolve::{
    list_account_ids, normalize_account_id, resolve_account, ResolvedAccount, DEFAULT_ACCOUNT_ID,
};
pub use schema::{
    AccountSettings, AgentRouteConfig, ChannelConfig, ChunkMode, Config, MarkdownConfig, TableMode,
};
