// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Account resolution: merge the channel-level shared settings with one
//! account's overrides and derive the effective connection parameters.
//!
//! `enabled` needs both layers (either level saying `false` wins), so it is
//! computed from the unmerged objects rather than the overlay. `configured`
//! additionally requires a parseable `ws://`/`wss://` URL and an E.164-ish
//! phone — an account failing either check never dials.

use std::sync::OnceLock;

use regex::Regex;
use url::Url;

use crate::schema::{AccountSettings, AgentRouteConfig, ChannelConfig, Config, MarkdownConfig};

/// The literal account id used when nothing else is configured.
pub const DEFAULT_ACCOUNT_ID: &str = "default";

const RECONNECT_DELAY_DEFAULT_MS: u64 = 2_000;
const RECONNECT_DELAY_MIN_MS: u64 = 250;
const RECONNECT_DELAY_MAX_MS: u64 = 60_000;

/// Effective settings for one account, ready for the monitor.
#[derive(Debug, Clone)]
pub struct ResolvedAccount {
    pub channel: String,
    pub account_id: String,
    /// True when this is the channel's default account (env fallback applies).
    pub is_default: bool,
    pub enabled: bool,
    /// True when both url and phone are present and valid.
    pub configured: bool,
    pub name: Option<String>,
    pub phone: Option<String>,
    pub url: Option<String>,
    pub reconnect_delay_ms: u64,
    pub hello_world_on_start: bool,
    pub markdown: MarkdownConfig,
    pub agent: AgentRouteConfig,
}

pub fn normalize_account_id(raw: &str) -> String {
    raw.trim().to_lowercase()
}

fn phone_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // Unwrap is fine: the pattern is a compile-time constant.
    RE.get_or_init(|| Regex::new(r"^\+?[0-9]{7,15}$").unwrap())
}

fn valid_phone(phone: &str) -> bool {
    phone_re().is_match(phone)
}

fn valid_ws_url(raw: &str) -> bool {
    Url::parse(raw)
        .map(|u| matches!(u.scheme(), "ws" | "wss"))
        .unwrap_or(false)
}

fn account_entry<'a>(channel: &'a ChannelConfig, id: &str) -> Option<&'a AccountSettings> {
    channel
        .accounts
        .iter()
        .find(|(key, _)| normalize_account_id(key) == id)
        .map(|(_, settings)| settings)
}

/// The id env fallback applies to: the configured `defaultAccount`, else the
/// literal default id.
fn default_id(channel: &ChannelConfig) -> String {
    channel
        .default_account
        .as_deref()
        .map(normalize_account_id)
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| DEFAULT_ACCOUNT_ID.to_string())
}

fn pick_account_id(channel: &ChannelConfig, requested: Option<&str>) -> String {
    if let Some(id) = requested.map(normalize_account_id).filter(|s| !s.is_empty()) {
        return id;
    }
    if let Some(id) = channel
        .default_account
        .as_deref()
        .map(normalize_account_id)
        .filter(|s| !s.is_empty())
    {
        return id;
    }
    if account_entry(channel, DEFAULT_ACCOUNT_ID).is_some() {
        return DEFAULT_ACCOUNT_ID.to_string();
    }
    channel
        .accounts
        .keys()
        .map(|k| normalize_account_id(k))
        .min()
        .unwrap_or_else(|| DEFAULT_ACCOUNT_ID.to_string())
}

/// Resolve the effective settings for one account of `channel_name`.
pub fn resolve_account(
    config: &Config,
    channel_name: &str,
    requested: Option<&str>,
) -> ResolvedAccount {
    static EMPTY: OnceLock<ChannelConfig> = OnceLock::new();
    let channel = config
        .channels
        .get(channel_name)
        .unwrap_or_else(|| EMPTY.get_or_init(ChannelConfig::default));

    let account_id = pick_account_id(channel, requested);
    let is_default = account_id == default_id(channel);

    let account = account_entry(channel, &account_id)
        .cloned()
        .unwrap_or_default();
    let merged = account.overlay(&channel.shared);

    // Either level saying `false` disables the account.
    let enabled = channel.shared.enabled != Some(false) && account.enabled != Some(false);

    let mut url = merged.url.clone();
    let mut phone = merged.phone.clone();
    if is_default {
        let prefix = channel_name.to_uppercase().replace('-', "_");
        if url.is_none() {
            url = std::env::var(format!("{prefix}_WS_URL")).ok().filter(|s| !s.is_empty());
        }
        if phone.is_none() {
            phone = std::env::var(format!("{prefix}_PHONE")).ok().filter(|s| !s.is_empty());
        }
    }

    let configured = url.as_deref().is_some_and(valid_ws_url)
        && phone.as_deref().is_some_and(valid_phone);

    ResolvedAccount {
        channel: channel_name.to_string(),
        account_id,
        is_default,
        enabled,
        configured,
        name: merged.name.clone(),
        phone,
        url,
        reconnect_delay_ms: merged
            .reconnect_delay_ms
            .unwrap_or(RECONNECT_DELAY_DEFAULT_MS)
            .clamp(RECONNECT_DELAY_MIN_MS, RECONNECT_DELAY_MAX_MS),
        hello_world_on_start: merged.hello_world_on_start.unwrap_or(true),
        markdown: merged.markdown.unwrap_or_default(),
        agent: merged.agent.unwrap_or_default(),
    }
}

/// All account ids for a channel: the configured ids, plus the default id
/// when any shared field is set or no accounts exist at all. Sorted.
pub fn list_account_ids(config: &Config, channel_name: &str) -> Vec<String> {
    let Some(channel) = config.channels.get(channel_name) else {
        return vec![DEFAULT_ACCOUNT_ID.to_string()];
    };
    let mut ids: Vec<String> = channel
        .accounts
        .keys()
        .map(|k| normalize_account_id(k))
        .collect();
    if channel.shared.any_set() || channel.accounts.is_empty() {
        ids.push(default_id(channel));
    }
    ids.sort();
    ids.dedup();
    ids
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
