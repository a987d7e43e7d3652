// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

fn default_chunk_limit() -> usize {
    700
}
fn default_agent_timeout_secs() -> u64 {
    120
}

/// Top-level configuration.
///
/// ```yaml
/// channels:
///   fortivoice:
///     phone: "+15551230100"
///     url: "wss://pbx.example.com/agent"
///     reconnectDelayMs: 2000
///     defaultAccount: front-desk
///     accounts:
///       front-desk:
///         phone: "+15551230111"
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub channels: HashMap<String, ChannelConfig>,
}

/// One channel: shared account settings plus per-account overrides.
///
/// The shared fields are the channel-level defaults; each entry under
/// `accounts` overrides them field by field (per-account wins). The surface
/// keys are camel-cased (`reconnectDelayMs`, `helloWorldOnStart`,
/// `defaultAccount`) — that is the shape the host application writes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelConfig {
    #[serde(flatten)]
    pub shared: AccountSettings,
    #[serde(default)]
    pub accounts: HashMap<String, AccountSettings>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_account: Option<String>,
}

/// The per-account field set. Every field is optional here; defaults are
/// applied at resolution time so that "unset" and "set to the default" stay
/// distinguishable through the shared/account merge.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    /// Display name for logs and the accounts listing.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// E.164-ish number announced in the handshake (`^\+?[0-9]{7,15}$`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    /// WebSocket endpoint of the telephony peer (`ws://` or `wss://`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Delay between reconnect attempts, clamped to 250–60000 ms.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reconnect_delay_ms: Option<u64>,
    /// Speak a greeting as the first action of every `session.start`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hello_world_on_start: Option<bool>,
    /// Reply-text handling, passed through to the bridge adapter.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub markdown: Option<MarkdownConfig>,
    /// Agent routing for this account.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent: Option<AgentRouteConfig>,
}

impl AccountSettings {
    /// Field-wise merge: `self` (the per-account object) wins over `shared`.
    pub fn overlay(&self, shared: &AccountSettings) -> AccountSettings {
        AccountSettings {
            enabled: self.enabled.or(shared.enabled),
            name: self.name.clone().or_else(|| shared.name.clone()),
            phone: self.phone.clone().or_else(|| shared.phone.clone()),
            url: self.url.clone().or_else(|| shared.url.clone()),
            reconnect_delay_ms: self.reconnect_delay_ms.or(shared.reconnect_delay_ms),
            hello_world_on_start: self.hello_world_on_start.or(shared.hello_world_on_start),
            markdown: self.markdown.clone().or_else(|| shared.markdown.clone()),
            agent: self.agent.clone().or_else(|| shared.agent.clone()),
        }
    }

    /// True when any field is set — used to decide whether the default
    /// account id appears in listings.
    pub fn any_set(&self) -> bool {
        *self != AccountSettings::default()
    }
}

/// How agent reply text is prepared for speech.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkdownConfig {
    /// What to do with markdown tables (a table read aloud cell-by-cell is
    /// unintelligible).
    #[serde(default)]
    pub tables: TableMode,
    /// Boundary preference when splitting long prose into speak chunks.
    #[serde(default)]
    pub chunking: ChunkMode,
    /// Maximum characters per speak chunk.
    #[serde(default = "default_chunk_limit")]
    pub text_chunk_limit: usize,
}

impl Default for MarkdownConfig {
    fn default() -> Self {
        Self {
            tables: TableMode::Flatten,
            chunking: ChunkMode::Sentence,
            text_chunk_limit: default_chunk_limit(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TableMode {
    /// Rewrite each row as "header: value" prose.
    #[default]
    Flatten,
    /// Drop tables entirely.
    Strip,
    /// Pass tables through untouched.
    Keep,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkMode {
    /// Split on sentence boundaries, falling back to words for oversize
    /// sentences.
    #[default]
    Sentence,
    /// Split on word boundaries only.
    Word,
}

/// Routing to the agent back-end.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentRouteConfig {
    /// Agent id used in the routing context. Defaults to `main`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// HTTP endpoint of the agent back-end (for the bundled HTTP runtime).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Per-dispatch timeout in seconds.
    #[serde(default = "default_agent_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for AgentRouteConfig {
    fn default() -> Self {
        Self {
            id: None,
            url: None,
            timeout_secs: default_agent_timeout_secs(),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    // ── Defaults ─────────────────────────────────────────────────────────────

    #[test]
    fn default_config_has_no_channels() {
        let c = Config::default();
        assert!(c.channels.is_empty());
    }

    #[test]
    fn default_markdown_flattens_tables_at_700_chars() {
        let m = MarkdownConfig::default();
        assert_eq!(m.tables, TableMode::Flatten);
        assert_eq!(m.chunking, ChunkMode::Sentence);
        assert_eq!(m.text_chunk_limit, 700);
    }

    #[test]
    fn unset_account_settings_report_nothing_set() {
        assert!(!AccountSettings::default().any_set());
        let with_phone = AccountSettings {
            phone: Some("+12345678".into()),
            ..AccountSettings::default()
        };
        assert!(with_phone.any_set());
    }

    // ── YAML surface ─────────────────────────────────────────────────────────

    #[test]
    fn camel_case_surface_keys_deserialise() {
        let yaml = r#"
channels:
  fortivoice:
    phone: "+15551230100"
    url: "wss://pbx.example.com/agent"
    reconnectDelayMs: 5000
    helloWorldOnStart: false
    defaultAccount: front-desk
    accounts:
      front-desk:
        phone: "+15551230111"
"#;
        let c: Config = serde_yaml::from_str(yaml).unwrap();
        let ch = c.channels.get("fortivoice").unwrap();
        assert_eq!(ch.shared.reconnect_delay_ms, Some(5000));
        assert_eq!(ch.shared.hello_world_on_start, Some(false));
        assert_eq!(ch.default_account.as_deref(), Some("front-desk"));
        assert_eq!(
            ch.accounts.get("front-desk").unwrap().phone.as_deref(),
            Some("+15551230111")
        );
    }

    #[test]
    fn markdown_sub_object_round_trips() {
        let yaml = r#"
channels:
  fortivoice:
    markdown:
      tables: strip
      chunking: word
      textChunkLimit: 300
"#;
        let c: Config = serde_yaml::from_str(yaml).unwrap();
        let back_yaml = serde_yaml::to_string(&c).unwrap();
        let back: Config = serde_yaml::from_str(&back_yaml).unwrap();
        let md = back
            .channels
            .get("fortivoice")
            .unwrap()
            .shared
            .markdown
            .clone()
            .unwrap();
        assert_eq!(md.tables, TableMode::Strip);
        assert_eq!(md.chunking, ChunkMode::Word);
        assert_eq!(md.text_chunk_limit, 300);
    }

    #[test]
    fn omitted_markdown_fields_use_defaults() {
        let yaml = "channels:\n  fortivoice:\n    markdown:\n      tables: keep\n";
        let c: Config = serde_yaml::from_str(yaml).unwrap();
        let md = c
            .channels
            .get("fortivoice")
            .unwrap()
            .shared
            .markdown
            .clone()
            .unwrap();
        assert_eq!(md.tables, TableMode::Keep);
        assert_eq!(md.text_chunk_limit, 700, "serde default must fill in");
    }

    // ── overlay ──────────────────────────────────────────────────────────────

    #[test]
    fn overlay_account_wins_on_conflict() {
        let shared = AccountSettings {
            phone: Some("+11111111".into()),
            url: Some("wss://shared.example.com".into()),
            ..AccountSettings::default()
        };
        let account = AccountSettings {
            phone: Some("+22222222".into()),
            ..AccountSettings::default()
        };
        let merged = account.overlay(&shared);
        assert_eq!(merged.phone.as_deref(), Some("+22222222"));
        assert_eq!(merged.url.as_deref(), Some("wss://shared.example.com"));
    }

    #[test]
    fn overlay_keeps_shared_when_account_unset() {
        let shared = AccountSettings {
            reconnect_delay_ms: Some(3000),
            hello_world_on_start: Some(false),
            ..AccountSettings::default()
        };
        let merged = AccountSettings::default().overlay(&shared);
        assert_eq!(merged.reconnect_delay_ms, Some(3000));
        assert_eq!(merged.hello_world_on_start, Some(false));
    }
}
