// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;

/// How and when the last connection ended.
#[derive(Debug, Clone, Serialize)]
pub struct DisconnectInfo {
    pub at: DateTime<Utc>,
    /// Close status code, when the peer sent one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Latest-state snapshot of one account's monitor.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ChannelStatus {
    pub running: bool,
    pub connected: bool,
    /// Connection id assigned by the peer in the handshake result.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conn_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_connect_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_disconnect: Option<DisconnectInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_inbound_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_outbound_at: Option<DateTime<Utc>>,
    pub requests_handled: u64,
    pub actions_emitted: u64,
    pub handler_failures: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_stop_at: Option<DateTime<Utc>>,
}

/// Write side of the status sink. The monitor writes; everyone else watches.
#[derive(Clone)]
pub struct StatusHandle {
    tx: watch::Sender<ChannelStatus>,
}

impl StatusHandle {
    pub fn new() -> (StatusHandle, watch::Receiver<ChannelStatus>) {
        let (tx, rx) = watch::channel(ChannelStatus::default());
        (StatusHandle { tx }, rx)
    }

    /// Apply a mutation and notify watchers.
    pub fn update(&self, f: impl FnOnce(&mut ChannelStatus)) {
        self.tx.send_modify(f);
    }

    pub fn snapshot(&self) -> ChannelStatus {
        self.tx.borrow().clone()
    }
}

impl Default for StatusHandle {
    fn default() -> Self {
        Self::new().0
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
