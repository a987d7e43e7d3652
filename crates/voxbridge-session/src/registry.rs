// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::{collections::HashMap, sync::Arc};

use tokio::sync::Mutex;

use crate::store::{QueuedMessage, SessionStore};

/// Account-sharded session stores plus the outbound send surface.
///
/// Each account's monitor holds the `Arc` for its own shard; outbound-send
/// callers go through [`SessionRegistry::queue_text`]. Shards are created on
/// first touch.
pub struct SessionRegistry {
    channel: String,
    stores: Mutex<HashMap<String, Arc<Mutex<SessionStore>>>>,
}

#[derive(Debug, thiserror::Error)]
pub enum OutboundError {
    #[error("no session matches target {target:?} for account `{account_id}`")]
    NoSession {
        account_id: String,
        target: Option<String>,
    },
}

impl SessionRegistry {
    pub fn new(channel: &str) -> Self {
        Self {
            channel: channel.to_string(),
            stores: Mutex::new(HashMap::new()),
        }
    }

    /// The store shard for `account_id` (created on demand).
    pub async fn store_for(&self, account_id: &str) -> Arc<Mutex<SessionStore>> {
        let key = account_id.trim().to_lowercase();
        let mut stores = self.stores.lock().await;
        stores
            .entry(key)
            .or_insert_with(|| Arc::new(Mutex::new(SessionStore::new(&self.channel))))
            .clone()
    }

    /// Enqueue `text` to be spoken on the targeted session's next turn.
    ///
    /// `target` accepts `session:<id>`, `call:<id>`, a bare id, or `None`
    /// for the latest session; the queued message is drained into leading
    /// speak actions by the next `session.start` / `session.update`.
    pub async fn queue_text(
        &self,
        account_id: &str,
        target: Option<&str>,
        text: &str,
    ) -> Result<QueuedMessage, OutboundError> {
        let store = self.store_for(account_id).await;
        let mut store = store.lock().await;
        let session_id = store.resolve(target).ok_or_else(|| OutboundError::NoSession {
            account_id: account_id.to_string(),
            target: target.map(str::to_string),
        })?;
        Ok(store.queue_text(&session_id, text))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
