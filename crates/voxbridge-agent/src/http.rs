// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! HTTP driver for the agent back-end.
//!
//! Dispatches go to `POST {base}/v1/agents/{id}/invoke`; the reply body is
//! NDJSON, one object per line: `{"delta": "..."}` text chunks, an optional
//! `{"done": true}` terminator, `{"error": "..."}` for a server-side
//! failure. Lines may be split across TCP chunks, so a persistent buffer
//! carries the partial line over; only complete `\n`-terminated lines are
//! parsed.

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use futures::StreamExt;
use serde_json::Value;
use tracing::debug;
use voxbridge_config::AgentRouteConfig;

use crate::runtime::{AgentRuntime, InboundRecord, ReplyStream, RouteContext};

const DEFAULT_AGENT_ID: &str = "main";

pub struct HttpAgentRuntime {
    client: reqwest::Client,
    base_url: String,
    agent_id: String,
}

impl HttpAgentRuntime {
    pub fn from_config(route: &AgentRouteConfig) -> anyhow::Result<Self> {
        let base_url = route
            .url
            .clone()
            .ok_or_else(|| anyhow!("agent.url is not configured"))?
            .trim_end_matches('/')
            .to_string();
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(route.timeout_secs))
            .build()
            .context("building agent HTTP client")?;
        Ok(Self {
            client,
            base_url,
            agent_id: route.id.clone().unwrap_or_else(|| DEFAULT_AGENT_ID.to_string()),
        })
    }
}

#[async_trait]
impl AgentRuntime for HttpAgentRuntime {
    fn agent_id(&self) -> &str {
        &self.agent_id
    }

    async fn record_inbound(&self, record: InboundRecord) -> anyhow::Result<()> {
        let url = format!("{}/v1/inbound", self.base_url);
        self.client
            .post(&url)
            .json(&record)
            .send()
            .await
            .context("recording inbound turn")?
            .error_for_status()
            .context("agent rejected inbound record")?;
        Ok(())
    }

    async fn dispatch(&self, route: &RouteContext, prompt: &str) -> anyhow::Result<ReplyStream> {
        let url = format!("{}/v1/agents/{}/invoke", self.base_url, route.agent_id);
        debug!(url = %url, session_key = %route.session_key, "dispatching to agent");
        let resp = self
            .client
            .post(&url)
            .json(&serde_json::json!({
                "session_key": route.session_key,
                "prompt": prompt,
            }))
            .send()
            .await
            .context("dispatching to agent")?
            .error_for_status()
            .context("agent dispatch failed")?;

        let mut buf = String::new();
        let stream = resp.bytes_stream().flat_map(move |chunk| {
            let events = match chunk {
                Ok(bytes) => {
                    buf.push_str(&String::from_utf8_lossy(&bytes));
                    drain_complete_reply_lines(&mut buf)
                }
                Err(e) => vec![Err(anyhow!("agent stream error: {e}"))],
            };
            futures::stream::iter(events)
        });
        Ok(Box::pin(stream))
    }
}

/// Drain all complete `\n`-terminated lines from `buf` and parse each as one
/// reply event. Unparseable lines and `{"done": true}` markers are skipped.
fn drain_complete_reply_lines(buf: &mut String) -> Vec<anyhow::Result<String>> {
    let mut events = Vec::new();
    while let Some(pos) = buf.find('\n') {
        let line = buf[..pos].trim().to_string();
        buf.drain(..=pos);
        if line.is_empty() {
            continue;
        }
        let Ok(value) = serde_json::from_str::<Value>(&line) else {
            debug!(line = %line, "skipping unparseable agent reply line");
            continue;
        };
        if let Some(delta) = value.get("delta").and_then(Value::as_str) {
            events.push(Ok(delta.to_string()));
        } else if let Some(error) = value.get("error").and_then(Value::as_str) {
            events.push(Err(anyhow!("agent error: {error}")));
        }
        // {"done": true} and anything else fall through silently.
    }
    events
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
