// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use futures::StreamExt;
use tracing::debug;
use voxbridge_config::MarkdownConfig;
use voxbridge_protocol::{infer_city_collect, parse_structured_reply, Action};

use crate::{
    blocks::BlockBuffer,
    chunk::chunk_text,
    markdown::{append_media_notices, sanitize_tables},
    runtime::{AgentRuntime, InboundRecord, PeerRef},
};

/// Fixed instruction block appended to every dispatched prompt. Tells the
/// agent how to answer so the reply parses as structured actions.
pub const VOICE_ACTION_INSTRUCTIONS: &str = "\
You are answering on a voice call. Reply with JSON only, no surrounding \
prose: an object {\"actions\": [...]} where each action is one of:\n\
- {\"type\": \"speak\", \"message_id\": \"<unique id>\", \"text\": \"<line to say>\", \
\"barge_in\": true}\n\
- {\"type\": \"collect\", \"schema\": {\"fields\": [{\"key\": \"<slot>\", \"type\": \
\"string|number|integer|boolean|date|datetime\", \"required\": true}]}}\n\
- {\"type\": \"end\", \"reason\": \"<why>\", \"transfer\": {\"to\": \"<number>\", \
\"mode\": \"warm|cold\"}} (transfer is optional)\n\
message_id and non-empty text are required on every speak. If no action is \
needed, reply {\"actions\": []}.";

/// Options the adapter needs per account.
#[derive(Debug, Clone)]
pub struct BridgeOptions {
    pub channel: String,
    pub account_id: String,
    pub markdown: MarkdownConfig,
}

/// Turns one inbound utterance into the agent's voice actions.
pub struct AgentBridge {
    runtime: Arc<dyn AgentRuntime>,
    opts: BridgeOptions,
}

impl AgentBridge {
    pub fn new(runtime: Arc<dyn AgentRuntime>, opts: BridgeOptions) -> Self {
        Self { runtime, opts }
    }

    /// Resolve routing, record the turn, dispatch, and coerce the streamed
    /// reply into actions.
    ///
    /// `prior_seen_at` is the session's previous `last_seen_at`, passed to
    /// the agent as conversation-gap context.
    pub async fn handle_utterance(
        &self,
        session_id: &str,
        user_text: &str,
        prior_seen_at: Option<DateTime<Utc>>,
    ) -> anyhow::Result<Vec<Action>> {
        let peer = PeerRef::direct(format!("session:{session_id}"));
        let route = self
            .runtime
            .resolve_route(&self.opts.channel, &self.opts.account_id, &peer);
        let now = Utc::now();
        let prompt = format_prompt(&self.opts, &peer, user_text, now, prior_seen_at);

        self.runtime
            .record_inbound(InboundRecord {
                session_key: route.session_key.clone(),
                channel: self.opts.channel.clone(),
                account_id: self.opts.account_id.clone(),
                peer_id: peer.id.clone(),
                text: user_text.to_string(),
                received_at: now,
            })
            .await?;

        let mut stream = self.runtime.dispatch(&route, &prompt).await?;
        let mut buffer = BlockBuffer::new();
        let mut actions = Vec::new();
        while let Some(delta) = stream.next().await {
            let delta = delta?;
            for block in buffer.push(&delta) {
                self.process_block(user_text, &block, &mut actions);
            }
        }
        if let Some(rest) = buffer.finish() {
            self.process_block(user_text, &rest, &mut actions);
        }
        debug!(
            session = session_id,
            actions = actions.len(),
            "agent reply coerced to actions"
        );
        Ok(actions)
    }

    /// One delivered block: sanitise, annotate media, then structured parse
    /// → collect heuristic → speak chunking.
    fn process_block(&self, user_text: &str, block: &str, actions: &mut Vec<Action>) {
        let md = &self.opts.markdown;
        let block = sanitize_tables(block, md.tables);
        let block = append_media_notices(&block);

        if let Some(mut structured) = parse_structured_reply(&block) {
            actions.append(&mut structured);
            return;
        }

        let collect = infer_city_collect(user_text, &block);
        for chunk in chunk_text(&block, md.text_chunk_limit, md.chunking) {
            actions.push(Action::speak(chunk));
        }
        if let Some(collect) = collect {
            actions.push(collect);
        }
    }
}

fn format_prompt(
    opts: &BridgeOptions,
    peer: &PeerRef,
    user_text: &str,
    now: DateTime<Utc>,
    prior_seen_at: Option<DateTime<Utc>>,
) -> String {
    let last_turn = prior_seen_at
        .map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true))
        .unwrap_or_else(|| "none".to_string());
    format!(
        "[voice call via {channel}] [account: {account}] [peer: {peer}] \
         [received: {received}] [last_turn: {last_turn}]\n{user_text}\n\n{instructions}",
        channel = opts.channel,
        account = opts.account_id,
        peer = peer.id,
        received = now.to_rfc3339_opts(SecondsFormat::Secs, true),
        instructions = VOICE_ACTION_INSTRUCTIONS,
    )
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::MockRuntime;
    use voxbridge_config::{ChunkMode, TableMode};

    fn bridge_with(runtime: Arc<MockRuntime>) -> AgentBridge {
        AgentBridge::new(
            runtime,
            BridgeOptions {
                channel: "fortivoice".into(),
                account_id: "default".into(),
                markdown: MarkdownConfig::default(),
            },
        )
    }

    #[tokio::test]
    async fn structured_reply_becomes_actions() {
        let runtime = Arc::new(MockRuntime::new());
        runtime.push_reply(&[
            r#"{"actions": [{"type": "speak", "message_id": "m1", "text": "Booked."}]}"#,
        ]);
        let bridge = bridge_with(runtime);
        let actions = bridge
            .handle_utterance("s1", "book a table", None)
            .await
            .unwrap();
        assert_eq!(actions.len(), 1);
        match &actions[0] {
            Action::Speak { message_id, text, .. } => {
                assert_eq!(message_id, "m1");
                assert_eq!(text, "Booked.");
            }
            other => panic!("expected speak, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn prose_weather_reply_gets_speak_then_collect() {
        let runtime = Arc::new(MockRuntime::new());
        runtime.push_reply(&["Which city?"]);
        let bridge = bridge_with(runtime);
        let actions = bridge
            .handle_utterance("s1", "What is the weather today?", None)
            .await
            .unwrap();
        assert_eq!(actions.len(), 2);
        assert!(matches!(&actions[0], Action::Speak { text, .. } if text == "Which city?"));
        assert!(matches!(&actions[1], Action::Collect { .. }));
    }

    #[tokio::test]
    async fn long_prose_is_chunked_into_multiple_speaks() {
        let runtime = Arc::new(MockRuntime::new());
        let long = "word ".repeat(400);
        let deltas = [long.as_str()];
        runtime.push_reply(&deltas);
        let bridge = bridge_with(runtime);
        let actions = bridge.handle_utterance("s1", "tell me", None).await.unwrap();
        assert!(actions.len() > 1);
        for action in &actions {
            match action {
                Action::Speak { text, .. } => assert!(text.chars().count() <= 700),
                other => panic!("expected only speaks, got {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn blocks_are_processed_in_order() {
        let runtime = Arc::new(MockRuntime::new());
        runtime.push_reply(&["First paragraph.\n\nSecond", " paragraph."]);
        let bridge = bridge_with(runtime);
        let actions = bridge.handle_utterance("s1", "hello", None).await.unwrap();
        let texts: Vec<&str> = actions
            .iter()
            .map(|a| match a {
                Action::Speak { text, .. } => text.as_str(),
                other => panic!("expected speak, got {other:?}"),
            })
            .collect();
        assert_eq!(texts, vec!["First paragraph.", "Second paragraph."]);
    }

    #[tokio::test]
    async fn empty_reply_gives_no_actions() {
        let runtime = Arc::new(MockRuntime::new());
        let bridge = bridge_with(runtime);
        let actions = bridge.handle_utterance("s1", "hello", None).await.unwrap();
        assert!(actions.is_empty());
    }

    #[tokio::test]
    async fn inbound_turn_is_recorded_before_dispatch() {
        let runtime = Arc::new(MockRuntime::new());
        runtime.push_reply(&["ok"]);
        let bridge = bridge_with(runtime.clone());
        bridge.handle_utterance("s1", "hello there", None).await.unwrap();
        let records = runtime.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].text, "hello there");
        assert_eq!(records[0].peer_id, "session:s1");
        assert!(records[0].session_key.contains("session:s1"));
    }

    #[tokio::test]
    async fn tables_are_flattened_before_speaking() {
        let runtime = Arc::new(MockRuntime::new());
        runtime.push_reply(&["| Day | Hours |\n| --- | --- |\n| Monday | 9-17 |"]);
        let bridge = bridge_with(runtime);
        let actions = bridge.handle_utterance("s1", "opening hours?", None).await.unwrap();
        let Action::Speak { text, .. } = &actions[0] else {
            panic!("expected speak");
        };
        assert!(text.contains("Day: Monday"));
        assert!(!text.contains('|'));
    }

    #[tokio::test]
    async fn media_urls_are_announced_not_transported() {
        let runtime = Arc::new(MockRuntime::new());
        runtime.push_reply(&["Here is the map: ![map](https://example.com/map.png)"]);
        let bridge = bridge_with(runtime);
        let actions = bridge.handle_utterance("s1", "where are you?", None).await.unwrap();
        let Action::Speak { text, .. } = &actions[0] else {
            panic!("expected speak");
        };
        assert!(text.contains("[media: https://example.com/map.png]"));
    }

    #[tokio::test]
    async fn word_chunking_mode_is_honoured() {
        let runtime = Arc::new(MockRuntime::new());
        runtime.push_reply(&["alpha beta gamma delta epsilon zeta"]);
        let bridge = AgentBridge::new(
            runtime,
            BridgeOptions {
                channel: "fortivoice".into(),
                account_id: "default".into(),
                markdown: MarkdownConfig {
                    tables: TableMode::Flatten,
                    chunking: ChunkMode::Word,
                    text_chunk_limit: 12,
                },
            },
        );
        let actions = bridge.handle_utterance("s1", "list greek", None).await.unwrap();
        assert!(actions.len() > 1);
        for action in &actions {
            let Action::Speak { text, .. } = action else {
                panic!("expected speak");
            };
            assert!(text.chars().count() <= 12);
        }
    }

    #[test]
    fn prompt_carries_metadata_and_instructions() {
        let opts = BridgeOptions {
            channel: "fortivoice".into(),
            account_id: "default".into(),
            markdown: MarkdownConfig::default(),
        };
        let peer = PeerRef::direct("session:s1");
        let prompt = format_prompt(&opts, &peer, "hello", Utc::now(), None);
        assert!(prompt.contains("[voice call via fortivoice]"));
        assert!(prompt.contains("[peer: session:s1]"));
        assert!(prompt.contains("[last_turn: none]"));
        assert!(prompt.contains("hello"));
        assert!(prompt.ends_with(VOICE_ACTION_INSTRUCTIONS));
    }
}
