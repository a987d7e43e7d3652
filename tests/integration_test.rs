// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! End-to-end scenarios: a real monitor dialing an in-process WebSocket
//! server, with a scripted agent runtime behind the bridge adapter.

use std::{sync::Arc, time::Duration};

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Map, Value};
use tokio::{net::TcpListener, sync::Mutex, task::JoinHandle};
use tokio_tungstenite::{accept_async, tungstenite::Message, WebSocketStream};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use voxbridge_agent::{AgentBridge, BridgeOptions, MockRuntime};
use voxbridge_config::{AgentRouteConfig, MarkdownConfig, ResolvedAccount};
use voxbridge_monitor::{ChannelMonitor, ChannelStatus, StatusHandle};
use voxbridge_protocol::{Envelope, FrameKind, Op, ResponsePayload};
use voxbridge_session::SessionStore;

const WAIT: Duration = Duration::from_secs(5);

/// Server half of one established bridge connection.
struct TestServer {
    ws: WebSocketStream<tokio::net::TcpStream>,
    seq: i64,
}

impl TestServer {
    /// Accept the bridge's connection and complete the handshake. Returns
    /// the client's `system.hello` request for assertions.
    async fn establish(listener: TcpListener) -> (TestServer, Envelope) {
        let (stream, _) = tokio::time::timeout(WAIT, listener.accept())
            .await
            .expect("bridge did not dial in time")
            .unwrap();
        let mut ws = accept_async(stream).await.unwrap();

        let hello = match tokio::time::timeout(WAIT, ws.next()).await {
            Ok(Some(Ok(Message::Text(text)))) => Envelope::parse(&text).unwrap(),
            other => panic!("expected hello frame, got {other:?}"),
        };
        assert_eq!(hello.op, "system.hello");

        let mut result = Map::new();
        result.insert("conn_id".into(), Value::from("C1"));
        result.insert(
            "server".into(),
            json!({"name": "test-pbx", "version": "0.0.0"}),
        );
        result.insert("heartbeat_sec".into(), Value::from(30));
        result.insert("dedupe_ttl_sec".into(), Value::from(300));
        let reply = Envelope::response_to(&hello, 1, ResponsePayload::ok(result));
        ws.send(Message::Text(reply.to_json())).await.unwrap();

        (TestServer { ws, seq: 1 }, hello)
    }

    /// Send one request and await the matching response.
    async fn request(&mut self, op: Op, session_id: Option<&str>, payload: Value) -> Envelope {
        self.seq += 1;
        let frame = Envelope::request(
            op,
            session_id.map(str::to_string),
            self.seq,
            payload.as_object().cloned().unwrap_or_default(),
        );
        let req_id = frame.req_id.clone().unwrap();
        self.ws.send(Message::Text(frame.to_json())).await.unwrap();
        self.await_response(&req_id).await
    }

    /// Send a raw request json (for ops outside the closed set).
    async fn raw_request(&mut self, op: &str, payload: Value) -> Envelope {
        self.seq += 1;
        let req_id = Uuid::new_v4().to_string();
        let frame = json!({
            "v": 1, "type": "req", "req_id": req_id, "seq": self.seq,
            "ts": "2026-08-01T00:00:00Z", "op": op, "payload": payload,
        });
        self.ws
            .send(Message::Text(frame.to_string()))
            .await
            .unwrap();
        self.await_response(&req_id).await
    }

    async fn await_response(&mut self, req_id: &str) -> Envelope {
        loop {
            match tokio::time::timeout(WAIT, self.ws.next()).await {
                Ok(Some(Ok(Message::Text(text)))) => {
                    let env = Envelope::parse(&text).unwrap();
                    if env.kind == FrameKind::Res && env.req_id.as_deref() == Some(req_id) {
                        return env;
                    }
                }
                other => panic!("expected response frame, got {other:?}"),
            }
        }
    }

    /// Send one event (no reply expected).
    async fn event(&mut self, op: Op, session_id: Option<&str>) {
        self.seq += 1;
        let frame = Envelope::event(op, session_id.map(str::to_string), self.seq, Map::new());
        self.ws.send(Message::Text(frame.to_json())).await.unwrap();
    }

    /// Wait for the bridge to close the socket; returns (code, reason).
    async fn await_close(&mut self) -> Option<(u16, String)> {
        loop {
            match tokio::time::timeout(WAIT, self.ws.next()).await {
                Ok(Some(Ok(Message::Close(frame)))) => {
                    return frame.map(|f| (u16::from(f.code), f.reason.to_string()));
                }
                Ok(Some(Ok(_))) => continue,
                _ => return None,
            }
        }
    }
}

struct Harness {
    server: TestServer,
    hello: Envelope,
    store: Arc<Mutex<SessionStore>>,
    status: StatusHandle,
    cancel: CancellationToken,
    run: JoinHandle<anyhow::Result<()>>,
}

async fn start_bridge(runtime: Arc<MockRuntime>) -> Harness {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let account = ResolvedAccount {
        channel: "fortivoice".into(),
        account_id: "default".into(),
        is_default: true,
        enabled: true,
        configured: true,
        name: None,
        phone: Some("+15551230100".into()),
        url: Some(format!("ws://{addr}")),
        reconnect_delay_ms: 250,
        hello_world_on_start: true,
        markdown: MarkdownConfig::default(),
        agent: AgentRouteConfig::default(),
    };
    let store = Arc::new(Mutex::new(SessionStore::new("fortivoice")));
    let bridge = AgentBridge::new(
        runtime,
        BridgeOptions {
            channel: "fortivoice".into(),
            account_id: "default".into(),
            markdown: MarkdownConfig::default(),
        },
    );
    let (status, _rx) = StatusHandle::new();
    let cancel = CancellationToken::new();
    let monitor = ChannelMonitor::new(
        account,
        store.clone(),
        Arc::new(bridge),
        status.clone(),
        cancel.clone(),
    );
    let run = tokio::spawn(monitor.run());

    let (server, hello) = TestServer::establish(listener).await;
    Harness {
        server,
        hello,
        store,
        status,
        cancel,
        run,
    }
}

impl Harness {
    async fn shutdown(mut self) {
        self.cancel.cancel();
        let _ = self.server.await_close().await;
        let _ = tokio::time::timeout(WAIT, self.run).await;
    }

    async fn wait_status(&self, check: impl Fn(&ChannelStatus) -> bool) {
        let deadline = tokio::time::Instant::now() + WAIT;
        loop {
            if check(&self.status.snapshot()) {
                return;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "status condition not reached, last: {:?}",
                self.status.snapshot()
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

fn result_of(res: &Envelope) -> &Map<String, Value> {
    assert_eq!(
        res.payload["ok"],
        Value::Bool(true),
        "payload: {:?}",
        res.payload
    );
    res.payload["result"].as_object().unwrap()
}

fn actions_of(res: &Envelope) -> &Vec<Value> {
    result_of(res)["actions"].as_array().unwrap()
}

// ── Scenarios ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn handshake_carries_phone_and_reports_connected() {
    let h = start_bridge(Arc::new(MockRuntime::new())).await;

    // Outbound hello: seq 1, client identity with phone, supported ops.
    assert_eq!(h.hello.seq, 1);
    assert_eq!(h.hello.payload["client"]["phone"], json!("+15551230100"));
    assert_eq!(h.hello.payload["client"]["name"], json!("voxbridge"));
    let ops = h.hello.payload["supports"]["ops"].as_array().unwrap();
    assert!(ops.contains(&json!("session.update")));

    h.wait_status(|s| s.connected && s.conn_id.as_deref() == Some("C1"))
        .await;

    h.shutdown().await;
}

#[tokio::test]
async fn requests_are_served_after_handshake() {
    let mut h = start_bridge(Arc::new(MockRuntime::new())).await;

    let res = h
        .server
        .request(Op::SystemPing, None, json!({"nonce": "n1"}))
        .await;
    assert_eq!(res.op, "system.ping");
    assert_eq!(result_of(&res)["nonce"], json!("n1"));

    h.shutdown().await;
}

#[tokio::test]
async fn session_start_greets_then_drains_queue() {
    let mut h = start_bridge(Arc::new(MockRuntime::new())).await;
    h.store.lock().await.queue_text("s1", "hi");

    let res = h
        .server
        .request(
            Op::SessionStart,
            Some("s1"),
            json!({"call": {"call_id": "c1", "direction": "inbound"}}),
        )
        .await;

    // Response inherits correlation id, op, and session id.
    assert_eq!(res.op, "session.start");
    assert_eq!(res.session_id.as_deref(), Some("s1"));

    let actions = actions_of(&res);
    assert_eq!(actions.len(), 2);
    assert!(actions[0]["text"]
        .as_str()
        .unwrap()
        .starts_with("Hello from voxbridge"));
    assert_eq!(actions[1]["text"], json!("hi"));
    assert!(actions[1]["message_id"]
        .as_str()
        .unwrap()
        .starts_with("queued-"));

    // The drain was atomic and one-shot.
    assert!(h.store.lock().await.consume_queue("s1").is_empty());

    h.shutdown().await;
}

#[tokio::test]
async fn realtime_update_yields_speak_then_collect() {
    let runtime = Arc::new(MockRuntime::new());
    runtime.push_reply(&["Which city?"]);
    let mut h = start_bridge(runtime).await;

    h.server
        .request(Op::SessionStart, Some("s1"), json!({}))
        .await;
    let res = h
        .server
        .request(
            Op::SessionUpdate,
            Some("s1"),
            json!({"realtime": {"turn_id": "t1",
                "input": {"type": "user_utterance", "text": "What is the weather today?"}}}),
        )
        .await;

    let actions = actions_of(&res);
    assert_eq!(actions.len(), 2);
    assert_eq!(actions[0]["type"], json!("speak"));
    assert_eq!(actions[0]["text"], json!("Which city?"));
    assert_eq!(actions[1]["type"], json!("collect"));
    assert_eq!(actions[1]["schema"]["fields"][0]["key"], json!("city"));

    h.shutdown().await;
}

#[tokio::test]
async fn transcript_partial_never_reaches_the_agent() {
    let runtime = Arc::new(MockRuntime::new());
    runtime.push_reply(&["must stay unconsumed"]);
    let mut h = start_bridge(runtime.clone()).await;

    let res = h
        .server
        .request(
            Op::SessionUpdate,
            Some("s1"),
            json!({"realtime": {"turn_id": "t1",
                "input": {"type": "transcript_partial", "text": "What is"}}}),
        )
        .await;

    assert!(actions_of(&res).is_empty());
    assert!(runtime.records().is_empty(), "agent must not be invoked");

    h.shutdown().await;
}

#[tokio::test]
async fn session_end_event_evicts_session_and_call_index() {
    let mut h = start_bridge(Arc::new(MockRuntime::new())).await;

    h.server
        .request(
            Op::SessionStart,
            Some("s1"),
            json!({"call": {"call_id": "c1"}}),
        )
        .await;
    h.server.event(Op::SessionEnd, Some("s1")).await;
    // The pump is serial: once the ping sent after the event is answered,
    // the event has been fully processed.
    h.server.request(Op::SystemPing, None, json!({})).await;

    {
        let store = h.store.lock().await;
        assert_eq!(store.resolve(Some("session:s1")), None);
        assert_eq!(store.resolve(Some("call:c1")), None);
    }

    h.shutdown().await;
}

#[tokio::test]
async fn unknown_op_is_answered_with_unsupported_op() {
    let mut h = start_bridge(Arc::new(MockRuntime::new())).await;

    let res = h.server.raw_request("call.mute", json!({})).await;
    assert_eq!(res.op, "call.mute", "response echoes the raw op");
    assert_eq!(res.payload["ok"], Value::Bool(false));
    assert_eq!(res.payload["error"]["code"], json!("unsupported_op"));

    h.shutdown().await;
}

#[tokio::test]
async fn response_sequence_numbers_increase_monotonically() {
    let mut h = start_bridge(Arc::new(MockRuntime::new())).await;

    let mut last_seq = h.hello.seq; // outbound seq 1 was the hello
    for _ in 0..3 {
        let res = h.server.request(Op::SystemPing, None, json!({})).await;
        assert!(res.seq > last_seq, "seq must strictly increase");
        last_seq = res.seq;
    }

    h.shutdown().await;
}

#[tokio::test]
async fn cancellation_closes_with_1000_aborted() {
    let mut h = start_bridge(Arc::new(MockRuntime::new())).await;
    h.wait_status(|s| s.connected).await;

    h.cancel.cancel();
    let close = h.server.await_close().await;
    assert_eq!(close, Some((1000, "aborted".to_string())));

    tokio::time::timeout(WAIT, h.run)
        .await
        .expect("monitor must stop after cancellation")
        .unwrap()
        .unwrap();
    let status = h.status.snapshot();
    assert!(!status.running);
    assert!(!status.connected);
    assert!(status.last_stop_at.is_some());
}
