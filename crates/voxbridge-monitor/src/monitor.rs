// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::{sync::Arc, time::Duration};

use anyhow::bail;
use chrono::Utc;
use futures_util::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use serde_json::{Map, Value};
use tokio::{net::TcpStream, sync::Mutex};
use tokio_tungstenite::{
    connect_async,
    tungstenite::protocol::{frame::coding::CloseCode, CloseFrame},
    tungstenite::Message,
    MaybeTlsStream, WebSocketStream,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;
use voxbridge_agent::AgentBridge;
use voxbridge_config::ResolvedAccount;
use voxbridge_protocol::{Envelope, FrameKind, Op, ResponsePayload};
use voxbridge_session::SessionStore;

use crate::{
    handlers::{handle_frame, HandlerContext},
    status::{DisconnectInfo, StatusHandle},
};

/// How long the peer gets to answer our `system.hello`.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

const CLOSE_ABORTED: u16 = 1000;
const CLOSE_HANDSHAKE_FAILED: u16 = 1011;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

enum ConnOutcome {
    /// Cancellation fired; leave the connect loop.
    Aborted,
    /// Connection ended for any other reason; redial after the delay.
    Dropped,
}

enum HandshakeOutcome {
    /// The peer accepted our hello; carries its connection id.
    Established(String),
    /// Cancellation fired while waiting; no error, no status update.
    Aborted,
}

/// One account's connection monitor. Owns the socket for the lifetime of
/// each connection; everything per-connection (sequence counter, conn id,
/// handshake state) lives inside [`ChannelMonitor::run`].
pub struct ChannelMonitor {
    account: ResolvedAccount,
    store: Arc<Mutex<SessionStore>>,
    bridge: Arc<AgentBridge>,
    status: StatusHandle,
    cancel: CancellationToken,
    handshake_timeout: Duration,
}

impl ChannelMonitor {
    pub fn new(
        account: ResolvedAccount,
        store: Arc<Mutex<SessionStore>>,
        bridge: Arc<AgentBridge>,
        status: StatusHandle,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            account,
            store,
            bridge,
            status,
            cancel,
            handshake_timeout: HANDSHAKE_TIMEOUT,
        }
    }

    /// Shorten the handshake timer (tests).
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Run the connect loop until cancelled.
    ///
    /// Fails fast (before any dial) when the account is not configured;
    /// after that every failure is absorbed: logged, pushed to the status
    /// sink, and retried after the reconnect delay.
    pub async fn run(self) -> anyhow::Result<()> {
        let account_id = self.account.account_id.clone();
        if !self.account.enabled {
            info!(account = %account_id, "account disabled, not connecting");
            return Ok(());
        }
        let (Some(url), true) = (self.account.url.clone(), self.account.configured) else {
            let message = format!(
                "account `{account_id}` is not configured (valid ws/wss url and phone required)"
            );
            self.status.update(|s| s.last_error = Some(message.clone()));
            bail!(message);
        };

        self.status.update(|s| s.running = true);
        let delay = Duration::from_millis(self.account.reconnect_delay_ms);

        loop {
            if self.cancel.is_cancelled() {
                break;
            }
            info!(account = %account_id, url = %url, "dialing");
            let outcome = tokio::select! {
                _ = self.cancel.cancelled() => ConnOutcome::Aborted,
                connected = connect_async(url.as_str()) => match connected {
                    Ok((ws, _)) => self.run_connection(ws).await,
                    Err(e) => {
                        warn!(account = %account_id, "dial failed: {e}");
                        self.record_disconnect(None, Some(format!("dial failed: {e}")));
                        ConnOutcome::Dropped
                    }
                },
            };
            if matches!(outcome, ConnOutcome::Aborted) {
                break;
            }
            // Cancellation wakes the delay immediately.
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        info!(account = %account_id, "monitor stopped");
        self.status.update(|s| {
            s.running = false;
            s.connected = false;
            s.last_stop_at = Some(Utc::now());
        });
        Ok(())
    }

    /// One connection: handshake, then the serial frame pump.
    async fn run_connection(&self, ws: WsStream) -> ConnOutcome {
        let (mut sink, mut source) = ws.split();
        let mut seq: i64 = 0;

        let server_conn_id = match self.handshake(&mut sink, &mut source, &mut seq).await {
            Ok(HandshakeOutcome::Established(conn_id)) => conn_id,
            Ok(HandshakeOutcome::Aborted) => {
                let _ = sink.send(close_frame(CLOSE_ABORTED, "aborted")).await;
                return ConnOutcome::Aborted;
            }
            Err(e) => {
                warn!(account = %self.account.account_id, "handshake failed: {e}");
                let _ = sink
                    .send(close_frame(CLOSE_HANDSHAKE_FAILED, "handshake_failed"))
                    .await;
                self.status
                    .update(|s| s.last_error = Some(format!("handshake failed: {e}")));
                self.record_disconnect(Some(CLOSE_HANDSHAKE_FAILED), Some(e.to_string()));
                return ConnOutcome::Dropped;
            }
        };

        info!(account = %self.account.account_id, conn = %server_conn_id, "connected");
        self.status.update(|s| {
            s.connected = true;
            s.conn_id = Some(server_conn_id);
            s.last_connect_at = Some(Utc::now());
            s.last_error = None;
        });

        let cx = HandlerContext {
            account: self.account.clone(),
            conn_id: format!("vc-{}", Uuid::new_v4()),
            store: self.store.clone(),
            bridge: self.bridge.clone(),
            status: self.status.clone(),
        };

        // The pump is strictly serial: the next frame is not read until the
        // previous handler completed, so handlers never interleave.
        loop {
            let msg = tokio::select! {
                _ = self.cancel.cancelled() => {
                    let _ = sink.send(close_frame(CLOSE_ABORTED, "aborted")).await;
                    return ConnOutcome::Aborted;
                }
                msg = source.next() => msg,
            };
            match msg {
                Some(Ok(Message::Text(text))) => {
                    if let Err(()) = self.pump_text(&cx, &mut sink, &mut seq, &text).await {
                        self.record_disconnect(None, Some("send failed".into()));
                        return ConnOutcome::Dropped;
                    }
                }
                Some(Ok(Message::Ping(data))) => {
                    let _ = sink.send(Message::Pong(data)).await;
                }
                Some(Ok(Message::Close(frame))) => {
                    let status = frame.as_ref().map(|f| u16::from(f.code));
                    info!(account = %self.account.account_id, ?status, "peer closed connection");
                    self.record_disconnect(status, None);
                    return ConnOutcome::Dropped;
                }
                Some(Ok(_)) => {} // binary frames ignored
                Some(Err(e)) => {
                    warn!(account = %self.account.account_id, "socket error: {e}");
                    self.record_disconnect(None, Some(e.to_string()));
                    return ConnOutcome::Dropped;
                }
                None => {
                    self.record_disconnect(None, Some("stream ended".into()));
                    return ConnOutcome::Dropped;
                }
            }
        }
    }

    /// Parse and dispatch one text frame. `Err(())` means the reply could
    /// not be sent and the connection is gone.
    async fn pump_text(
        &self,
        cx: &HandlerContext,
        sink: &mut WsSink,
        seq: &mut i64,
        text: &str,
    ) -> Result<(), ()> {
        let frame = match Envelope::parse(text) {
            Ok(frame) => frame,
            Err(e) => {
                // Unparseable frames are logged and dropped, never answered.
                warn!(account = %self.account.account_id, "dropping malformed frame: {e}");
                return Ok(());
            }
        };
        // Inbound sequence numbers are logged but never enforced.
        debug!(
            account = %self.account.account_id,
            seq = frame.seq,
            op = %frame.op,
            kind = ?frame.kind,
            "inbound frame"
        );
        let is_request = frame.kind == FrameKind::Req;
        self.status.update(|s| s.last_inbound_at = Some(Utc::now()));

        match handle_frame(cx, &frame).await {
            Ok(Some(payload)) => {
                *seq += 1;
                let reply = Envelope::response_to(&frame, *seq, payload);
                if sink.send(Message::Text(reply.to_json())).await.is_err() {
                    return Err(());
                }
            }
            Ok(None) => {}
            Err(e) => {
                // Handler failures keep the connection; the request simply
                // gets no reply.
                warn!(account = %self.account.account_id, op = %frame.op, "handler failed: {e:#}");
                self.status.update(|s| {
                    s.handler_failures += 1;
                    s.last_error = Some(format!("handler failed: {e}"));
                });
            }
        }
        if is_request {
            self.status.update(|s| s.requests_handled += 1);
        }
        Ok(())
    }

    /// Send `system.hello` and wait for the matching successful response.
    /// Every other frame is ignored until then. The wait races the
    /// handshake timer against cancellation, so a shutdown mid-handshake
    /// clears the timer and surfaces as `Aborted` rather than an error.
    async fn handshake(
        &self,
        sink: &mut WsSink,
        source: &mut WsSource,
        seq: &mut i64,
    ) -> anyhow::Result<HandshakeOutcome> {
        *seq += 1;
        let hello = Envelope::request(Op::SystemHello, None, *seq, hello_payload(&self.account));
        let req_id = hello.req_id.clone().unwrap_or_default();
        sink.send(Message::Text(hello.to_json())).await?;

        let response = tokio::select! {
            _ = self.cancel.cancelled() => return Ok(HandshakeOutcome::Aborted),
            response = tokio::time::timeout(self.handshake_timeout, async {
                while let Some(msg) = source.next().await {
                    match msg {
                        Ok(Message::Text(text)) => match Envelope::parse(&text) {
                            Ok(env)
                                if env.kind == FrameKind::Res
                                    && env.req_id.as_deref() == Some(&req_id) =>
                            {
                                return Some(env);
                            }
                            Ok(env) => {
                                debug!(op = %env.op, "ignoring frame during handshake");
                            }
                            Err(e) => {
                                debug!("ignoring malformed frame during handshake: {e}");
                            }
                        },
                        Ok(Message::Close(_)) | Err(_) => return None,
                        Ok(_) => {}
                    }
                }
                None
            }) => response,
        };

        let envelope = match response {
            Ok(Some(envelope)) => envelope,
            Ok(None) => bail!("connection closed before hello response"),
            Err(_) => bail!(
                "hello response not received within {:?}",
                self.handshake_timeout
            ),
        };
        match ResponsePayload::from_map(&envelope.payload)? {
            ResponsePayload::Ok(result) => Ok(HandshakeOutcome::Established(
                result
                    .get("conn_id")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown")
                    .to_string(),
            )),
            ResponsePayload::Err(error) => {
                bail!("peer rejected hello: {} ({})", error.message, error.code)
            }
        }
    }

    fn record_disconnect(&self, status: Option<u16>, error: Option<String>) {
        self.status.update(|s| {
            s.connected = false;
            s.conn_id = None;
            s.last_disconnect = Some(DisconnectInfo {
                at: Utc::now(),
                status,
                error,
            });
        });
    }
}

fn close_frame(code: u16, reason: &'static str) -> Message {
    Message::Close(Some(CloseFrame {
        code: CloseCode::from(code),
        reason: reason.into(),
    }))
}

fn hello_payload(account: &ResolvedAccount) -> Map<String, Value> {
    let mut payload = Map::new();
    payload.insert(
        "client".into(),
        serde_json::json!({
            "name": "voxbridge",
            "version": env!("CARGO_PKG_VERSION"),
            "phone": account.phone,
        }),
    );
    payload.insert(
        "supports".into(),
        serde_json::json!({ "ops": Op::supported_ops() }),
    );
    payload
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
