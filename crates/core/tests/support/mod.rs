//! Shared test helpers for `conduit-core` integration tests.
//!
//! An in-memory gateway: every `connect` hands the test a [`ServerLink`]
//! that can push frames to the session and observe what it sends back.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use conduit_core::{
    CallContext, FrameSink, FrameStream, GatewayConnector, GatewayLink, GatewaySession,
    InboundEvent, RawEvent, RawEventDecoder, SessionHandle, SessionStartLimiter, TokenProvider,
};
use conduit_domain::{
    ConduitError, GatewayConfig, GatewayFrame, OpCode, Result, SessionStartLimit,
};
use serde_json::{json, Value};
use tokio::sync::mpsc;

pub const GATEWAY_URL: &str = "wss://gateway.test";
pub const RESUME_URL: &str = "wss://resume.gateway.test";
pub const TOKEN: &str = "secret";

/// What the session wrote to a link
#[derive(Debug, Clone, PartialEq)]
pub enum Sent {
    Frame(GatewayFrame),
    Close(u16),
}

/// Server end of one fake connection
pub struct ServerLink {
    pub url: String,
    to_client: mpsc::UnboundedSender<Result<InboundEvent>>,
    from_client: mpsc::UnboundedReceiver<Sent>,
}

impl ServerLink {
    pub fn send(&self, frame: GatewayFrame) {
        self.to_client.send(Ok(InboundEvent::Frame(frame))).expect("session reader alive");
    }

    pub fn hello(&self, interval: Duration) {
        let millis = u64::try_from(interval.as_millis()).expect("interval fits");
        self.send(GatewayFrame::new(OpCode::Hello, json!({ "heartbeat_interval": millis })));
    }

    pub fn dispatch(&self, name: &str, seq: u64, data: Value) {
        self.send(GatewayFrame { op: OpCode::Dispatch, d: data, s: Some(seq), t: Some(name.into()) });
    }

    pub fn ready(&self, session_id: &str, seq: u64) {
        self.dispatch(
            "READY",
            seq,
            json!({ "session_id": session_id, "resume_gateway_url": RESUME_URL }),
        );
    }

    pub fn heartbeat_ack(&self) {
        self.send(GatewayFrame::new(OpCode::HeartbeatAck, Value::Null));
    }

    /// Peer-initiated close
    pub fn close(&self, code: Option<u16>) {
        self.to_client.send(Ok(InboundEvent::Closed { code })).expect("session reader alive");
    }

    pub async fn next_sent(&mut self) -> Sent {
        self.from_client.recv().await.expect("session still writing")
    }

    /// Next frame with `op`, skipping heartbeats sent in between
    pub async fn expect_frame(&mut self, op: OpCode) -> GatewayFrame {
        loop {
            match self.next_sent().await {
                Sent::Frame(frame) if frame.op == op => return frame,
                Sent::Frame(frame) if frame.op == OpCode::Heartbeat => continue,
                other => panic!("expected {op:?}, got {other:?}"),
            }
        }
    }
}

struct ChannelSink(mpsc::UnboundedSender<Sent>);

#[async_trait]
impl FrameSink for ChannelSink {
    async fn send(&mut self, frame: &GatewayFrame) -> Result<()> {
        self.0.send(Sent::Frame(frame.clone())).map_err(|_| ConduitError::transient("peer gone"))
    }

    async fn close(&mut self, code: u16) -> Result<()> {
        self.0.send(Sent::Close(code)).map_err(|_| ConduitError::transient("peer gone"))
    }
}

struct ChannelStream(mpsc::UnboundedReceiver<Result<InboundEvent>>);

#[async_trait]
impl FrameStream for ChannelStream {
    async fn next(&mut self) -> Result<InboundEvent> {
        self.0.recv().await.unwrap_or_else(|| Err(ConduitError::transient("connection reset")))
    }
}

pub struct FakeConnector {
    links: mpsc::UnboundedSender<ServerLink>,
}

#[async_trait]
impl GatewayConnector for FakeConnector {
    async fn connect(&self, url: &str) -> Result<GatewayLink> {
        let (to_client, client_rx) = mpsc::unbounded_channel();
        let (client_tx, from_client) = mpsc::unbounded_channel();
        self.links
            .send(ServerLink { url: url.to_string(), to_client, from_client })
            .map_err(|_| ConduitError::transient("gateway offline"))?;
        Ok(GatewayLink {
            sink: Box::new(ChannelSink(client_tx)),
            stream: Box::new(ChannelStream(client_rx)),
        })
    }
}

/// Connector that never opens a link and counts how often it was asked
pub struct RefusingConnector {
    error: ConduitError,
    attempts: AtomicUsize,
}

impl RefusingConnector {
    pub fn new(error: ConduitError) -> Arc<Self> {
        Arc::new(Self { error, attempts: AtomicUsize::new(0) })
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GatewayConnector for RefusingConnector {
    async fn connect(&self, _url: &str) -> Result<GatewayLink> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(self.error.clone())
    }
}

/// Accepts the connections a session opens
pub struct FakeGateway {
    links: mpsc::UnboundedReceiver<ServerLink>,
}

impl FakeGateway {
    pub fn new() -> (Self, Arc<FakeConnector>) {
        let (tx, links) = mpsc::unbounded_channel();
        (Self { links }, Arc::new(FakeConnector { links: tx }))
    }

    pub async fn accept(&mut self) -> ServerLink {
        self.links.recv().await.expect("connector alive")
    }

    pub fn try_accept(&mut self) -> Option<ServerLink> {
        self.links.try_recv().ok()
    }
}

pub struct StaticTokens;

#[async_trait]
impl TokenProvider for StaticTokens {
    async fn token(&self) -> Result<String> {
        Ok(TOKEN.to_string())
    }
}

pub fn start_limit(remaining: u32, reset_after: Duration) -> SessionStartLimit {
    SessionStartLimit { total: 10, remaining, reset_after, max_concurrency: 1 }
}

pub fn gateway_config() -> GatewayConfig {
    GatewayConfig { jitter_first_heartbeat: false, intents: 513, ..GatewayConfig::default() }
}

pub fn spawn_session(
    connector: Arc<FakeConnector>,
    limiter: Arc<SessionStartLimiter>,
) -> SessionHandle<RawEvent> {
    GatewaySession::new(
        connector,
        Arc::new(StaticTokens),
        limiter,
        RawEventDecoder,
        gateway_config(),
        GATEWAY_URL,
    )
    .spawn()
}

/// Connect through a full Identify handshake and return the live link
pub async fn connect_fresh(
    handle: &SessionHandle<RawEvent>,
    gateway: &mut FakeGateway,
    session_id: &str,
) -> ServerLink {
    let ctx = CallContext::new();
    let (connected, link) = tokio::join!(handle.connect(&ctx), async {
        let mut link = gateway.accept().await;
        link.hello(Duration::from_secs(40));
        link.expect_frame(OpCode::Identify).await;
        link.ready(session_id, 1);
        link
    });
    connected.expect("connect");
    link
}
