//! WebSocket gateway connector
//!
//! Opens one tokio-tungstenite connection per attempt and splits it into the
//! [`FrameSink`] / [`FrameStream`] halves the session drives. Frames travel as
//! JSON text messages.

use std::borrow::Cow;

use async_trait::async_trait;
use conduit_core::{FrameSink, FrameStream, GatewayConnector, GatewayLink, InboundEvent};
use conduit_domain::constants::{GATEWAY_ENCODING, GATEWAY_VERSION};
use conduit_domain::{ConduitError, GatewayFrame, Result};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode as WsCloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, trace};
use url::Url;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connector for `wss://` gateway endpoints
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketConnector;

impl WebSocketConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl GatewayConnector for WebSocketConnector {
    async fn connect(&self, url: &str) -> Result<GatewayLink> {
        let url = gateway_url(url)?;
        debug!(%url, "Opening gateway connection");

        let (stream, _response) = connect_async(url.as_str()).await.map_err(map_ws_error)?;
        let (sink, stream) = stream.split();
        Ok(GatewayLink { sink: Box::new(WsSink(sink)), stream: Box::new(WsFrames(stream)) })
    }
}

/// Pin the protocol version and encoding on a gateway URL
pub fn gateway_url(raw: &str) -> Result<Url> {
    let mut url = Url::parse(raw)
        .map_err(|err| ConduitError::Config(format!("invalid gateway URL {raw:?}: {err}")))?;
    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| key != "v" && key != "encoding")
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();
    url.query_pairs_mut()
        .clear()
        .append_pair("v", &GATEWAY_VERSION.to_string())
        .append_pair("encoding", GATEWAY_ENCODING)
        .extend_pairs(kept);
    Ok(url)
}

fn map_ws_error(err: WsError) -> ConduitError {
    match err {
        WsError::Url(err) => ConduitError::Config(format!("gateway URL rejected: {err}")),
        WsError::ConnectionClosed | WsError::AlreadyClosed => {
            ConduitError::transient("gateway connection closed")
        }
        other => ConduitError::transient(format!("gateway link error: {other}")),
    }
}

struct WsSink(SplitSink<WsStream, Message>);

#[async_trait]
impl FrameSink for WsSink {
    async fn send(&mut self, frame: &GatewayFrame) -> Result<()> {
        let text = serde_json::to_string(frame)
            .map_err(|err| ConduitError::InvalidRequest(format!("unencodable frame: {err}")))?;
        trace!(op = ?frame.op, "Sending gateway frame");
        self.0.send(Message::Text(text)).await.map_err(map_ws_error)
    }

    async fn close(&mut self, code: u16) -> Result<()> {
        let frame = CloseFrame { code: WsCloseCode::from(code), reason: Cow::Borrowed("") };
        self.0.send(Message::Close(Some(frame))).await.map_err(map_ws_error)
    }
}

struct WsFrames(SplitStream<WsStream>);

#[async_trait]
impl FrameStream for WsFrames {
    async fn next(&mut self) -> Result<InboundEvent> {
        loop {
            let message = match self.0.next().await {
                Some(Ok(message)) => message,
                Some(Err(err)) => return Err(map_ws_error(err)),
                None => return Err(ConduitError::transient("gateway stream ended")),
            };

            match message {
                Message::Text(text) => return decode(text.as_bytes()).map(InboundEvent::Frame),
                Message::Binary(bytes) => return decode(&bytes).map(InboundEvent::Frame),
                Message::Close(frame) => {
                    let code = frame.map(|frame| u16::from(frame.code));
                    debug!(?code, "Gateway closed the connection");
                    return Ok(InboundEvent::Closed { code });
                }
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
            }
        }
    }
}

fn decode(bytes: &[u8]) -> Result<GatewayFrame> {
    serde_json::from_slice(bytes)
        .map_err(|err| ConduitError::Decode(format!("gateway frame: {err}")))
}
