//! Port interfaces for the gateway session
//!
//! A connector opens one framed link per connection attempt; the link is
//! split so that a reader task can own the stream while the control task
//! owns the sink.

use async_trait::async_trait;
use conduit_domain::{GatewayFrame, Result, SessionStartLimit};
use serde_json::Value;

use crate::context::CallContext;

/// Something read from the gateway link
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    Frame(GatewayFrame),
    /// The peer closed the link; `code` is absent for abnormal closure
    Closed { code: Option<u16> },
}

/// Write half of a gateway link
#[async_trait]
pub trait FrameSink: Send {
    async fn send(&mut self, frame: &GatewayFrame) -> Result<()>;

    /// Close the link with the given close code
    async fn close(&mut self, code: u16) -> Result<()>;
}

/// Read half of a gateway link
#[async_trait]
pub trait FrameStream: Send {
    /// Next inbound event; a malformed frame is `Err(ConduitError::Decode)`
    /// and a lost connection is `Err(ConduitError::Transient)`
    async fn next(&mut self) -> Result<InboundEvent>;
}

/// One established connection
pub struct GatewayLink {
    pub sink: Box<dyn FrameSink>,
    pub stream: Box<dyn FrameStream>,
}

/// Opens gateway links
#[async_trait]
pub trait GatewayConnector: Send + Sync {
    async fn connect(&self, url: &str) -> Result<GatewayLink>;
}

/// Turns dispatch payloads into caller-facing events
pub trait EventDecoder: Send + Sync + 'static {
    type Event: Clone + Send + 'static;

    fn decode(&self, name: &str, data: &Value) -> Result<Self::Event>;
}

/// An undecoded dispatch
#[derive(Debug, Clone, PartialEq)]
pub struct RawEvent {
    pub name: String,
    pub data: Value,
}

/// Decoder that forwards dispatches untouched
#[derive(Debug, Clone, Copy, Default)]
pub struct RawEventDecoder;

impl EventDecoder for RawEventDecoder {
    type Event = RawEvent;

    fn decode(&self, name: &str, data: &Value) -> Result<RawEvent> {
        Ok(RawEvent { name: name.to_string(), data: data.clone() })
    }
}

/// Source of the process-wide session start budget
#[async_trait]
pub trait StartLimitSource: Send + Sync {
    async fn session_start_limit(&self, ctx: &CallContext) -> Result<SessionStartLimit>;
}
