//! # Conduit Core
//!
//! Pure business logic layer - no HTTP or WebSocket dependencies.
//!
//! This crate contains:
//! - Port interfaces (traits) for transports, credentials and decoding
//! - The rate-limit bucket store and governor
//! - The retrying REST pipeline and gateway discovery API
//! - The session start limiter and gateway session state machine
//!
//! ## Architecture Principles
//! - Only depends on `conduit-common` and `conduit-domain`
//! - All I/O via traits implemented in `conduit-infra`
//! - Every wait honors a [`CallContext`]

pub mod context;
pub mod gateway;
pub mod ratelimit;
pub mod rest;

// Re-export specific items to avoid ambiguity
pub use context::{interrupted, CallContext};
pub use gateway::ports::{
    EventDecoder, FrameSink, FrameStream, GatewayConnector, GatewayLink, InboundEvent, RawEvent,
    RawEventDecoder, StartLimitSource,
};
pub use gateway::{GatewaySession, SessionHandle, SessionStartLimiter, StartPermit};
pub use ratelimit::{BucketStore, Governor};
pub use rest::ports::{RestTransport, TokenProvider};
pub use rest::{GatewayApi, RestPipeline, RetryLayer};
