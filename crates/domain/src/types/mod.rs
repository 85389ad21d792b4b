//! Domain types and models

pub mod frames;
pub mod gateway;
pub mod ratelimit;
pub mod rest;

pub use frames::{
    CloseCode, CloseDisposition, ConnectionProperties, GatewayFrame, Hello, Identify, OpCode,
    Ready, Resume, UnknownOpCode,
};
pub use gateway::{
    GatewayBotEndpoint, GatewayEndpoint, SessionStartLimit, SessionState, Transition,
};
pub use ratelimit::{BucketSnapshot, RateLimitHeaders, RateLimitScope, RateLimitedBody};
pub use rest::{HttpMethod, RestRequest, RestResponse, RouteKey, Submission};
