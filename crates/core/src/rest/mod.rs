//! REST request pipeline
//!
//! Calls flow `RestPipeline -> RetryLayer -> Governor -> RestTransport`;
//! every layer implements [`ports::RestTransport`].

pub mod gateway_api;
pub mod pipeline;
pub mod ports;
pub mod retry;

pub use gateway_api::GatewayApi;
pub use pipeline::RestPipeline;
pub use retry::{AttemptFailure, RestRetryPolicy, RetryLayer};
