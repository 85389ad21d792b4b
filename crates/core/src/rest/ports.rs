//! Port interfaces for the REST pipeline
//!
//! These traits define the boundaries between the pipeline's middleware and
//! the infrastructure that actually performs HTTP.

use std::sync::Arc;

use async_trait::async_trait;
use conduit_domain::{RestRequest, RestResponse, Result};

use crate::context::CallContext;

/// Executes one REST request
///
/// Implementations return `Ok` for every HTTP status, including 4xx and 5xx,
/// and `Err(ConduitError::Transient)` only when no response was received.
/// Middleware (governor, retry) implements this same trait so layers compose.
#[async_trait]
pub trait RestTransport: Send + Sync {
    async fn execute(&self, request: &RestRequest, ctx: &CallContext) -> Result<RestResponse>;
}

#[async_trait]
impl<T: RestTransport + ?Sized> RestTransport for Arc<T> {
    async fn execute(&self, request: &RestRequest, ctx: &CallContext) -> Result<RestResponse> {
        (**self).execute(request, ctx).await
    }
}

/// Supplies the current credential
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// The raw token, without the authorization scheme
    async fn token(&self) -> Result<String>;
}
