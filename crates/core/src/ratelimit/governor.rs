//! Rate limit governor middleware
//!
//! Admits each call against its route bucket and the global bucket, sleeping
//! (cancellably) until both allow it, then feeds the response's rate-limit
//! metadata back into the store whatever the status.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use conduit_common::resilience::{Clock, SystemClock};
use conduit_domain::{RestRequest, RestResponse, Result, RouteKey};
use tracing::{debug, instrument};

use super::bucket_store::BucketStore;
use crate::context::{duration_ms, interrupted, CallContext};
use crate::rest::ports::RestTransport;

/// Middleware that throttles an inner transport through a [`BucketStore`]
pub struct Governor<T, C: Clock = SystemClock> {
    inner: T,
    store: Arc<BucketStore<C>>,
    rate_limit_fallback: Duration,
}

impl<T, C: Clock> Governor<T, C> {
    /// Wrap `inner`; `rate_limit_fallback` arms the global bucket when a
    /// global 429 carries no `Retry-After`
    pub fn new(inner: T, store: Arc<BucketStore<C>>, rate_limit_fallback: Duration) -> Self {
        Self { inner, store, rate_limit_fallback }
    }

    /// The bucket store this governor admits against
    pub fn store(&self) -> &Arc<BucketStore<C>> {
        &self.store
    }

    /// Sleep until `route` may be called, reserving its unit
    ///
    /// # Errors
    /// Returns `ConduitError::Cancelled` when the context is cancelled or the
    /// wait would overrun its deadline.
    pub async fn admit(&self, route: &RouteKey, ctx: &CallContext) -> Result<()> {
        loop {
            let wait = self.store.reserve(route).await?;
            if wait.is_zero() {
                return Ok(());
            }
            debug!(%route, wait_ms = duration_ms(wait), "Waiting for rate-limit admission");
            ctx.sleep(wait).await.map_err(interrupted)?;
        }
    }

    async fn observe(&self, route: &RouteKey, response: &RestResponse) {
        if let Some(headers) = &response.rate_limit {
            self.store.update(route, headers).await;
        }
        if response.is_rate_limited() && response.is_global_limit() {
            let retry_after = response.retry_after.unwrap_or(self.rate_limit_fallback);
            self.store.arm_global(retry_after).await;
        }
    }
}

#[async_trait]
impl<T: RestTransport, C: Clock> RestTransport for Governor<T, C> {
    #[instrument(skip_all, fields(route = %request.route))]
    async fn execute(&self, request: &RestRequest, ctx: &CallContext) -> Result<RestResponse> {
        self.admit(&request.route, ctx).await?;
        let response = self.inner.execute(request, ctx).await?;
        self.observe(&request.route, &response).await;
        Ok(response)
    }
}
