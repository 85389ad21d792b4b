//! Request pipeline
//!
//! Attaches the credential, sends the request through
//! `Retry(Governor(transport))` and turns the final response into either a
//! typed value or a [`ConduitError`].

use std::sync::Arc;
use std::time::Duration;

use conduit_common::resilience::{Clock, SystemClock};
use conduit_domain::constants::AUTH_SCHEME_BOT;
use conduit_domain::{
    ApiErrorDetail, ConduitError, RestConfig, RestRequest, RestResponse, Result, Submission,
};
use serde::de::DeserializeOwned;
use tracing::{debug, instrument, warn};

use super::ports::{RestTransport, TokenProvider};
use super::retry::RetryLayer;
use crate::context::{duration_ms, CallContext};
use crate::ratelimit::{BucketStore, Governor};

/// Typed front door for every REST call
pub struct RestPipeline {
    stack: Arc<dyn RestTransport>,
    tokens: Arc<dyn TokenProvider>,
    rate_limit_fallback: Duration,
}

impl RestPipeline {
    /// Compose the middleware stack around `transport`
    ///
    /// # Errors
    /// Returns `ConduitError::Config` if the retry settings are invalid.
    pub fn new<C: Clock>(
        transport: Arc<dyn RestTransport>,
        tokens: Arc<dyn TokenProvider>,
        store: Arc<BucketStore<C>>,
        config: &RestConfig,
    ) -> Result<Self> {
        let governed = Governor::new(transport, store, config.rate_limit_fallback);
        let stack = RetryLayer::from_config(governed, config)?;
        Ok(Self::from_stack(Arc::new(stack), tokens, config.rate_limit_fallback))
    }

    /// Pipeline over a pre-composed stack
    pub fn from_stack(
        stack: Arc<dyn RestTransport>,
        tokens: Arc<dyn TokenProvider>,
        rate_limit_fallback: Duration,
    ) -> Self {
        Self { stack, tokens, rate_limit_fallback }
    }

    /// Pipeline with a fresh bucket store sized by `config`
    ///
    /// # Errors
    /// Returns `ConduitError::Config` if the retry settings are invalid.
    pub fn with_defaults(
        transport: Arc<dyn RestTransport>,
        tokens: Arc<dyn TokenProvider>,
        config: &RestConfig,
    ) -> Result<Self> {
        let store = Arc::new(BucketStore::with_clock(SystemClock, config.global_requests_per_second));
        Self::new(transport, tokens, store, config)
    }

    /// Send `request` and decode the body into `T`
    ///
    /// # Errors
    /// - `RateLimited` when 429s outlive their retry
    /// - `Transient` when connection failures or 5xx outlive their retries
    /// - `ClientError` for any other non-2xx status
    /// - `Decode` when the body does not match `T`
    /// - `Cancelled` when `ctx` fires or its deadline passes
    #[instrument(skip_all, fields(method = %request.method, route = %request.route))]
    pub async fn submit<T: DeserializeOwned>(
        &self,
        request: RestRequest,
        ctx: &CallContext,
    ) -> Result<Submission<T>> {
        let response = self.send(request, ctx).await?;
        if response.status == 204 || response.body.is_empty() {
            return Ok(Submission::NoContent);
        }
        serde_json::from_slice(&response.body)
            .map(Submission::Value)
            .map_err(|err| ConduitError::Decode(format!("response body: {err}")))
    }

    /// Send `request` and discard any body
    ///
    /// # Errors
    /// As [`RestPipeline::submit`], minus `Decode`.
    #[instrument(skip_all, fields(method = %request.method, route = %request.route))]
    pub async fn submit_unit(&self, request: RestRequest, ctx: &CallContext) -> Result<()> {
        self.send(request, ctx).await.map(|_| ())
    }

    async fn send(&self, mut request: RestRequest, ctx: &CallContext) -> Result<RestResponse> {
        let token = self.tokens.token().await?;
        request.set_header("Authorization", format!("{AUTH_SCHEME_BOT} {token}"));

        let response = self.stack.execute(&request, ctx).await?;
        debug!(status = response.status, "Response received");
        self.check_status(response)
    }

    fn check_status(&self, response: RestResponse) -> Result<RestResponse> {
        if response.is_success() {
            return Ok(response);
        }
        if response.is_rate_limited() {
            let retry_after = response.retry_after.unwrap_or(self.rate_limit_fallback);
            let global = response.is_global_limit();
            warn!(retry_after_ms = duration_ms(retry_after), global, "Rate limited");
            return Err(ConduitError::RateLimited { retry_after, global });
        }
        if response.is_server_error() {
            return Err(ConduitError::Transient {
                message: format!("server error {}", response.status),
                status: Some(response.status),
            });
        }

        let detail = serde_json::from_slice::<ApiErrorDetail>(&response.body).unwrap_or_else(|_| {
            ApiErrorDetail {
                message: String::from_utf8_lossy(&response.body).into_owned(),
                ..ApiErrorDetail::default()
            }
        });
        Err(ConduitError::ClientError { status: response.status, detail })
    }
}
