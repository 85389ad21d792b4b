//! Client wiring
//!
//! [`ConduitClient`] owns the process-wide pieces (bucket store, REST
//! pipeline, session start limiter) and hands out gateway sessions that share
//! them.

use std::sync::Arc;

use conduit_common::resilience::SystemClock;
use conduit_core::{
    BucketStore, CallContext, EventDecoder, GatewayApi, GatewayConnector, GatewaySession,
    RestPipeline, RestTransport, SessionHandle, SessionStartLimiter, TokenProvider,
};
use conduit_domain::{ConduitConfig, Result};
use tracing::info;

use crate::auth::StaticTokenProvider;
use crate::gateway::WebSocketConnector;
use crate::http::ReqwestTransport;

/// Entry point tying configuration, transports and shared limiters together
pub struct ConduitClient {
    config: ConduitConfig,
    pipeline: Arc<RestPipeline>,
    buckets: Arc<BucketStore>,
    gateway_api: GatewayApi,
    limiter: Arc<SessionStartLimiter>,
    connector: Arc<dyn GatewayConnector>,
    tokens: Arc<dyn TokenProvider>,
}

impl ConduitClient {
    /// Start building a client from `config`.
    pub fn builder(config: ConduitConfig) -> ConduitClientBuilder {
        ConduitClientBuilder { config, transport: None, connector: None, tokens: None }
    }

    /// Client with the reqwest transport and WebSocket connector.
    pub fn from_config(config: ConduitConfig) -> Result<Self> {
        Self::builder(config).build()
    }

    pub fn config(&self) -> &ConduitConfig {
        &self.config
    }

    /// The shared REST pipeline
    pub fn rest(&self) -> &Arc<RestPipeline> {
        &self.pipeline
    }

    /// Route and global buckets learned so far
    pub fn buckets(&self) -> &Arc<BucketStore> {
        &self.buckets
    }

    pub fn gateway_api(&self) -> &GatewayApi {
        &self.gateway_api
    }

    /// The start budget every session of this client draws from
    pub fn start_limiter(&self) -> &Arc<SessionStartLimiter> {
        &self.limiter
    }

    /// Spawn a gateway session that shares this client's start budget
    ///
    /// Without a configured gateway URL this first calls `GET /gateway/bot`,
    /// which also refreshes the start budget.
    ///
    /// # Errors
    /// Any discovery error from the REST pipeline.
    pub async fn gateway_session<D: EventDecoder>(
        &self,
        decoder: D,
        ctx: &CallContext,
    ) -> Result<SessionHandle<D::Event>> {
        let url = match &self.config.gateway.url {
            Some(url) => url.clone(),
            None => {
                let bot = self.gateway_api.get_gateway_bot(ctx).await?;
                self.limiter.refresh(bot.session_start_limit).await;
                info!(
                    url = %bot.url,
                    shards = bot.shards,
                    remaining = bot.session_start_limit.remaining,
                    "Gateway discovered"
                );
                bot.url
            }
        };

        Ok(GatewaySession::new(
            Arc::clone(&self.connector),
            Arc::clone(&self.tokens),
            Arc::clone(&self.limiter),
            decoder,
            self.config.gateway.clone(),
            url,
        )
        .spawn())
    }
}

/// Builder for [`ConduitClient`]; every port defaults to the bundled adapter
pub struct ConduitClientBuilder {
    config: ConduitConfig,
    transport: Option<Arc<dyn RestTransport>>,
    connector: Option<Arc<dyn GatewayConnector>>,
    tokens: Option<Arc<dyn TokenProvider>>,
}

impl ConduitClientBuilder {
    #[must_use]
    pub fn transport(mut self, transport: Arc<dyn RestTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    #[must_use]
    pub fn connector(mut self, connector: Arc<dyn GatewayConnector>) -> Self {
        self.connector = Some(connector);
        self
    }

    #[must_use]
    pub fn tokens(mut self, tokens: Arc<dyn TokenProvider>) -> Self {
        self.tokens = Some(tokens);
        self
    }

    /// # Errors
    /// Returns `ConduitError::Config` if the configuration does not validate
    /// or the HTTP client cannot be built.
    pub fn build(self) -> Result<ConduitClient> {
        let config = self.config;
        config.validate()?;

        let transport: Arc<dyn RestTransport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(ReqwestTransport::from_config(&config.rest)?),
        };
        let tokens: Arc<dyn TokenProvider> = match self.tokens {
            Some(tokens) => tokens,
            None => Arc::new(StaticTokenProvider::new(config.token.clone())?),
        };
        let connector: Arc<dyn GatewayConnector> = match self.connector {
            Some(connector) => connector,
            None => Arc::new(WebSocketConnector::new()),
        };

        let buckets =
            Arc::new(BucketStore::with_clock(SystemClock, config.rest.global_requests_per_second));
        let pipeline = Arc::new(RestPipeline::new(
            transport,
            Arc::clone(&tokens),
            Arc::clone(&buckets),
            &config.rest,
        )?);
        let gateway_api = GatewayApi::new(Arc::clone(&pipeline));

        Ok(ConduitClient {
            config,
            pipeline,
            buckets,
            gateway_api,
            limiter: Arc::new(SessionStartLimiter::default()),
            connector,
            tokens,
        })
    }
}
