//! Gateway discovery endpoints
//!
//! `GET /gateway` returns the connection URL; `GET /gateway/bot` adds the
//! recommended shard count and the session start budget.

use std::sync::Arc;

use async_trait::async_trait;
use conduit_domain::{
    ConduitError, GatewayBotEndpoint, GatewayEndpoint, HttpMethod, Result, RestRequest, RouteKey,
    SessionStartLimit, Submission,
};
use serde::de::DeserializeOwned;

use super::pipeline::RestPipeline;
use crate::context::CallContext;
use crate::gateway::ports::StartLimitSource;

/// Discovery calls routed through the REST pipeline
#[derive(Clone)]
pub struct GatewayApi {
    pipeline: Arc<RestPipeline>,
}

impl GatewayApi {
    /// Discovery calls issued through `pipeline`
    pub fn new(pipeline: Arc<RestPipeline>) -> Self {
        Self { pipeline }
    }

    /// # Errors
    /// Any pipeline error; an empty body is `ConduitError::Decode`.
    pub async fn get_gateway(&self, ctx: &CallContext) -> Result<GatewayEndpoint> {
        self.fetch("GET /gateway", "/gateway", ctx).await
    }

    /// # Errors
    /// Any pipeline error; an empty body is `ConduitError::Decode`.
    pub async fn get_gateway_bot(&self, ctx: &CallContext) -> Result<GatewayBotEndpoint> {
        self.fetch("GET /gateway/bot", "/gateway/bot", ctx).await
    }

    async fn fetch<T: DeserializeOwned>(
        &self,
        template: &str,
        path: &str,
        ctx: &CallContext,
    ) -> Result<T> {
        let request = RestRequest::new(HttpMethod::Get, RouteKey::new(template), path);
        match self.pipeline.submit(request, ctx).await? {
            Submission::Value(value) => Ok(value),
            Submission::NoContent => Err(ConduitError::Decode(format!("{template}: empty body"))),
        }
    }
}

#[async_trait]
impl StartLimitSource for GatewayApi {
    async fn session_start_limit(&self, ctx: &CallContext) -> Result<SessionStartLimit> {
        Ok(self.get_gateway_bot(ctx).await?.session_start_limit)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use conduit_domain::RestResponse;

    use super::*;
    use crate::rest::ports::{RestTransport, TokenProvider};

    struct Token;

    #[async_trait]
    impl TokenProvider for Token {
        async fn token(&self) -> Result<String> {
            Ok("t".to_string())
        }
    }

    struct Discovery;

    #[async_trait]
    impl RestTransport for Discovery {
        async fn execute(&self, request: &RestRequest, _: &CallContext) -> Result<RestResponse> {
            let body = match request.path.as_str() {
                "/gateway" => r#"{ "url": "wss://gateway.discord.gg/" }"#,
                "/gateway/bot" => {
                    r#"{ "url": "wss://gateway.discord.gg/", "shards": 9, "session_start_limit": { "total": 1000, "remaining": 999, "reset_after": 14400000, "max_concurrency": 1 }}"#
                }
                _ => return Ok(RestResponse::new(404)),
            };
            Ok(RestResponse::new(200).with_body(body))
        }
    }

    fn api() -> GatewayApi {
        let pipeline =
            RestPipeline::from_stack(Arc::new(Discovery), Arc::new(Token), Duration::from_secs(1));
        GatewayApi::new(Arc::new(pipeline))
    }

    #[tokio::test]
    async fn get_gateway_returns_url() {
        let endpoint = api().get_gateway(&CallContext::new()).await.expect("gateway");
        assert_eq!(endpoint.url, "wss://gateway.discord.gg/");
    }

    #[tokio::test]
    async fn start_limit_source_reads_gateway_bot() {
        let limit = api().session_start_limit(&CallContext::new()).await.expect("limit");
        assert_eq!(limit.total, 1000);
        assert_eq!(limit.remaining, 999);
        assert_eq!(limit.reset_after, Duration::from_secs(14_400));
    }
}
