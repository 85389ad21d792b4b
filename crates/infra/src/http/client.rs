use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use conduit_core::{interrupted, CallContext, RestTransport};
use conduit_domain::constants::{
    HEADER_RATELIMIT_BUCKET, HEADER_RATELIMIT_GLOBAL, HEADER_RATELIMIT_LIMIT,
    HEADER_RATELIMIT_REMAINING, HEADER_RATELIMIT_RESET, HEADER_RATELIMIT_RESET_AFTER,
    HEADER_RATELIMIT_SCOPE, HEADER_RETRY_AFTER,
};
use conduit_domain::{
    ConduitError, HttpMethod, RateLimitHeaders, RateLimitScope, RestConfig, RestRequest,
    RestResponse, Result,
};
use reqwest::header::HeaderMap;
use reqwest::{Client as ReqwestClient, Method};
use tracing::debug;
use url::Url;

/// REST transport backed by reqwest
///
/// Performs exactly one HTTP exchange per call. Every status comes back as
/// `Ok`; only a missing response is an error.
#[derive(Clone)]
pub struct ReqwestTransport {
    client: ReqwestClient,
    base_url: String,
}

impl ReqwestTransport {
    /// Start building a transport rooted at `base_url`.
    pub fn builder(base_url: impl Into<String>) -> ReqwestTransportBuilder {
        ReqwestTransportBuilder::new(base_url)
    }

    /// Transport configured from the REST settings.
    pub fn from_config(config: &RestConfig) -> Result<Self> {
        Self::builder(config.api_base_url.clone())
            .timeout(config.request_timeout)
            .user_agent(config.user_agent.clone())
            .build()
    }

    fn url_for(&self, request: &RestRequest) -> Result<Url> {
        let path = request.path.trim_start_matches('/');
        let mut url = Url::parse(&format!("{}/{path}", self.base_url))
            .map_err(|err| ConduitError::InvalidRequest(format!("bad path {path:?}: {err}")))?;
        if !request.query.is_empty() {
            url.query_pairs_mut().extend_pairs(request.query.iter());
        }
        Ok(url)
    }

    async fn send(&self, request: &RestRequest) -> Result<RestResponse> {
        let url = self.url_for(request)?;
        let method = to_method(request.method);
        debug!(%method, %url, "sending HTTP request");

        let mut builder = self.client.request(method.clone(), url.clone());
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(map_reqwest_error)?;
        let status = response.status().as_u16();
        debug!(%method, %url, status, "received HTTP response");

        let rate_limit = parse_rate_limit(response.headers());
        let retry_after = parse_retry_after(response.headers());
        let body = response.bytes().await.map_err(map_reqwest_error)?;

        Ok(RestResponse { status, rate_limit, retry_after, body: body.to_vec() }.merge_rate_limit_body())
    }
}

#[async_trait]
impl RestTransport for ReqwestTransport {
    async fn execute(&self, request: &RestRequest, ctx: &CallContext) -> Result<RestResponse> {
        ctx.run(self.send(request)).await.map_err(interrupted)?
    }
}

/// Builder for [`ReqwestTransport`].
#[derive(Debug)]
pub struct ReqwestTransportBuilder {
    base_url: String,
    timeout: Duration,
    user_agent: Option<String>,
    default_headers: Option<HeaderMap>,
}

impl ReqwestTransportBuilder {
    fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeout: Duration::from_secs(30),
            user_agent: None,
            default_headers: None,
        }
    }

    /// Whole-request timeout, including reading the body
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// `User-Agent` sent with every request
    #[must_use]
    pub fn user_agent(mut self, agent: impl Into<String>) -> Self {
        self.user_agent = Some(agent.into());
        self
    }

    /// Headers added to every request
    #[must_use]
    pub fn default_headers(mut self, headers: HeaderMap) -> Self {
        self.default_headers = Some(headers);
        self
    }

    /// # Errors
    /// Returns `ConduitError::Config` for an unparsable base URL or when the
    /// reqwest client cannot be built.
    pub fn build(self) -> Result<ReqwestTransport> {
        let base_url = self.base_url.trim_end_matches('/').to_string();
        Url::parse(&base_url)
            .map_err(|err| ConduitError::Config(format!("invalid API base URL {base_url:?}: {err}")))?;

        let mut builder = ReqwestClient::builder().timeout(self.timeout).no_proxy();

        if let Some(agent) = self.user_agent {
            builder = builder.user_agent(agent);
        }

        if let Some(headers) = self.default_headers {
            builder = builder.default_headers(headers);
        }

        let client = builder
            .build()
            .map_err(|err| ConduitError::Config(format!("failed to build HTTP client: {err}")))?;

        Ok(ReqwestTransport { client, base_url })
    }
}

const fn to_method(method: HttpMethod) -> Method {
    match method {
        HttpMethod::Get => Method::GET,
        HttpMethod::Post => Method::POST,
        HttpMethod::Put => Method::PUT,
        HttpMethod::Patch => Method::PATCH,
        HttpMethod::Delete => Method::DELETE,
    }
}

fn map_reqwest_error(err: reqwest::Error) -> ConduitError {
    if err.is_builder() {
        return ConduitError::InvalidRequest(err.to_string());
    }
    let kind = if err.is_timeout() {
        "timed out"
    } else if err.is_connect() {
        "connection failed"
    } else {
        "http error"
    };
    ConduitError::Transient { message: format!("{kind}: {err}"), status: None }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok()).map(str::trim)
}

fn header_seconds(headers: &HeaderMap, name: &str) -> Option<Duration> {
    header_str(headers, name)
        .and_then(|value| value.parse::<f64>().ok())
        .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
}

/// Rate-limit headers of one response, `None` when it carries none
pub(crate) fn parse_rate_limit(headers: &HeaderMap) -> Option<RateLimitHeaders> {
    let parsed = RateLimitHeaders {
        limit: header_str(headers, HEADER_RATELIMIT_LIMIT).and_then(|v| v.parse().ok()),
        remaining: header_str(headers, HEADER_RATELIMIT_REMAINING).and_then(|v| v.parse().ok()),
        reset_at: header_seconds(headers, HEADER_RATELIMIT_RESET).and_then(|since_epoch| {
            i64::try_from(since_epoch.as_millis()).ok().and_then(DateTime::<Utc>::from_timestamp_millis)
        }),
        reset_after: header_seconds(headers, HEADER_RATELIMIT_RESET_AFTER),
        bucket: header_str(headers, HEADER_RATELIMIT_BUCKET).map(str::to_string),
        global: header_str(headers, HEADER_RATELIMIT_GLOBAL)
            .is_some_and(|v| v.eq_ignore_ascii_case("true")),
        scope: header_str(headers, HEADER_RATELIMIT_SCOPE).and_then(RateLimitScope::parse),
    };
    (parsed != RateLimitHeaders::default()).then_some(parsed)
}

/// `Retry-After` in (possibly fractional) seconds
pub(crate) fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    header_seconds(headers, HEADER_RETRY_AFTER)
}
