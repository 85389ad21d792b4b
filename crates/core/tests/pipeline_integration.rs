//! REST pipeline composed end to end: credential, retry, governor, transport

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use conduit_core::{
    BucketStore, CallContext, GatewayApi, RestPipeline, RestTransport, SessionStartLimiter,
    TokenProvider,
};
use conduit_domain::{
    ConduitError, HttpMethod, RateLimitHeaders, RestConfig, RestRequest, RestResponse, Result,
    RouteKey, SessionStartLimit, Submission,
};
use serde::Deserialize;
use tokio::time::Instant;

struct Token;

#[async_trait]
impl TokenProvider for Token {
    async fn token(&self) -> Result<String> {
        Ok("secret".to_string())
    }
}

/// Server-side model of one bucket: `limit` calls per `window`
struct BucketServer {
    limit: u32,
    window: Duration,
    state: Mutex<(Instant, u32)>,
    rejected: Mutex<u32>,
    served: Mutex<u32>,
}

impl BucketServer {
    fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit,
            window,
            state: Mutex::new((Instant::now(), 0)),
            rejected: Mutex::new(0),
            served: Mutex::new(0),
        }
    }
}

#[async_trait]
impl RestTransport for BucketServer {
    async fn execute(&self, _: &RestRequest, _: &CallContext) -> Result<RestResponse> {
        let now = Instant::now();
        let mut state = self.state.lock().expect("lock");
        if now >= state.0 + self.window {
            *state = (now, 0);
        }
        let reset_after = (state.0 + self.window) - now;
        if state.1 >= self.limit {
            *self.rejected.lock().expect("lock") += 1;
            return Ok(RestResponse::new(429).with_retry_after(reset_after));
        }
        state.1 += 1;
        *self.served.lock().expect("lock") += 1;
        Ok(RestResponse::new(200).with_body(r#"{"id":"1"}"#).with_rate_limit(RateLimitHeaders {
            limit: Some(self.limit),
            remaining: Some(self.limit - state.1),
            reset_after: Some(reset_after),
            bucket: Some("messages".to_string()),
            ..RateLimitHeaders::default()
        }))
    }
}

/// Transport replaying a fixed list of responses
struct Script {
    responses: Mutex<VecDeque<RestResponse>>,
    calls: Mutex<Vec<Instant>>,
}

impl Script {
    fn new(responses: Vec<RestResponse>) -> Self {
        Self { responses: Mutex::new(responses.into()), calls: Mutex::new(Vec::new()) }
    }

    fn calls(&self) -> usize {
        self.calls.lock().expect("lock").len()
    }
}

#[async_trait]
impl RestTransport for Script {
    async fn execute(&self, _: &RestRequest, _: &CallContext) -> Result<RestResponse> {
        self.calls.lock().expect("lock").push(Instant::now());
        Ok(self.responses.lock().expect("lock").pop_front().unwrap_or_else(|| RestResponse::new(500)))
    }
}

#[derive(Debug, Deserialize, PartialEq)]
struct Message {
    id: String,
}

fn pipeline(transport: Arc<dyn RestTransport>) -> RestPipeline {
    RestPipeline::with_defaults(transport, Arc::new(Token), &RestConfig::default()).expect("pipeline")
}

fn post_message() -> RestRequest {
    RestRequest::new(
        HttpMethod::Post,
        RouteKey::with_major("POST /channels/{channel_id}/messages", "42"),
        "/channels/42/messages",
    )
}

#[tokio::test(start_paused = true)]
async fn concurrent_calls_on_one_route_never_overrun_the_bucket() {
    let server = Arc::new(BucketServer::new(2, Duration::from_secs(1)));
    let pipeline = Arc::new(pipeline(Arc::clone(&server) as Arc<dyn RestTransport>));
    let started = Instant::now();

    // The first call teaches the governor the bucket
    pipeline.submit_unit(post_message(), &CallContext::new()).await.expect("first");

    let calls: Vec<_> = (0..8)
        .map(|_| {
            let pipeline = Arc::clone(&pipeline);
            tokio::spawn(async move { pipeline.submit_unit(post_message(), &CallContext::new()).await })
        })
        .collect();
    for call in calls {
        call.await.expect("join").expect("call");
    }

    assert_eq!(*server.rejected.lock().expect("lock"), 0, "governor admitted past remaining = 0");
    assert_eq!(*server.served.lock().expect("lock"), 9);
    assert!(started.elapsed() >= Duration::from_secs(4));
}

#[tokio::test(start_paused = true)]
async fn rate_limited_call_waits_retry_after_then_succeeds() {
    let script = Arc::new(Script::new(vec![
        RestResponse::new(429).with_retry_after(Duration::from_secs(2)),
        RestResponse::new(200).with_body(r#"{"id":"7"}"#),
    ]));
    let pipeline = pipeline(Arc::clone(&script) as Arc<dyn RestTransport>);
    let started = Instant::now();

    let message: Submission<Message> =
        pipeline.submit(post_message(), &CallContext::new()).await.expect("submit");

    assert_eq!(message.into_value(), Some(Message { id: "7".to_string() }));
    assert!(started.elapsed() >= Duration::from_secs(2));
    assert_eq!(script.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn second_429_surfaces_without_third_attempt() {
    let script = Arc::new(Script::new(vec![
        RestResponse::new(429).with_retry_after(Duration::from_secs(2)),
        RestResponse::new(429).with_retry_after(Duration::from_secs(2)),
        RestResponse::new(200),
    ]));
    let pipeline = pipeline(Arc::clone(&script) as Arc<dyn RestTransport>);

    let err = pipeline.submit_unit(post_message(), &CallContext::new()).await.expect_err("429");

    assert_eq!(err, ConduitError::RateLimited { retry_after: Duration::from_secs(2), global: false });
    assert_eq!(script.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn server_errors_surface_as_transient_after_ceiling() {
    let script = Arc::new(Script::new(Vec::new()));
    let pipeline = pipeline(Arc::clone(&script) as Arc<dyn RestTransport>);

    let err = pipeline.submit_unit(post_message(), &CallContext::new()).await.expect_err("500s");

    assert!(matches!(err, ConduitError::Transient { status: Some(500), .. }));
    assert_eq!(script.calls(), 6);
}

#[tokio::test(start_paused = true)]
async fn cancellation_aborts_an_admission_wait() {
    let script = Arc::new(Script::new(vec![RestResponse::new(200).with_rate_limit(
        RateLimitHeaders {
            limit: Some(1),
            remaining: Some(0),
            reset_after: Some(Duration::from_secs(10)),
            bucket: Some("slow".to_string()),
            ..RateLimitHeaders::default()
        },
    )]));
    let store = Arc::new(BucketStore::new());
    let pipeline = RestPipeline::new(
        Arc::clone(&script) as Arc<dyn RestTransport>,
        Arc::new(Token),
        Arc::clone(&store),
        &RestConfig::default(),
    )
    .expect("pipeline");
    pipeline.submit_unit(post_message(), &CallContext::new()).await.expect("first");

    let ctx = CallContext::new();
    let token = ctx.token().clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        token.cancel();
    });
    let started = Instant::now();
    let err = pipeline.submit_unit(post_message(), &ctx).await.expect_err("cancelled");

    assert!(matches!(err, ConduitError::Cancelled { .. }));
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(script.calls(), 1);
    let snapshot = store.snapshot(&post_message().route).await.expect("bucket known");
    assert_eq!(snapshot.remaining, 0);
}

#[tokio::test(start_paused = true)]
async fn blocked_route_does_not_hold_back_another_major() {
    let script = Arc::new(Script::new(vec![
        RestResponse::new(200).with_rate_limit(RateLimitHeaders {
            limit: Some(1),
            remaining: Some(0),
            reset_after: Some(Duration::from_secs(10)),
            bucket: Some("messages".to_string()),
            ..RateLimitHeaders::default()
        }),
        RestResponse::new(204),
        RestResponse::new(204),
    ]));
    let pipeline = Arc::new(pipeline(Arc::clone(&script) as Arc<dyn RestTransport>));
    pipeline.submit_unit(post_message(), &CallContext::new()).await.expect("first");
    let started = Instant::now();

    let blocked = {
        let pipeline = Arc::clone(&pipeline);
        tokio::spawn(async move { pipeline.submit_unit(post_message(), &CallContext::new()).await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!blocked.is_finished(), "exhausted bucket must hold its route");

    let other = RestRequest::new(
        HttpMethod::Post,
        RouteKey::with_major("POST /channels/{channel_id}/messages", "7"),
        "/channels/7/messages",
    );
    let other_started = Instant::now();
    pipeline.submit_unit(other, &CallContext::new()).await.expect("other major");

    assert!(other_started.elapsed() < Duration::from_secs(1));
    assert!(!blocked.is_finished(), "route still waiting for its reset");
    blocked.await.expect("join").expect("after reset");
    assert!(started.elapsed() >= Duration::from_secs(10));
    assert_eq!(script.calls(), 3);
}

#[tokio::test]
async fn discovery_refreshes_the_shared_limiter() {
    let body = r#"{
        "url": "wss://gateway.test",
        "shards": 2,
        "session_start_limit": { "total": 1000, "remaining": 997, "reset_after": 60000, "max_concurrency": 2 }
    }"#;
    let script = Arc::new(Script::new(vec![RestResponse::new(200).with_body(body)]));
    let api = GatewayApi::new(Arc::new(pipeline(script as Arc<dyn RestTransport>)));
    let limiter = SessionStartLimiter::new(SessionStartLimit {
        total: 1,
        remaining: 1,
        reset_after: Duration::from_secs(1),
        max_concurrency: 1,
    });

    let limit = limiter.discover(&api, &CallContext::new()).await.expect("discover");

    assert_eq!(limit.remaining, 997);
    let snapshot = limiter.snapshot().await;
    assert_eq!(snapshot.total, 1000);
    assert_eq!(snapshot.max_concurrency, 2);
}
