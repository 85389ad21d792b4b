//! Retry middleware for REST calls
//!
//! Transient failures (no response, 5xx) back off with decorrelated jitter up
//! to `max_retries`; 429s wait for `Retry-After` (or the fallback) and are
//! retried at most `rate_limit_retries` times. Other statuses pass straight
//! through. When retries run out the final response is returned unchanged so
//! the pipeline can map it onto the error taxonomy.

use std::time::Duration;

use async_trait::async_trait;
use conduit_common::error::ErrorClassification;
use conduit_common::resilience::{
    RetryConfig, RetryDecision, RetryError, RetryExecutor, RetryPolicy,
};
use conduit_domain::{ConduitError, RestConfig, RestRequest, RestResponse, Result};

use super::ports::RestTransport;
use crate::context::{interrupted, CallContext};

/// Why one attempt did not produce a final response
#[derive(Debug)]
pub enum AttemptFailure {
    /// No response was received
    Transport(ConduitError),
    /// A response whose status is worth retrying
    Status(RestResponse),
}

/// Classification of REST attempt failures
#[derive(Debug, Clone)]
pub struct RestRetryPolicy {
    rate_limit_fallback: Duration,
}

impl RestRetryPolicy {
    /// Policy waiting `rate_limit_fallback` on a 429 without `Retry-After`
    pub fn new(rate_limit_fallback: Duration) -> Self {
        Self { rate_limit_fallback }
    }
}

impl RetryPolicy<AttemptFailure> for RestRetryPolicy {
    fn should_retry(&self, error: &AttemptFailure, _attempt: u32) -> RetryDecision {
        match error {
            AttemptFailure::Transport(err) if err.is_retryable() => RetryDecision::Retry,
            AttemptFailure::Transport(_) => RetryDecision::Stop,
            AttemptFailure::Status(response) if response.is_rate_limited() => {
                RetryDecision::RetryAfter(response.retry_after.unwrap_or(self.rate_limit_fallback))
            }
            AttemptFailure::Status(response) if response.is_server_error() => RetryDecision::Retry,
            AttemptFailure::Status(_) => RetryDecision::Stop,
        }
    }
}

/// Middleware that retries an inner transport
pub struct RetryLayer<T> {
    inner: T,
    executor: RetryExecutor<RestRetryPolicy>,
}

impl<T> RetryLayer<T> {
    /// Wrap `inner` with an explicit retry configuration
    pub fn new(inner: T, config: RetryConfig, policy: RestRetryPolicy) -> Self {
        Self { inner, executor: RetryExecutor::new(config, policy) }
    }

    /// Build from REST settings: decorrelated jitter between `backoff_base`
    /// and `backoff_cap`
    ///
    /// # Errors
    /// Returns `ConduitError::Config` if the backoff settings are invalid.
    pub fn from_config(inner: T, config: &RestConfig) -> Result<Self> {
        let retry = RetryConfig::builder()
            .max_retries(config.max_retries)
            .max_directed_retries(config.rate_limit_retries)
            .exponential_backoff(config.backoff_base, 2.0, config.backoff_cap)
            .decorrelated_jitter(config.backoff_base)
            .build()
            .map_err(|err| ConduitError::Config(err.to_string()))?;
        Ok(Self::new(inner, retry, RestRetryPolicy::new(config.rate_limit_fallback)))
    }

    /// The wrapped transport
    pub fn inner(&self) -> &T {
        &self.inner
    }
}

fn classify(outcome: Result<RestResponse>) -> std::result::Result<RestResponse, AttemptFailure> {
    match outcome {
        Ok(response) if response.is_rate_limited() || response.is_server_error() => {
            Err(AttemptFailure::Status(response))
        }
        Ok(response) => Ok(response),
        Err(err) => Err(AttemptFailure::Transport(err)),
    }
}

#[async_trait]
impl<T: RestTransport> RestTransport for RetryLayer<T> {
    async fn execute(&self, request: &RestRequest, ctx: &CallContext) -> Result<RestResponse> {
        let inner = &self.inner;
        let outcome = self
            .executor
            .execute(ctx, || async move { classify(inner.execute(request, ctx).await) })
            .await;

        match outcome {
            Ok(response) => Ok(response),
            Err(RetryError::AttemptsExhausted { last_error, .. }) => match last_error {
                AttemptFailure::Status(response) => Ok(response),
                AttemptFailure::Transport(err) => Err(err),
            },
            Err(RetryError::NonRetryable { error }) => match error {
                AttemptFailure::Status(response) => Ok(response),
                AttemptFailure::Transport(err) => Err(err),
            },
            Err(RetryError::Interrupted(reason)) => Err(interrupted(reason)),
            Err(RetryError::InvalidConfiguration { message }) => Err(ConduitError::Config(message)),
        }
    }
}
