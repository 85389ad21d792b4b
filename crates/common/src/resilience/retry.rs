//! Generic retry strategy implementation with backoff and jitter
//!
//! This module provides a flexible retry mechanism for any operation that
//! might fail and needs retry logic. Two independent ceilings bound the loop:
//! `max_retries` caps backoff-driven retries ([`RetryDecision::Retry`]) and
//! `max_directed_retries` caps retries whose delay the failure itself
//! dictates ([`RetryDecision::RetryAfter`], e.g. a `Retry-After` header).

use std::fmt;
use std::future::Future;
use std::time::Duration;

use rand::Rng;
use thiserror::Error;
use tracing::{debug, instrument, warn};

use super::cancel::{CancelScope, Interrupted};

/// Errors that can occur during retry operations
#[derive(Debug, Error)]
pub enum RetryError<E> {
    /// All retry attempts have been exhausted; carries the last failure
    #[error("All retry attempts exhausted after {attempts} tries")]
    AttemptsExhausted { attempts: u32, last_error: E },

    /// The operation failed with a non-retryable error
    #[error("Operation failed with non-retryable error")]
    NonRetryable { error: E },

    /// The retry strategy configuration is invalid
    #[error("Invalid retry configuration: {message}")]
    InvalidConfiguration { message: String },

    /// A wait or attempt was interrupted by cancellation or deadline
    #[error("Retry interrupted: {0}")]
    Interrupted(Interrupted),
}

impl<E> RetryError<E> {
    /// The last operation error, when one was observed
    pub fn into_last_error(self) -> Option<E> {
        match self {
            Self::AttemptsExhausted { last_error, .. } => Some(last_error),
            Self::NonRetryable { error } => Some(error),
            Self::InvalidConfiguration { .. } | Self::Interrupted(_) => None,
        }
    }
}

/// Result type for retry operations
pub type RetryResult<T, E> = Result<T, RetryError<E>>;

/// Trait for determining whether an error should be retried
pub trait RetryPolicy<E> {
    /// Determine if the error should be retried and optionally provide a custom
    /// delay
    fn should_retry(&self, error: &E, attempt: u32) -> RetryDecision;
}

/// Decision for whether to retry an operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry the operation with the default backoff delay
    Retry,
    /// Retry the operation after exactly this delay
    RetryAfter(Duration),
    /// Don't retry the operation
    Stop,
}

/// Backoff strategy for calculating retry delays
#[derive(Debug, Clone, PartialEq)]
pub enum BackoffStrategy {
    /// Fixed delay between retries
    Fixed(Duration),
    /// Exponential backoff: initial_delay * base^attempt, capped at max_delay
    Exponential { initial_delay: Duration, base: f64, max_delay: Duration },
}

impl BackoffStrategy {
    /// Calculate the un-jittered delay for the given retry (0-based)
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        match self {
            Self::Fixed(delay) => *delay,
            Self::Exponential { initial_delay, base, max_delay } => {
                let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
                let delay = initial_delay.as_secs_f64() * base.powi(exponent);
                if delay.is_finite() {
                    Duration::from_secs_f64(delay.min(max_delay.as_secs_f64()))
                } else {
                    *max_delay
                }
            }
        }
    }

    /// Upper bound on any delay this strategy produces
    pub fn cap(&self) -> Duration {
        match self {
            Self::Fixed(delay) => *delay,
            Self::Exponential { max_delay, .. } => *max_delay,
        }
    }
}

/// Jitter type for adding randomness to retry delays
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Jitter {
    /// No jitter
    None,
    /// Full jitter: 0 to calculated_delay
    Full,
    /// Equal jitter: calculated_delay/2 to calculated_delay
    Equal,
    /// Decorrelated jitter: uniform in `[base, previous * 3]`, so the band
    /// widens as delays grow
    Decorrelated { base: Duration },
}

impl Jitter {
    /// Apply jitter to the calculated delay; the result never exceeds `cap`
    pub fn apply(&self, delay: Duration, previous: Option<Duration>, cap: Duration) -> Duration {
        let mut rng = rand::thread_rng();
        let jittered = match self {
            Self::None => delay,
            Self::Full => random_between(&mut rng, Duration::ZERO, delay),
            Self::Equal => random_between(&mut rng, delay / 2, delay),
            Self::Decorrelated { base } => {
                let upper = previous.unwrap_or(*base).saturating_mul(3).max(*base);
                random_between(&mut rng, *base, upper)
            }
        };
        jittered.min(cap)
    }
}

fn random_between(rng: &mut impl Rng, low: Duration, high: Duration) -> Duration {
    if high <= low {
        return low;
    }
    let span = u64::try_from((high - low).as_micros()).unwrap_or(u64::MAX);
    low + Duration::from_micros(rng.gen_range(0..=span))
}

/// Configuration for retry behavior
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of backoff-driven retries after the first attempt
    pub max_retries: u32,
    /// Maximum number of retries whose delay the error dictates
    pub max_directed_retries: u32,
    /// Backoff strategy for calculating delays
    pub backoff: BackoffStrategy,
    /// Jitter type for randomizing delays
    pub jitter: Jitter,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            max_directed_retries: 1,
            backoff: BackoffStrategy::Exponential {
                initial_delay: Duration::from_secs(1),
                base: 2.0,
                max_delay: Duration::from_secs(30),
            },
            jitter: Jitter::Decorrelated { base: Duration::from_secs(1) },
        }
    }
}

impl RetryConfig {
    /// Create a configuration builder
    pub fn builder() -> RetryConfigBuilder {
        RetryConfigBuilder::new()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), RetryError<()>> {
        match &self.backoff {
            BackoffStrategy::Exponential { base, .. } if *base < 1.0 => {
                return Err(RetryError::InvalidConfiguration {
                    message: "exponential base must be at least 1".to_string(),
                });
            }
            BackoffStrategy::Exponential { initial_delay, max_delay, .. }
                if initial_delay > max_delay =>
            {
                return Err(RetryError::InvalidConfiguration {
                    message: "initial_delay must not exceed max_delay".to_string(),
                });
            }
            _ => {}
        }

        Ok(())
    }

    /// Delay before retry number `retry` (0-based), given the previous delay
    pub fn delay_for(&self, retry: u32, previous: Option<Duration>) -> Duration {
        let delay = self.backoff.calculate_delay(retry);
        self.jitter.apply(delay, previous, self.backoff.cap())
    }
}

/// Builder for RetryConfig with fluent API
#[derive(Debug)]
pub struct RetryConfigBuilder {
    config: RetryConfig,
}

impl Default for RetryConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RetryConfigBuilder {
    pub fn new() -> Self {
        Self { config: RetryConfig::default() }
    }

    pub fn max_retries(mut self, retries: u32) -> Self {
        self.config.max_retries = retries;
        self
    }

    pub fn max_directed_retries(mut self, retries: u32) -> Self {
        self.config.max_directed_retries = retries;
        self
    }

    pub fn fixed_backoff(mut self, delay: Duration) -> Self {
        self.config.backoff = BackoffStrategy::Fixed(delay);
        self
    }

    pub fn exponential_backoff(
        mut self,
        initial_delay: Duration,
        base: f64,
        max_delay: Duration,
    ) -> Self {
        self.config.backoff = BackoffStrategy::Exponential { initial_delay, base, max_delay };
        self
    }

    pub fn no_jitter(mut self) -> Self {
        self.config.jitter = Jitter::None;
        self
    }

    pub fn full_jitter(mut self) -> Self {
        self.config.jitter = Jitter::Full;
        self
    }

    pub fn equal_jitter(mut self) -> Self {
        self.config.jitter = Jitter::Equal;
        self
    }

    pub fn decorrelated_jitter(mut self, base: Duration) -> Self {
        self.config.jitter = Jitter::Decorrelated { base };
        self
    }

    pub fn build(self) -> Result<RetryConfig, RetryError<()>> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// The main retry executor
#[derive(Debug, Clone)]
pub struct RetryExecutor<P> {
    config: RetryConfig,
    policy: P,
}

impl<P> RetryExecutor<P> {
    /// Create a new retry executor with the given configuration and policy
    pub fn new(config: RetryConfig, policy: P) -> Self {
        Self { config, policy }
    }

    /// Create with default configuration
    pub fn with_policy(policy: P) -> Self {
        Self::new(RetryConfig::default(), policy)
    }

    /// The configuration this executor runs with
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Execute an operation with retry logic inside a cancellation scope
    ///
    /// Both the attempts and the sleeps between them are interrupted when the
    /// scope is cancelled or its deadline passes.
    #[instrument(skip_all, fields(max_retries = self.config.max_retries))]
    pub async fn execute<F, Fut, T, E>(&self, scope: &CancelScope, mut operation: F) -> RetryResult<T, E>
    where
        P: RetryPolicy<E>,
        E: fmt::Debug,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt: u32 = 0;
        let mut retries: u32 = 0;
        let mut directed: u32 = 0;
        let mut previous_delay: Option<Duration> = None;

        loop {
            attempt += 1;
            debug!(attempt, "Executing operation");

            let error = match scope.run(operation()).await.map_err(RetryError::Interrupted)? {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(attempt, "Operation succeeded after retries");
                    }
                    return Ok(value);
                }
                Err(error) => error,
            };

            let delay = match self.policy.should_retry(&error, attempt) {
                RetryDecision::Stop => {
                    debug!(?error, "Retry policy determined not to retry");
                    return Err(RetryError::NonRetryable { error });
                }
                RetryDecision::Retry => {
                    if retries >= self.config.max_retries {
                        warn!(attempts = attempt, ?error, "All retry attempts exhausted");
                        return Err(RetryError::AttemptsExhausted { attempts: attempt, last_error: error });
                    }
                    let delay = self.config.delay_for(retries, previous_delay);
                    retries += 1;
                    previous_delay = Some(delay);
                    delay
                }
                RetryDecision::RetryAfter(delay) => {
                    if directed >= self.config.max_directed_retries {
                        warn!(attempts = attempt, ?error, "Directed retries exhausted");
                        return Err(RetryError::AttemptsExhausted { attempts: attempt, last_error: error });
                    }
                    directed += 1;
                    delay
                }
            };

            warn!(
                attempt,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                ?error,
                "Operation failed, retrying"
            );
            scope.sleep(delay).await.map_err(RetryError::Interrupted)?;
        }
    }
}
