//! Resilience patterns for fault tolerance and error handling
//!
//! This module provides **generic, reusable** building blocks:
//! - **Clock**: monotonic/wall time behind a trait so waits are testable
//! - **Cancellation scopes**: a token plus optional deadline that bounds
//!   every suspension point
//! - **Retry Logic**: configurable retry strategies with exponential backoff
//!   and jitter, with separate ceilings for backoff-driven and
//!   server-directed retries
//!
//! The implementations are generic over error types and carry no knowledge of
//! HTTP or gateway specifics; `conduit-core` supplies the policies.
//!
//! ## Example
//!
//! ```rust,ignore
//! use conduit_common::resilience::{CancelScope, RetryConfig, RetryExecutor};
//!
//! let executor = RetryExecutor::new(RetryConfig::default(), MyPolicy);
//! let scope = CancelScope::new().timeout(Duration::from_secs(30));
//! let value = executor.execute(&scope, || fetch()).await?;
//! ```

pub mod cancel;
pub mod clock;
pub mod retry;

pub use cancel::{CancelScope, Interrupted};
pub use clock::{Clock, MockClock, SystemClock};
pub use retry::{
    BackoffStrategy, Jitter, RetryConfig, RetryConfigBuilder, RetryDecision, RetryError,
    RetryExecutor, RetryPolicy, RetryResult,
};
