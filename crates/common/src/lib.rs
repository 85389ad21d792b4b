//! Modular common utilities shared across Conduit crates.
//!
//! # Feature Tiers
//!
//! Enable cargo features to opt into the tiers you need:
//! - `foundation`: error classification and serde helpers
//! - `runtime`: async infrastructure (clock, cancellation scopes, retry)
//! - `observability`: optional tracing (pulled in by `runtime`)

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::complexity, clippy::suspicious)]

// Foundation tier
// -----------------------------------------------------------------
#[cfg(feature = "foundation")]
pub mod error;
#[cfg(feature = "foundation")]
pub mod utils;

// Runtime tier
// --------------------------------------------------------------------
#[cfg(feature = "runtime")]
pub mod resilience;

// Re-export commonly used types and traits for convenience
// ------------------------
#[cfg(feature = "foundation")]
pub use error::{ErrorClassification, ErrorSeverity};
#[cfg(feature = "runtime")]
pub use resilience::{
    BackoffStrategy, CancelScope, Clock, Interrupted, Jitter, MockClock, RetryConfig,
    RetryConfigBuilder, RetryDecision, RetryError, RetryExecutor, RetryPolicy, RetryResult,
    SystemClock,
};
#[cfg(feature = "foundation")]
pub use utils::serde::{duration_millis, duration_secs_f64};
