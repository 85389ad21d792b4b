//! Error classification shared by every Conduit error type
//!
//! Conduit keeps one concrete error enum per layer (see `conduit-domain`)
//! and classifies each of them through the [`ErrorClassification`] trait so
//! retry middleware, logging and callers can reason about failures without
//! matching on every variant.
//!
//! | Level | Use Case | Examples |
//! |-------|----------|----------|
//! | **Info** | Expected conditions | Caller cancellation |
//! | **Warning** | Degraded but operational | Rate limiting, transient failures, resumable drops |
//! | **Error** | Failure requiring attention | Client errors, protocol violations |
//! | **Critical** | System integrity at risk | Invalid credentials, internal invariant violations |
//!
//! ```rust,ignore
//! use conduit_common::error::ErrorClassification;
//!
//! fn log_failure<E: ErrorClassification + std::fmt::Display>(err: &E) {
//!     if err.is_critical() {
//!         tracing::error!(severity = %err.severity(), "{err}");
//!     }
//! }
//! ```

use std::fmt;
use std::time::Duration;

/// Standard interface for classifying errors by their characteristics
pub trait ErrorClassification {
    /// Check if this error is retryable
    ///
    /// Retryable errors are transient issues that may succeed if attempted
    /// again, such as network timeouts, 5xx responses or rate limiting.
    fn is_retryable(&self) -> bool;

    /// Get the error severity level
    ///
    /// Used for monitoring, alerting, and logging decisions.
    fn severity(&self) -> ErrorSeverity;

    /// Check if this is a critical error requiring immediate attention
    ///
    /// Critical errors typically indicate rejected credentials or internal
    /// invariant violations.
    fn is_critical(&self) -> bool;

    /// Get the suggested retry delay if applicable
    ///
    /// Returns `Some(Duration)` when a specific delay is recommended (e.g.,
    /// from a `Retry-After` header), or `None` if no delay is suggested.
    fn retry_after(&self) -> Option<Duration>;
}

/// Error severity levels for monitoring and alerting
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    /// Informational, typically for debugging
    Info,
    /// Warning, should be monitored but not critical
    Warning,
    /// Error, requires attention and action
    Error,
    /// Critical, immediate action required
    Critical,
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Info => write!(f, "INFO"),
            Self::Warning => write!(f, "WARN"),
            Self::Error => write!(f, "ERROR"),
            Self::Critical => write!(f, "CRITICAL"),
        }
    }
}
