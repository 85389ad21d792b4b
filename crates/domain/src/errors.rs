//! Error types used throughout Conduit

use std::collections::HashMap;
use std::time::Duration;

use conduit_common::error::{ErrorClassification, ErrorSeverity};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Structured error body returned by the REST API on 4xx responses
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApiErrorDetail {
    /// Service-specific JSON error code
    #[serde(default)]
    pub code: u32,
    /// Human readable message
    #[serde(default)]
    pub message: String,
    /// Per-field validation errors, kept as raw JSON
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errors: Option<HashMap<String, serde_json::Value>>,
}

/// Main error type for Conduit
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConduitError {
    /// Connection failure, timeout or 5xx that outlived its retries
    #[error("Transient failure: {message}")]
    Transient { message: String, status: Option<u16> },

    /// A 429 that outlived its bounded retries
    #[error("Rate limited (global: {global}), retry after {retry_after:?}")]
    RateLimited { retry_after: Duration, global: bool },

    /// Non-429 4xx response; never retried
    #[error("Client error {status}: {}", detail.message)]
    ClientError { status: u16, detail: ApiErrorDetail },

    /// Caller cancellation or deadline expiry
    #[error("Cancelled: {reason}")]
    Cancelled { reason: String },

    /// Unexpected gateway frame or illegal transition trigger
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    /// The gateway refused to continue the session
    #[error("Session invalidated (close code {code:?}): {reason}")]
    SessionInvalidated { code: Option<u16>, reason: String },

    /// No session starts left before the caller's deadline
    #[error("Session start budget exhausted, resets in {reset_after:?}")]
    BudgetExhausted { reset_after: Duration },

    /// Response body or frame payload could not be decoded
    #[error("Decode error: {0}")]
    Decode(String),

    /// Invalid or missing configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// The request could not be built or serialized
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Internal invariant violated
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ConduitError {
    /// Shorthand for a transient failure without a status code
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient { message: message.into(), status: None }
    }

    /// Shorthand for caller cancellation
    pub fn cancelled(reason: impl Into<String>) -> Self {
        Self::Cancelled { reason: reason.into() }
    }

    /// HTTP status carried by this error, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Transient { status, .. } => *status,
            Self::ClientError { status, .. } => Some(*status),
            Self::RateLimited { .. } => Some(429),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for ConduitError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(err.to_string())
    }
}

impl ErrorClassification for ConduitError {
    fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient { .. } | Self::RateLimited { .. })
    }

    fn severity(&self) -> ErrorSeverity {
        match self {
            Self::Cancelled { .. } => ErrorSeverity::Info,
            Self::Transient { .. } | Self::RateLimited { .. } | Self::BudgetExhausted { .. } => {
                ErrorSeverity::Warning
            }
            Self::ClientError { status: 401, .. }
            | Self::InvalidRequest(_)
            | Self::Internal(_) => ErrorSeverity::Critical,
            Self::ClientError { .. }
            | Self::ProtocolViolation(_)
            | Self::SessionInvalidated { .. }
            | Self::Decode(_)
            | Self::Config(_) => ErrorSeverity::Error,
        }
    }

    fn is_critical(&self) -> bool {
        self.severity() == ErrorSeverity::Critical
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after, .. } => Some(*retry_after),
            Self::BudgetExhausted { reset_after } => Some(*reset_after),
            _ => None,
        }
    }
}

/// Result type alias for Conduit operations
pub type Result<T> = std::result::Result<T, ConduitError>;
