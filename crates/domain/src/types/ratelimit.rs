//! Rate-limit metadata reported by the service and observed bucket state

use std::time::Duration;

use chrono::{DateTime, Utc};
use conduit_common::utils::serde::duration_secs_f64;
use serde::{Deserialize, Serialize};

/// Which limit a 429 response refers to (`X-RateLimit-Scope`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RateLimitScope {
    /// Per-credential limit
    User,
    /// Process-wide limit across all routes
    Global,
    /// Per-resource limit shared with other clients
    Shared,
}

impl RateLimitScope {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "user" => Some(Self::User),
            "global" => Some(Self::Global),
            "shared" => Some(Self::Shared),
            _ => None,
        }
    }
}

/// JSON body of a 429 response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitedBody {
    #[serde(default)]
    pub message: String,
    /// Fractional seconds before the request may be retried
    #[serde(with = "duration_secs_f64")]
    pub retry_after: Duration,
    #[serde(default)]
    pub global: bool,
}

/// Rate-limit headers parsed from one response
///
/// Every field is optional on the wire; a response with none of them carries
/// no limiting information.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RateLimitHeaders {
    pub limit: Option<u32>,
    pub remaining: Option<u32>,
    /// Absolute reset instant (`X-RateLimit-Reset`, epoch seconds)
    pub reset_at: Option<DateTime<Utc>>,
    /// Relative reset (`X-RateLimit-Reset-After`, fractional seconds)
    pub reset_after: Option<Duration>,
    pub bucket: Option<String>,
    pub global: bool,
    pub scope: Option<RateLimitScope>,
}

impl RateLimitHeaders {
    /// Whether enough is known to track a route bucket
    pub fn describes_bucket(&self) -> bool {
        self.bucket.is_some()
            && self.limit.is_some()
            && self.remaining.is_some()
            && (self.reset_after.is_some() || self.reset_at.is_some())
    }

    /// Time until reset, preferring the relative header and falling back to
    /// the absolute one measured against `now`
    pub fn reset_after_from(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.reset_after
            .or_else(|| self.reset_at.map(|at| (at - now).to_std().unwrap_or(Duration::ZERO)))
    }
}

/// Point-in-time view of a bucket for diagnostics and tests
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BucketSnapshot {
    pub bucket_id: String,
    pub limit: u32,
    pub remaining: u32,
    /// Time until the window resets, zero if already elapsed
    pub reset_after: Duration,
    pub is_global: bool,
}
