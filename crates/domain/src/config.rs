//! Configuration structures
//!
//! Every section has serde defaults so a file only needs to name what it
//! overrides. Durations are integer milliseconds on disk.

use std::fmt;
use std::time::Duration;

use conduit_common::utils::serde::duration_millis;
use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_API_BASE_URL, DEFAULT_BACKOFF_BASE_MS, DEFAULT_BACKOFF_CAP_MS, DEFAULT_EVENT_BUFFER,
    DEFAULT_GLOBAL_REQUESTS_PER_SECOND, DEFAULT_HANDSHAKE_TIMEOUT_MS, DEFAULT_LARGE_THRESHOLD,
    DEFAULT_MAX_RETRIES, DEFAULT_RATE_LIMIT_FALLBACK_MS, DEFAULT_RATE_LIMIT_RETRIES,
    DEFAULT_USER_AGENT,
};
use crate::errors::{ConduitError, Result};
use crate::types::ConnectionProperties;

/// Top-level client configuration
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConduitConfig {
    /// Bot credential, without the scheme prefix
    pub token: String,
    pub rest: RestConfig,
    pub gateway: GatewayConfig,
    pub logging: LoggingConfig,
}

impl fmt::Debug for ConduitConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConduitConfig")
            .field("token", &if self.token.is_empty() { "<unset>" } else { "<redacted>" })
            .field("rest", &self.rest)
            .field("gateway", &self.gateway)
            .field("logging", &self.logging)
            .finish()
    }
}

impl ConduitConfig {
    /// Reject configurations that cannot work
    ///
    /// # Errors
    /// Returns `ConduitError::Config` naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        if self.token.trim().is_empty() {
            return Err(ConduitError::Config("token must not be empty".to_string()));
        }
        self.rest.validate()?;
        self.gateway.validate()
    }
}

/// REST pipeline settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RestConfig {
    pub api_base_url: String,
    pub user_agent: String,
    /// Retries for transient failures (connection errors, timeouts, 5xx)
    pub max_retries: u32,
    /// Retries for 429 responses; always bounded
    pub rate_limit_retries: u32,
    #[serde(with = "duration_millis")]
    pub backoff_base: Duration,
    #[serde(with = "duration_millis")]
    pub backoff_cap: Duration,
    /// Wait used when a 429 carries no `Retry-After`
    #[serde(with = "duration_millis")]
    pub rate_limit_fallback: Duration,
    #[serde(with = "duration_millis")]
    pub request_timeout: Duration,
    /// Process-wide request ceiling per second; `None` disables it
    pub global_requests_per_second: Option<u32>,
}

impl Default for RestConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            max_retries: DEFAULT_MAX_RETRIES,
            rate_limit_retries: DEFAULT_RATE_LIMIT_RETRIES,
            backoff_base: Duration::from_millis(DEFAULT_BACKOFF_BASE_MS),
            backoff_cap: Duration::from_millis(DEFAULT_BACKOFF_CAP_MS),
            rate_limit_fallback: Duration::from_millis(DEFAULT_RATE_LIMIT_FALLBACK_MS),
            request_timeout: Duration::from_secs(30),
            global_requests_per_second: Some(DEFAULT_GLOBAL_REQUESTS_PER_SECOND),
        }
    }
}

impl RestConfig {
    fn validate(&self) -> Result<()> {
        if self.api_base_url.trim().is_empty() {
            return Err(ConduitError::Config("rest.api_base_url must not be empty".to_string()));
        }
        if self.backoff_base > self.backoff_cap {
            return Err(ConduitError::Config(
                "rest.backoff_base must not exceed rest.backoff_cap".to_string(),
            ));
        }
        if self.global_requests_per_second == Some(0) {
            return Err(ConduitError::Config(
                "rest.global_requests_per_second must be positive when set".to_string(),
            ));
        }
        Ok(())
    }
}

/// Gateway session settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Fixed gateway URL; discovered through `GET /gateway/bot` when unset
    pub url: Option<String>,
    pub intents: u64,
    pub shard: Option<[u32; 2]>,
    pub large_threshold: u8,
    pub properties: ConnectionProperties,
    /// Bound on the wait for Hello and for Ready/Resumed
    #[serde(with = "duration_millis")]
    pub handshake_timeout: Duration,
    /// Randomize the first heartbeat within one interval
    pub jitter_first_heartbeat: bool,
    #[serde(with = "duration_millis")]
    pub reconnect_backoff_base: Duration,
    #[serde(with = "duration_millis")]
    pub reconnect_backoff_cap: Duration,
    /// Capacity of the event and transition broadcast channels
    pub event_buffer: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            url: None,
            intents: 0,
            shard: None,
            large_threshold: DEFAULT_LARGE_THRESHOLD,
            properties: ConnectionProperties::default(),
            handshake_timeout: Duration::from_millis(DEFAULT_HANDSHAKE_TIMEOUT_MS),
            jitter_first_heartbeat: true,
            reconnect_backoff_base: Duration::from_millis(DEFAULT_BACKOFF_BASE_MS),
            reconnect_backoff_cap: Duration::from_millis(DEFAULT_BACKOFF_CAP_MS),
            event_buffer: DEFAULT_EVENT_BUFFER,
        }
    }
}

impl GatewayConfig {
    fn validate(&self) -> Result<()> {
        if let Some([id, count]) = self.shard {
            if count == 0 || id >= count {
                return Err(ConduitError::Config(format!(
                    "gateway.shard [{id}, {count}] is out of range"
                )));
            }
        }
        if !(50..=250).contains(&self.large_threshold) {
            return Err(ConduitError::Config(
                "gateway.large_threshold must be between 50 and 250".to_string(),
            ));
        }
        if self.event_buffer == 0 {
            return Err(ConduitError::Config("gateway.event_buffer must be positive".to_string()));
        }
        if self.reconnect_backoff_base > self.reconnect_backoff_cap {
            return Err(ConduitError::Config(
                "gateway.reconnect_backoff_base must not exceed gateway.reconnect_backoff_cap"
                    .to_string(),
            ));
        }
        Ok(())
    }
}

/// Logging settings consumed by the tracing initializer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive, e.g. `info` or `conduit_core=debug`
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), json: false }
    }
}
