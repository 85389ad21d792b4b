//! Gateway discovery results and session lifecycle states

use std::fmt;
use std::time::Duration;

use conduit_common::utils::serde::duration_millis;
use serde::{Deserialize, Serialize};

/// Response of `GET /gateway`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayEndpoint {
    pub url: String,
}

/// Session-start budget as reported by `GET /gateway/bot`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStartLimit {
    pub total: u32,
    pub remaining: u32,
    #[serde(with = "duration_millis")]
    pub reset_after: Duration,
    pub max_concurrency: u32,
}

/// Response of `GET /gateway/bot`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayBotEndpoint {
    pub url: String,
    pub shards: u32,
    pub session_start_limit: SessionStartLimit,
}

/// Lifecycle state of one gateway session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Disconnected,
    Connecting,
    AwaitingHandshake,
    Identifying,
    Resuming,
    Connected,
    Reconnecting,
    Invalidated,
}

impl SessionState {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::AwaitingHandshake => "awaiting_handshake",
            Self::Identifying => "identifying",
            Self::Resuming => "resuming",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::Invalidated => "invalidated",
        }
    }

    /// States in which a transport link is open
    pub const fn has_link(self) -> bool {
        matches!(self, Self::AwaitingHandshake | Self::Identifying | Self::Resuming | Self::Connected)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One observed state change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Transition {
    pub from: SessionState,
    pub to: SessionState,
}
