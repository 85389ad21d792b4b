//! Session lifecycle states and the single transition function
//!
//! ```text
//! Disconnected -> Connecting -> AwaitingHandshake -> Identifying -> Connected
//!                    ^                            \-> Resuming ----/   |
//!                    |                                                  v
//!                    +------------------------------------------- Reconnecting
//! Connected | Reconnecting | handshake states -> Invalidated -> Disconnected
//! any -> Disconnected (caller disconnect)
//! ```

use std::time::Duration;

use conduit_domain::{ConduitError, Result, SessionState};
use tokio::time::Instant;

/// Events that move the lifecycle forward
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// The caller asked to connect, or an invalidated session restarts
    ConnectRequested,
    /// A transport link is open
    LinkEstablished,
    /// Opening a link failed
    LinkFailed,
    /// Hello arrived; `resume` when a resumable session exists
    HelloReceived { resume: bool },
    /// READY completed an Identify
    Ready,
    /// RESUMED completed a Resume
    Resumed,
    /// The link dropped in a way that allows resuming
    ConnectionLost,
    /// A reconnect attempt is starting
    ReconnectStarted,
    /// The service refused to continue the session
    Invalidated,
    /// Invalidation has been processed
    InvalidationHandled,
    /// A connection attempt was abandoned (budget, cancellation)
    ConnectAborted,
    /// The caller asked to disconnect
    DisconnectRequested,
}

/// Apply `trigger` to `state`
///
/// # Errors
/// Returns `ConduitError::ProtocolViolation` when `trigger` is not legal in
/// `state`; the caller must not change state in that case.
pub fn advance(state: SessionState, trigger: Trigger) -> Result<SessionState> {
    use SessionState as S;
    use Trigger as T;

    let next = match (state, trigger) {
        (_, T::DisconnectRequested) => S::Disconnected,
        (S::Disconnected, T::ConnectRequested) => S::Connecting,
        (S::Connecting, T::LinkEstablished) => S::AwaitingHandshake,
        (S::Connecting, T::LinkFailed) => S::Reconnecting,
        (
            S::Connecting | S::Reconnecting | S::AwaitingHandshake | S::Identifying | S::Resuming,
            T::ConnectAborted,
        ) => S::Disconnected,
        (S::AwaitingHandshake, T::HelloReceived { resume: true }) => S::Resuming,
        (S::AwaitingHandshake, T::HelloReceived { resume: false }) => S::Identifying,
        (S::Identifying, T::Ready) => S::Connected,
        (S::Resuming, T::Resumed) => S::Connected,
        (
            S::AwaitingHandshake | S::Identifying | S::Resuming | S::Connected,
            T::ConnectionLost,
        ) => S::Reconnecting,
        (S::Reconnecting, T::ReconnectStarted) => S::Connecting,
        (
            S::AwaitingHandshake | S::Identifying | S::Resuming | S::Connected | S::Reconnecting,
            T::Invalidated,
        ) => S::Invalidated,
        (S::Invalidated, T::InvalidationHandled) => S::Disconnected,
        (state, trigger) => {
            return Err(ConduitError::ProtocolViolation(format!(
                "{trigger:?} is not valid while {state}"
            )));
        }
    };
    Ok(next)
}

/// Mutable state of one gateway session, owned by its control task
#[derive(Debug, Clone, Default)]
pub struct Session {
    /// Assigned by READY
    pub session_id: Option<String>,
    /// Highest dispatch sequence seen
    pub sequence: Option<u64>,
    /// Endpoint READY asked resumes to use
    pub resume_url: Option<String>,
    /// From Hello
    pub heartbeat_interval: Option<Duration>,
    pub last_heartbeat_sent: Option<Instant>,
    pub last_heartbeat_ack: Option<Instant>,
    /// A heartbeat went out and its ACK has not arrived
    pub ack_outstanding: bool,
    /// Whether the last disconnect left the session resumable
    pub resumable: bool,
}

impl Session {
    /// Whether the next handshake should Resume rather than Identify
    pub fn can_resume(&self) -> bool {
        self.resumable && self.session_id.is_some() && self.sequence.is_some()
    }

    /// Record a sequence number from a dispatch
    pub fn observe_sequence(&mut self, sequence: u64) {
        if self.sequence.map_or(true, |current| sequence > current) {
            self.sequence = Some(sequence);
        }
    }

    /// Record an outgoing heartbeat
    pub fn heartbeat_sent(&mut self, at: Instant) {
        self.last_heartbeat_sent = Some(at);
        self.ack_outstanding = true;
    }

    /// Record the ACK for the outstanding heartbeat
    pub fn heartbeat_acked(&mut self, at: Instant) {
        self.last_heartbeat_ack = Some(at);
        self.ack_outstanding = false;
    }

    /// Round trip of the last acknowledged heartbeat
    pub fn latency(&self) -> Option<Duration> {
        match (self.last_heartbeat_sent, self.last_heartbeat_ack) {
            (Some(sent), Some(acked)) if acked >= sent => Some(acked - sent),
            _ => None,
        }
    }

    /// Reset per-link heartbeat bookkeeping
    pub fn reset_link(&mut self) {
        self.heartbeat_interval = None;
        self.last_heartbeat_sent = None;
        self.last_heartbeat_ack = None;
        self.ack_outstanding = false;
    }

    /// Forget everything; the next handshake identifies
    pub fn clear(&mut self) {
        *self = Self::default();
    }
}
