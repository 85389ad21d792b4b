//! Cancellation scopes for suspension points
//!
//! Every wait in the request path (admission waits, retry sleeps, budget
//! waits) and every in-flight transport call runs inside a [`CancelScope`]:
//! a cancellation token paired with an optional absolute deadline.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Why a scoped wait or call was interrupted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Interrupted {
    /// The scope's cancellation token fired
    #[error("cancelled by caller")]
    Cancelled,
    /// The wait would run past, or ran past, the scope's deadline
    #[error("deadline exceeded")]
    DeadlineExceeded,
}

/// Cancellation token plus optional deadline
#[derive(Debug, Clone, Default)]
pub struct CancelScope {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl CancelScope {
    /// Scope that is never cancelled and has no deadline
    pub fn new() -> Self {
        Self::default()
    }

    /// Scope driven by an existing cancellation token
    pub fn with_token(token: CancellationToken) -> Self {
        Self { token, deadline: None }
    }

    /// Attach an absolute deadline
    #[must_use]
    pub fn deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Attach a deadline relative to now
    #[must_use]
    pub fn timeout(self, timeout: Duration) -> Self {
        self.deadline(Instant::now() + timeout)
    }

    /// The cancellation token backing this scope
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// The absolute deadline, if any
    pub fn deadline_at(&self) -> Option<Instant> {
        self.deadline
    }

    /// Whether the token has already fired
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Whether waiting `wait` from now would overrun the deadline
    pub fn would_exceed(&self, wait: Duration) -> bool {
        self.deadline.is_some_and(|deadline| Instant::now() + wait > deadline)
    }

    /// Time left until the deadline, if one is set
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline.map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// Sleep for `wait`, failing fast when the deadline would be overrun and
    /// waking early when the token fires
    pub async fn sleep(&self, wait: Duration) -> Result<(), Interrupted> {
        if self.token.is_cancelled() {
            return Err(Interrupted::Cancelled);
        }
        if wait.is_zero() {
            return Ok(());
        }
        if self.would_exceed(wait) {
            return Err(Interrupted::DeadlineExceeded);
        }

        tokio::select! {
            () = self.token.cancelled() => Err(Interrupted::Cancelled),
            () = tokio::time::sleep(wait) => Ok(()),
        }
    }

    /// Drive `fut` to completion unless the token fires or the deadline
    /// passes first; the future is dropped on interruption
    pub async fn run<F>(&self, fut: F) -> Result<F::Output, Interrupted>
    where
        F: Future,
    {
        if self.token.is_cancelled() {
            return Err(Interrupted::Cancelled);
        }

        match self.deadline {
            Some(deadline) => tokio::select! {
                () = self.token.cancelled() => Err(Interrupted::Cancelled),
                () = tokio::time::sleep_until(deadline) => Err(Interrupted::DeadlineExceeded),
                output = fut => Ok(output),
            },
            None => tokio::select! {
                () = self.token.cancelled() => Err(Interrupted::Cancelled),
                output = fut => Ok(output),
            },
        }
    }
}
