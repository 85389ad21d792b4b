//! Per-call cancellation context
//!
//! Every suspension point in the request path and in session establishment
//! takes a [`CallContext`]: a cancellation token plus an optional deadline.

use std::time::Duration;

use conduit_common::resilience::{CancelScope, Interrupted};
use conduit_domain::ConduitError;

/// Cancellation token plus optional deadline supplied by the caller
pub type CallContext = CancelScope;

/// Map an interrupted wait onto the error taxonomy
pub fn interrupted(reason: Interrupted) -> ConduitError {
    ConduitError::cancelled(reason.to_string())
}

/// Whole milliseconds, saturating, for structured log fields
pub(crate) fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
