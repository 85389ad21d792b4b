//! Session start limiter
//!
//! One budget per process: every Identify consumes a unit, the budget refills
//! when its window elapses, and at most `max_concurrency` handshakes run at
//! once. Shared by every session machine through an `Arc`.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use conduit_common::resilience::{Clock, SystemClock};
use conduit_domain::{ConduitError, Result, SessionStartLimit};
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, instrument};

use super::ports::StartLimitSource;
use crate::context::{duration_ms, interrupted, CallContext};

/// Window used when none has been observed
const DEFAULT_WINDOW: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug)]
struct Budget {
    total: u32,
    remaining: u32,
    reset_at: Instant,
    /// Length the budget re-arms for after a local refill
    window: Duration,
    max_concurrency: u32,
}

impl Budget {
    fn install(&mut self, limit: &SessionStartLimit, now: Instant) {
        self.total = limit.total;
        self.remaining = limit.remaining;
        self.reset_at = now + limit.reset_after;
        if !limit.reset_after.is_zero() {
            self.window = limit.reset_after;
        }
    }

    fn wait(&mut self, now: Instant) -> Duration {
        if now >= self.reset_at {
            self.remaining = self.total;
            self.reset_at = now + self.window;
        }
        if self.remaining > 0 {
            Duration::ZERO
        } else {
            self.reset_at - now
        }
    }
}

/// Held for the duration of one Identify handshake
#[derive(Debug)]
pub struct StartPermit {
    slot: Option<OwnedSemaphorePermit>,
    retired: Arc<AtomicUsize>,
}

impl Drop for StartPermit {
    fn drop(&mut self) {
        let Some(slot) = self.slot.take() else { return };
        // Slots still owed to a lowered max_concurrency are retired on return
        if self.retired.fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1)).is_ok()
        {
            slot.forget();
        }
    }
}

/// Process-wide gate in front of new gateway sessions
pub struct SessionStartLimiter<C: Clock = SystemClock> {
    clock: C,
    budget: Mutex<Budget>,
    slots: Arc<Semaphore>,
    /// Slots to retire as soon as their holders release them
    retired: Arc<AtomicUsize>,
}

impl SessionStartLimiter<SystemClock> {
    /// Limiter on the system clock starting from `limit`
    pub fn new(limit: SessionStartLimit) -> Self {
        Self::with_clock(SystemClock, limit)
    }
}

impl Default for SessionStartLimiter<SystemClock> {
    /// The service's standard allowance until discovery refreshes it
    fn default() -> Self {
        Self::new(SessionStartLimit {
            total: 1000,
            remaining: 1000,
            reset_after: DEFAULT_WINDOW,
            max_concurrency: 1,
        })
    }
}

impl<C: Clock> SessionStartLimiter<C> {
    /// Limiter reading time from `clock`
    pub fn with_clock(clock: C, limit: SessionStartLimit) -> Self {
        let max_concurrency = limit.max_concurrency.max(1);
        let now = clock.now();
        let mut budget = Budget {
            total: 0,
            remaining: 0,
            reset_at: now,
            window: DEFAULT_WINDOW,
            max_concurrency,
        };
        budget.install(&limit, now);
        Self {
            clock,
            budget: Mutex::new(budget),
            slots: Arc::new(Semaphore::new(max_concurrency as usize)),
            retired: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Wait until at least one unit is available without consuming it
    ///
    /// # Errors
    /// - `BudgetExhausted` when the reset would land after the context's
    ///   deadline
    /// - `Cancelled` when the context fires while waiting
    pub async fn wait_available(&self, ctx: &CallContext) -> Result<()> {
        loop {
            let wait = self.budget.lock().await.wait(self.clock.now());
            if wait.is_zero() {
                return Ok(());
            }
            self.sleep_for_reset(wait, ctx).await?;
        }
    }

    /// Take a handshake slot and consume one unit
    ///
    /// The returned permit holds the slot until dropped.
    ///
    /// # Errors
    /// As [`SessionStartLimiter::wait_available`].
    #[instrument(skip_all)]
    pub async fn acquire(&self, ctx: &CallContext) -> Result<StartPermit> {
        let slot = ctx
            .run(Arc::clone(&self.slots).acquire_owned())
            .await
            .map_err(interrupted)?
            .map_err(|_| ConduitError::Internal("session start slots closed".to_string()))?;

        loop {
            let wait = {
                let mut budget = self.budget.lock().await;
                let wait = budget.wait(self.clock.now());
                if wait.is_zero() {
                    debug_assert!(budget.remaining > 0, "consuming from an empty budget");
                    budget.remaining = budget.remaining.checked_sub(1).ok_or_else(|| {
                        ConduitError::Internal("session start budget consumed past zero".into())
                    })?;
                    debug!(remaining = budget.remaining, "Session start consumed");
                    return Ok(StartPermit {
                        slot: Some(slot),
                        retired: Arc::clone(&self.retired),
                    });
                }
                wait
            };
            self.sleep_for_reset(wait, ctx).await?;
        }
    }

    async fn sleep_for_reset(&self, wait: Duration, ctx: &CallContext) -> Result<()> {
        if ctx.would_exceed(wait) {
            return Err(ConduitError::BudgetExhausted { reset_after: wait });
        }
        info!(wait_ms = duration_ms(wait), "Session start budget exhausted, waiting for reset");
        ctx.sleep(wait).await.map_err(interrupted)
    }

    /// Install values reported by discovery
    ///
    /// A lower `max_concurrency` retires free slots now and held slots as
    /// their permits drop.
    pub async fn refresh(&self, limit: SessionStartLimit) {
        let max_concurrency = limit.max_concurrency.max(1);
        let mut budget = self.budget.lock().await;
        budget.install(&limit, self.clock.now());

        if max_concurrency > budget.max_concurrency {
            let grow = (max_concurrency - budget.max_concurrency) as usize;
            let cancelled = self.cancel_retirements(grow);
            self.slots.add_permits(grow - cancelled);
        } else if max_concurrency < budget.max_concurrency {
            let shrink = (budget.max_concurrency - max_concurrency) as usize;
            let forgotten = self.slots.forget_permits(shrink);
            self.retired.fetch_add(shrink - forgotten, Ordering::AcqRel);
        }
        budget.max_concurrency = max_concurrency;
        debug!(
            total = limit.total,
            remaining = limit.remaining,
            max_concurrency,
            "Session start budget refreshed"
        );
    }

    /// Withdraw up to `n` pending retirements, returning how many were withdrawn
    fn cancel_retirements(&self, n: usize) -> usize {
        match self.retired.fetch_update(Ordering::AcqRel, Ordering::Acquire, |pending| {
            Some(pending - pending.min(n))
        }) {
            Ok(previous) | Err(previous) => previous.min(n),
        }
    }

    /// Fetch the budget from `source` and install it
    ///
    /// # Errors
    /// Whatever the source returns.
    pub async fn discover(
        &self,
        source: &dyn StartLimitSource,
        ctx: &CallContext,
    ) -> Result<SessionStartLimit> {
        let limit = source.session_start_limit(ctx).await?;
        self.refresh(limit).await;
        Ok(limit)
    }

    /// Current budget as the service would report it
    pub async fn snapshot(&self) -> SessionStartLimit {
        let now = self.clock.now();
        let budget = self.budget.lock().await;
        let elapsed = now >= budget.reset_at;
        SessionStartLimit {
            total: budget.total,
            remaining: if elapsed { budget.total } else { budget.remaining },
            reset_after: budget.reset_at.saturating_duration_since(now),
            max_concurrency: budget.max_concurrency,
        }
    }
}
