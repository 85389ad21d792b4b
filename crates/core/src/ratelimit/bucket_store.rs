//! Per-route rate-limit state
//!
//! Routes map lazily onto service-reported bucket ids; buckets are keyed by
//! (bucket id, major parameter) so that one template shared across channels
//! is throttled per channel. Each bucket sits behind its own async mutex in a
//! sharded map, so read-then-decide admission on one bucket is serialized
//! while different buckets proceed in parallel.
//!
//! A process-wide global bucket sits in front of every route: it enforces
//! the fixed per-second ceiling and is armed by global 429 responses.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use conduit_common::resilience::{Clock, SystemClock};
use conduit_domain::{BucketSnapshot, ConduitError, RateLimitHeaders, Result, RouteKey};
use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, trace, warn};

use crate::context::duration_ms;

/// Updates whose reset instants differ by less than this describe the same
/// window; the difference is receive-time jitter, not a new window.
const SAME_WINDOW_TOLERANCE: Duration = Duration::from_millis(250);

/// Shortest window a bucket is re-armed for after a local refill
const MIN_WINDOW: Duration = Duration::from_millis(1);

/// Identity of a tracked bucket
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct BucketKey {
    id: Arc<str>,
    major: Option<Arc<str>>,
}

/// Locally tracked state of one bucket
#[derive(Debug)]
struct Bucket {
    id: Arc<str>,
    limit: u32,
    remaining: u32,
    reset_at: Instant,
    window: Duration,
}

impl Bucket {
    /// Refill if the window has elapsed, then report the wait before one
    /// unit is available
    fn poll(&mut self, now: Instant) -> Duration {
        if now >= self.reset_at {
            self.remaining = self.limit;
            self.reset_at = now + self.window;
        }
        if self.remaining > 0 {
            Duration::ZERO
        } else {
            self.reset_at - now
        }
    }

    fn take(&mut self) -> Result<()> {
        debug_assert!(self.remaining > 0, "reservation on an empty bucket");
        self.remaining = self.remaining.checked_sub(1).ok_or_else(|| {
            ConduitError::Internal(format!("bucket {} reserved past zero", self.id))
        })?;
        Ok(())
    }

    fn observe(&mut self, limit: u32, remaining: u32, reset_at: Instant, reset_after: Duration) {
        if reset_at + SAME_WINDOW_TOLERANCE < self.reset_at {
            trace!(bucket = %self.id, "Ignoring rate-limit update for an older window");
            return;
        }

        if reset_at <= self.reset_at + SAME_WINDOW_TOLERANCE {
            // Same window: local reservations may be ahead of the service
            self.remaining = self.remaining.min(remaining);
            self.reset_at = self.reset_at.max(reset_at);
        } else {
            self.remaining = remaining;
            self.reset_at = reset_at;
        }
        self.limit = limit;
        self.window = self.window.max(reset_after).max(MIN_WINDOW);
    }

    fn snapshot(&self, now: Instant, is_global: bool) -> BucketSnapshot {
        BucketSnapshot {
            bucket_id: self.id.to_string(),
            limit: self.limit,
            remaining: if now >= self.reset_at { self.limit } else { self.remaining },
            reset_after: self.reset_at.saturating_duration_since(now),
            is_global,
        }
    }
}

/// The shared bucket every call must also satisfy
#[derive(Debug)]
struct GlobalBucket {
    per_second: Option<u32>,
    remaining: u32,
    reset_at: Instant,
    blocked_until: Option<Instant>,
}

impl GlobalBucket {
    fn poll(&mut self, now: Instant) -> Duration {
        if let Some(until) = self.blocked_until {
            if now < until {
                return until - now;
            }
            self.blocked_until = None;
        }
        let Some(limit) = self.per_second else {
            return Duration::ZERO;
        };
        if now >= self.reset_at {
            self.remaining = limit;
            self.reset_at = now + Duration::from_secs(1);
        }
        if self.remaining > 0 {
            Duration::ZERO
        } else {
            self.reset_at - now
        }
    }

    fn take(&mut self) -> Result<()> {
        if self.per_second.is_none() {
            return Ok(());
        }
        debug_assert!(self.remaining > 0, "reservation on an empty global bucket");
        self.remaining = self.remaining.checked_sub(1).ok_or_else(|| {
            ConduitError::Internal("global bucket reserved past zero".to_string())
        })?;
        Ok(())
    }

    fn block_until(&mut self, until: Instant) {
        if self.blocked_until.map_or(true, |current| until > current) {
            self.blocked_until = Some(until);
        }
    }
}

/// Rate-limit state for every observed route
pub struct BucketStore<C: Clock = SystemClock> {
    clock: Arc<C>,
    routes: DashMap<RouteKey, Arc<str>>,
    buckets: DashMap<BucketKey, Arc<Mutex<Bucket>>>,
    global: Mutex<GlobalBucket>,
}

impl BucketStore<SystemClock> {
    /// Store with the default global ceiling of 50 requests per second
    pub fn new() -> Self {
        Self::with_clock(
            SystemClock,
            Some(conduit_domain::constants::DEFAULT_GLOBAL_REQUESTS_PER_SECOND),
        )
    }
}

impl Default for BucketStore<SystemClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Clock> BucketStore<C> {
    /// Store with a custom clock and global ceiling (`None` disables it)
    pub fn with_clock(clock: C, global_per_second: Option<u32>) -> Self {
        let now = clock.now();
        Self {
            clock: Arc::new(clock),
            routes: DashMap::new(),
            buckets: DashMap::new(),
            global: Mutex::new(GlobalBucket {
                per_second: global_per_second,
                remaining: global_per_second.unwrap_or(0),
                reset_at: now,
                blocked_until: None,
            }),
        }
    }

    fn bucket_for(&self, route: &RouteKey) -> Option<Arc<Mutex<Bucket>>> {
        let id = self.routes.get(route)?.value().clone();
        let key = BucketKey { id, major: route.major().map(Arc::from) };
        self.buckets.get(&key).map(|entry| Arc::clone(entry.value()))
    }

    /// Wait before `route`'s own bucket admits a call; reserves one unit when
    /// the wait is zero. Unknown routes are unthrottled.
    ///
    /// # Errors
    /// Returns `ConduitError::Internal` if a reservation would drive the
    /// bucket below zero.
    pub async fn admit(&self, route: &RouteKey) -> Result<Duration> {
        let Some(bucket) = self.bucket_for(route) else {
            return Ok(Duration::ZERO);
        };
        let mut bucket = bucket.lock().await;
        let wait = bucket.poll(self.clock.now());
        if wait.is_zero() {
            bucket.take()?;
        }
        Ok(wait)
    }

    /// Wait before the global bucket admits a call; reserves on zero
    ///
    /// # Errors
    /// Returns `ConduitError::Internal` on a reservation past zero.
    pub async fn admit_global(&self) -> Result<Duration> {
        let mut global = self.global.lock().await;
        let wait = global.poll(self.clock.now());
        if wait.is_zero() {
            global.take()?;
        }
        Ok(wait)
    }

    /// Wait before both the route bucket and the global bucket admit a call
    ///
    /// Units are reserved from both only when both are available, so a call
    /// that has to wait holds no reservation while it sleeps.
    ///
    /// # Errors
    /// Returns `ConduitError::Internal` on a reservation past zero.
    pub async fn reserve(&self, route: &RouteKey) -> Result<Duration> {
        let now = self.clock.now();
        let Some(bucket) = self.bucket_for(route) else {
            return self.admit_global().await;
        };

        let mut bucket = bucket.lock().await;
        let mut global = self.global.lock().await;
        let wait = bucket.poll(now).max(global.poll(now));
        if wait.is_zero() {
            bucket.take()?;
            global.take()?;
        }
        Ok(wait)
    }

    /// Record rate-limit metadata observed on a response for `route`
    ///
    /// Metadata flagged global arms the global bucket instead.
    pub async fn update(&self, route: &RouteKey, headers: &RateLimitHeaders) {
        let now = self.clock.now();
        let wall_now = DateTime::<Utc>::from(self.clock.system_time());

        if headers.global {
            if let Some(reset_after) = headers.reset_after_from(wall_now) {
                self.arm_global(reset_after).await;
            }
            return;
        }

        let (Some(id), Some(limit), Some(remaining), Some(reset_after)) = (
            headers.bucket.as_deref(),
            headers.limit,
            headers.remaining,
            headers.reset_after_from(wall_now),
        ) else {
            trace!(%route, "Response carried no bucket metadata");
            return;
        };

        let id: Arc<str> = Arc::from(id);
        if let Some(previous) = self.routes.insert(route.clone(), Arc::clone(&id)) {
            if previous != id {
                debug!(%route, from = %previous, to = %id, "Route moved to a different bucket");
            }
        }

        let reset_at = now + reset_after;
        let key = BucketKey { id: Arc::clone(&id), major: route.major().map(Arc::from) };
        let bucket = Arc::clone(
            self.buckets
                .entry(key)
                .or_insert_with(|| {
                    Arc::new(Mutex::new(Bucket {
                        id: Arc::clone(&id),
                        limit,
                        remaining,
                        reset_at,
                        window: reset_after.max(MIN_WINDOW),
                    }))
                })
                .value(),
        );

        let mut bucket = bucket.lock().await;
        bucket.observe(limit, remaining, reset_at, reset_after);
        trace!(
            bucket = %id,
            remaining = bucket.remaining,
            limit = bucket.limit,
            "Bucket updated"
        );
    }

    /// Block every route until `retry_after` has elapsed
    pub async fn arm_global(&self, retry_after: Duration) {
        warn!(retry_after_ms = duration_ms(retry_after), "Global rate limit hit");
        let until = self.clock.now() + retry_after;
        self.global.lock().await.block_until(until);
    }

    /// Current state of the bucket backing `route`, if one has been observed
    pub async fn snapshot(&self, route: &RouteKey) -> Option<BucketSnapshot> {
        let bucket = self.bucket_for(route)?;
        let bucket = bucket.lock().await;
        Some(bucket.snapshot(self.clock.now(), false))
    }

    /// Current state of the global bucket
    pub async fn global_snapshot(&self) -> BucketSnapshot {
        let now = self.clock.now();
        let global = self.global.lock().await;
        let limit = global.per_second.unwrap_or(0);
        let blocked = global.blocked_until.filter(|until| *until > now);
        BucketSnapshot {
            bucket_id: "global".to_string(),
            limit,
            remaining: if blocked.is_some() {
                0
            } else if now >= global.reset_at {
                limit
            } else {
                global.remaining
            },
            reset_after: blocked
                .unwrap_or(global.reset_at)
                .saturating_duration_since(now),
            is_global: true,
        }
    }

    /// Number of distinct buckets observed so far
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }
}

#[cfg(test)]
mod tests {
    use conduit_common::resilience::MockClock;

    use super::*;

    fn headers(bucket: &str, limit: u32, remaining: u32, reset_after_ms: u64) -> RateLimitHeaders {
        RateLimitHeaders {
            limit: Some(limit),
            remaining: Some(remaining),
            reset_after: Some(Duration::from_millis(reset_after_ms)),
            bucket: Some(bucket.to_string()),
            ..RateLimitHeaders::default()
        }
    }

    fn store(clock: &MockClock) -> BucketStore<MockClock> {
        BucketStore::with_clock(clock.clone(), None)
    }

    fn route() -> RouteKey {
        RouteKey::with_major("POST /channels/{channel_id}/messages", "100")
    }

    #[tokio::test]
    async fn unknown_routes_are_unthrottled() {
        let clock = MockClock::new();
        let store = store(&clock);

        for _ in 0..100 {
            assert_eq!(store.admit(&route()).await.expect("admit"), Duration::ZERO);
        }
        assert!(store.snapshot(&route()).await.is_none());
    }

    #[tokio::test]
    async fn admission_reserves_until_empty_then_waits_for_reset() {
        let clock = MockClock::new();
        let store = store(&clock);
        store.update(&route(), &headers("abc", 5, 2, 2_000)).await;

        assert_eq!(store.admit(&route()).await.expect("admit"), Duration::ZERO);
        assert_eq!(store.admit(&route()).await.expect("admit"), Duration::ZERO);
        assert_eq!(store.admit(&route()).await.expect("admit"), Duration::from_secs(2));

        clock.advance_millis(500);
        assert_eq!(store.admit(&route()).await.expect("admit"), Duration::from_millis(1_500));
    }

    #[tokio::test]
    async fn elapsed_window_refills_to_limit() {
        let clock = MockClock::new();
        let store = store(&clock);
        store.update(&route(), &headers("abc", 3, 0, 1_000)).await;

        clock.advance_millis(1_000);
        for _ in 0..3 {
            assert_eq!(store.admit(&route()).await.expect("admit"), Duration::ZERO);
        }
        assert_eq!(store.admit(&route()).await.expect("admit"), Duration::from_secs(1));
    }

    #[tokio::test]
    async fn same_window_update_keeps_smaller_remaining() {
        let clock = MockClock::new();
        let store = store(&clock);
        store.update(&route(), &headers("abc", 5, 4, 2_000)).await;
        store.admit(&route()).await.expect("admit");
        store.admit(&route()).await.expect("admit");

        // A late response from the first request reports the old count
        store.update(&route(), &headers("abc", 5, 4, 1_990)).await;

        let snapshot = store.snapshot(&route()).await.expect("tracked");
        assert_eq!(snapshot.remaining, 2);
    }

    #[tokio::test]
    async fn older_window_update_is_ignored() {
        let clock = MockClock::new();
        let store = store(&clock);
        store.update(&route(), &headers("abc", 5, 0, 5_000)).await;

        store.update(&route(), &headers("abc", 5, 5, 1_000)).await;

        let snapshot = store.snapshot(&route()).await.expect("tracked");
        assert_eq!(snapshot.remaining, 0);
        assert_eq!(snapshot.reset_after, Duration::from_secs(5));
    }

    #[tokio::test]
    async fn newer_window_replaces_state() {
        let clock = MockClock::new();
        let store = store(&clock);
        store.update(&route(), &headers("abc", 5, 0, 1_000)).await;

        clock.advance_millis(1_200);
        store.update(&route(), &headers("abc", 5, 4, 1_000)).await;

        let snapshot = store.snapshot(&route()).await.expect("tracked");
        assert_eq!(snapshot.remaining, 4);
    }

    #[tokio::test]
    async fn majors_are_tracked_independently() {
        let clock = MockClock::new();
        let store = store(&clock);
        let a = RouteKey::with_major("POST /channels/{channel_id}/messages", "1");
        let b = RouteKey::with_major("POST /channels/{channel_id}/messages", "2");
        store.update(&a, &headers("shared", 1, 0, 3_000)).await;
        store.update(&b, &headers("shared", 1, 1, 3_000)).await;

        assert_eq!(store.admit(&a).await.expect("admit"), Duration::from_secs(3));
        assert_eq!(store.admit(&b).await.expect("admit"), Duration::ZERO);
        assert_eq!(store.bucket_count(), 2);
    }

    #[tokio::test]
    async fn global_ceiling_applies_to_unknown_routes() {
        let clock = MockClock::new();
        let store = BucketStore::with_clock(clock.clone(), Some(2));

        assert_eq!(store.reserve(&route()).await.expect("reserve"), Duration::ZERO);
        assert_eq!(store.reserve(&route()).await.expect("reserve"), Duration::ZERO);
        assert_eq!(store.reserve(&route()).await.expect("reserve"), Duration::from_secs(1));

        clock.advance_millis(1_000);
        assert_eq!(store.reserve(&route()).await.expect("reserve"), Duration::ZERO);
    }

    #[tokio::test]
    async fn global_flag_arms_global_bucket() {
        let clock = MockClock::new();
        let store = store(&clock);
        let global = RateLimitHeaders {
            global: true,
            reset_after: Some(Duration::from_secs(4)),
            ..RateLimitHeaders::default()
        };

        store.update(&route(), &global).await;

        assert_eq!(store.reserve(&route()).await.expect("reserve"), Duration::from_secs(4));
        assert_eq!(store.global_snapshot().await.remaining, 0);
        clock.advance_millis(4_000);
        assert_eq!(store.reserve(&route()).await.expect("reserve"), Duration::ZERO);
    }

    #[tokio::test]
    async fn waiting_call_holds_no_route_reservation() {
        let clock = MockClock::new();
        let store = BucketStore::with_clock(clock.clone(), None);
        store.update(&route(), &headers("abc", 2, 2, 10_000)).await;
        store.arm_global(Duration::from_secs(1)).await;

        assert_eq!(store.reserve(&route()).await.expect("reserve"), Duration::from_secs(1));
        assert_eq!(store.snapshot(&route()).await.expect("tracked").remaining, 2);
    }

    #[tokio::test]
    async fn absolute_reset_header_is_measured_against_wall_clock() {
        let clock = MockClock::at_unix(Duration::from_secs(1_700_000_000));
        let store = store(&clock);
        let reset_at = DateTime::<Utc>::from_timestamp(1_700_000_003, 0).expect("timestamp");
        let headers = RateLimitHeaders {
            limit: Some(1),
            remaining: Some(0),
            reset_at: Some(reset_at),
            bucket: Some("abs".to_string()),
            ..RateLimitHeaders::default()
        };

        store.update(&route(), &headers).await;

        assert_eq!(store.admit(&route()).await.expect("admit"), Duration::from_secs(3));
    }
}
