//! Per-key token-bucket rate limiting (spec §4.8 arr-instance rate limits,
//! §4.9 per-IP API limits, §5 "rate-limiter buckets ... periodic reaper
//! removes entries idle >10 minutes"). Grounded in the `governor`
//! GCRA-based `RateLimiter`, keyed the way
//! `meridian-gateway::middleware::rate_limit::RateLimitMiddleware` keys its
//! per-route limiters — a map from key to limiter behind a lock, since this
//! workspace does not pull in `dashmap`.

use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::{Duration, Instant};

use governor::clock::{Clock, DefaultClock};
use governor::{Quota, RateLimiter as GovernorRateLimiter};
use tokio::sync::RwLock;

type DirectLimiter = GovernorRateLimiter<
    governor::state::direct::NotKeyed,
    governor::state::InMemoryState,
    DefaultClock,
>;

/// Reaper threshold: buckets idle longer than this are dropped (spec §5).
pub const IDLE_REAP_THRESHOLD: Duration = Duration::from_secs(10 * 60);

struct Bucket {
    limiter: Arc<DirectLimiter>,
    last_used: Instant,
}

/// A rate limiter keyed by an arbitrary string (client IP, arr instance id,
/// …), each key getting its own independent token bucket with the
/// configured requests-per-second and burst.
pub struct KeyedRateLimiter {
    quota: Quota,
    buckets: RwLock<HashMap<String, Bucket>>,
    clock: DefaultClock,
}

impl KeyedRateLimiter {
    pub fn new(rps: u32, burst: u32) -> Self {
        let rps = NonZeroU32::new(rps.max(1)).unwrap();
        let burst = NonZeroU32::new(burst.max(1)).unwrap();
        Self {
            quota: Quota::per_second(rps).allow_burst(burst),
            buckets: RwLock::new(HashMap::new()),
            clock: DefaultClock::default(),
        }
    }

    /// Returns `Ok(())` if a token was available for `key`, or the number
    /// of seconds until the caller should retry (spec §4.9's
    /// `retry_after`).
    pub async fn check(&self, key: &str) -> Result<(), u64> {
        {
            let buckets = self.buckets.read().await;
            if let Some(bucket) = buckets.get(key) {
                return self.consume(&bucket.limiter);
            }
        }

        let mut buckets = self.buckets.write().await;
        let bucket = buckets.entry(key.to_string()).or_insert_with(|| Bucket {
            limiter: Arc::new(GovernorRateLimiter::direct(self.quota)),
            last_used: Instant::now(),
        });
        bucket.last_used = Instant::now();
        self.consume(&bucket.limiter)
    }

    /// Blocks the caller until a token is available, or returns once the
    /// deadline has passed (spec §4.8: "requests exceeding the bucket
    /// block until tokens are available or the caller's deadline
    /// expires").
    pub async fn acquire(&self, key: &str, deadline: Duration) {
        let limiter = {
            let mut buckets = self.buckets.write().await;
            let bucket = buckets.entry(key.to_string()).or_insert_with(|| Bucket {
                limiter: Arc::new(GovernorRateLimiter::direct(self.quota)),
                last_used: Instant::now(),
            });
            bucket.last_used = Instant::now();
            bucket.limiter.clone()
        };

        let _ = tokio::time::timeout(deadline, limiter.until_ready()).await;
    }

    fn consume(&self, limiter: &DirectLimiter) -> Result<(), u64> {
        match limiter.check() {
            Ok(()) => Ok(()),
            Err(not_until) => {
                let wait = not_until.wait_time_from(self.clock.now());
                Err(wait.as_secs().max(1))
            }
        }
    }

    /// Drops buckets idle longer than `IDLE_REAP_THRESHOLD` (spec §5). Run
    /// periodically from a background task owned by `AppState`.
    pub async fn reap_idle(&self) {
        let mut buckets = self.buckets.write().await;
        let now = Instant::now();
        buckets.retain(|_, bucket| now.duration_since(bucket.last_used) < IDLE_REAP_THRESHOLD);
    }

    pub async fn bucket_count(&self) -> usize {
        self.buckets.read().await.len()
    }
}
