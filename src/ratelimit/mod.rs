//! Per-client token-bucket admission control.
//!
//! Classic token bucket keyed by client address, registry lock held only
//! long enough to look up or insert a bucket, refill-and-consume serialized
//! by the bucket's own lock. A hand-written bucket (rather than a
//! third-party limiter crate) keeps the refill formula and the per-key
//! independence guarantee directly auditable and directly testable.

use crate::error::IngestError;
use crate::types::{client_key_from_addr, ClientKey};
use axum::extract::{ConnectInfo, Request, State};
use axum::middleware::Next;
use axum::response::Response;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// One client's token bucket. `tokens` and timestamps live behind the
/// registry entry's own mutex — never the registry lock itself, so a
/// refill on one key never blocks a lookup for another.
struct RateBucket {
    tokens: f64,
    last_refill: Instant,
}

impl RateBucket {
    fn new(burst: f64) -> Self {
        Self {
            tokens: burst,
            last_refill: Instant::now(),
        }
    }

    /// Refill then decide: `tokens := min(burst, tokens + rate·(now - lastRefill))`.
    fn try_allow(&mut self, rate: f64, burst: f64, now: Instant) -> bool {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + rate * elapsed).min(burst);
        self.last_refill = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_refill)
    }
}

/// Registry of live buckets plus the fixed rate/burst parameters every
/// bucket in it shares. One `RateLimiter` per running server — parameters
/// come from startup configuration and do not hot-reload; they are not
/// among the fields `ConfigWatcher` replaces on a config reload.
pub struct RateLimiter {
    buckets: DashMap<String, Arc<Mutex<RateBucket>>>,
    rate: f64,
    burst: f64,
    idle_ttl: Duration,
    evicted_total: AtomicUsize,
}

impl RateLimiter {
    pub fn new(rate: f64, burst: u32) -> Self {
        let burst = burst.max(1) as f64;
        let idle_ttl = idle_ttl_for(rate);
        Self {
            buckets: DashMap::new(),
            rate,
            burst,
            idle_ttl,
            evicted_total: AtomicUsize::new(0),
        }
    }

    /// Admission decision for `key`. Creates a fresh full bucket lazily on
    /// first consultation.
    pub fn allow(&self, key: &str) -> bool {
        let bucket = self
            .buckets
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(RateBucket::new(self.burst))))
            .clone();

        let mut bucket = bucket.lock();
        bucket.try_allow(self.rate, self.burst, Instant::now())
    }

    pub fn active_buckets(&self) -> usize {
        self.buckets.len()
    }

    pub fn evicted_total(&self) -> usize {
        self.evicted_total.load(Ordering::Relaxed)
    }

    /// Periodic sweep removing buckets idle past `idleTTL` (spec §5
    /// "Memory discipline": "a limiter with no eviction is considered buggy
    /// for long-lived processes").
    fn sweep(&self) {
        let now = Instant::now();
        let mut evicted = 0usize;
        self.buckets.retain(|_, bucket| {
            let idle = bucket.lock().idle_for(now) < self.idle_ttl;
            if !idle {
                evicted += 1;
            }
            idle
        });
        if evicted > 0 {
            self.evicted_total.fetch_add(evicted, Ordering::Relaxed);
            tracing::debug!(evicted, remaining = self.buckets.len(), "rate limiter swept idle buckets");
        }
        crate::metrics::set_active_buckets(self.buckets.len());
    }

    /// Runs the sweep on a fixed interval until `cancel` fires. Mirrors the
    /// teacher's `HealthChecker::start` loop shape.
    pub async fn run_sweeper(self: Arc<Self>, cancel: CancellationToken) {
        let sweep_interval = (self.idle_ttl / 2).max(Duration::from_secs(30));
        let mut ticker = tokio::time::interval(sweep_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => self.sweep(),
                _ = cancel.cancelled() => {
                    tracing::info!("rate limiter sweeper stopped");
                    break;
                }
            }
        }
    }
}

/// Axum middleware gating every rate-limited route behind [`RateLimiter::allow`].
/// Spec §4.4: an unresolvable client address (e.g. an unspecified peer)
/// rejects with `400` before a bucket is ever consulted; a disallowed
/// admission rejects with `429`. Layered outermost-but-one, after the
/// per-request deadline and before the upload pipeline (spec §4.6).
pub async fn enforce(
    State(limiter): State<Arc<RateLimiter>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    mut req: Request,
    next: Next,
) -> Result<Response, IngestError> {
    let key = client_key_from_addr(addr).ok_or_else(|| {
        tracing::warn!(peer = %addr, "unable to determine client address, rejecting");
        IngestError::UnresolvableClient
    })?;
    if !limiter.allow(&key) {
        tracing::warn!(client_key = %key, path = %req.uri().path(), "rate limit exceeded, rejecting");
        crate::metrics::record_rate_limit_rejected(req.uri().path());
        return Err(IngestError::RateLimited);
    }
    req.extensions_mut().insert(ClientKey(key));
    Ok(next.run(req).await)
}

/// `idleTTL := max(10·(1/rate), 10 minutes)`, per spec §5. Guards against a
/// zero or negative rate producing an infinite or nonsensical TTL — such a
/// `Config` value is rejected at load time, but the formula stays total.
fn idle_ttl_for(rate: f64) -> Duration {
    let floor = Duration::from_secs(600);
    if rate <= 0.0 {
        return floor;
    }
    let derived = Duration::from_secs_f64(10.0 / rate);
    derived.max(floor)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_up_to_burst_then_rejects() {
        let limiter = RateLimiter::new(0.1, 2);
        assert!(limiter.allow("a"));
        assert!(limiter.allow("a"));
        assert!(!limiter.allow("a"));
    }

    #[test]
    fn distinct_keys_have_independent_buckets() {
        let limiter = RateLimiter::new(0.1, 1);
        assert!(limiter.allow("a"));
        assert!(!limiter.allow("a"));
        assert!(limiter.allow("b"));
    }

    #[test]
    fn idle_ttl_has_a_ten_minute_floor() {
        assert_eq!(idle_ttl_for(1.0), Duration::from_secs(600));
        assert_eq!(idle_ttl_for(0.001), Duration::from_secs(10_000));
    }

    #[test]
    fn sweep_evicts_only_idle_buckets() {
        let limiter = RateLimiter::new(1000.0, 1);
        limiter.allow("stale");
        {
            let bucket = limiter.buckets.get("stale").unwrap().clone();
            bucket.lock().last_refill = Instant::now() - Duration::from_secs(3_600);
        }
        limiter.allow("fresh");

        limiter.sweep();

        assert!(limiter.buckets.get("stale").is_none());
        assert!(limiter.buckets.get("fresh").is_some());
        assert_eq!(limiter.evicted_total(), 1);
    }
}

#[cfg(test)]
mod proptests {
    use super::RateBucket;
    use proptest::prelude::*;
    use std::time::{Duration, Instant};

    proptest! {
        /// Spec §8 invariant 4: over any T-second window, a bucket seeded
        /// full admits at most `burst + rate*T` requests (rounded up for the
        /// initial full burst) — i.e. it must reject at least once once that
        /// budget is exhausted by back-to-back consultations.
        #[test]
        fn exhausts_within_rate_times_window_plus_burst(
            rate in 0.1f64..50.0,
            burst in 1u32..20,
            attempts in 1usize..500,
        ) {
            let burst = burst as f64;
            let mut bucket = RateBucket::new(burst);
            let now = Instant::now();
            let mut admitted = 0u32;

            for _ in 0..attempts {
                if bucket.try_allow(rate, burst, now) {
                    admitted += 1;
                }
            }

            // At time T=0 relative to every consultation (no wall-clock
            // advance between calls), only the initial burst can ever be
            // admitted — every call after that observes zero elapsed time
            // and therefore zero refill.
            prop_assert!(admitted as f64 <= burst);
            if attempts as f64 > burst {
                prop_assert!(admitted < attempts as u32);
            }
        }

        /// Spec §8 invariant 5: two independently constructed buckets never
        /// share tokens — consuming one to exhaustion never affects the
        /// other's admission decision.
        #[test]
        fn independent_buckets_do_not_share_tokens(burst in 1u32..10) {
            let burst = burst as f64;
            let mut a = RateBucket::new(burst);
            let mut b = RateBucket::new(burst);
            let now = Instant::now();

            for _ in 0..(burst as usize) {
                prop_assert!(a.try_allow(1.0, burst, now));
            }
            prop_assert!(!a.try_allow(1.0, burst, now));

            // b is untouched by a's exhaustion.
            prop_assert!(b.try_allow(1.0, burst, now));
        }

        /// The refill formula is monotone: waiting longer never yields fewer
        /// tokens than waiting a shorter amount, up to the burst ceiling.
        #[test]
        fn refill_is_monotone_in_elapsed_time(
            rate in 0.01f64..10.0,
            burst in 1u32..20,
            short_ms in 0u64..1000,
            extra_ms in 0u64..5000,
        ) {
            let burst = burst as f64;
            let start = Instant::now();

            let t_short = start + Duration::from_millis(short_ms);
            let t_long = start + Duration::from_millis(short_ms + extra_ms);

            let mut probe_short = RateBucket { tokens: 0.0, last_refill: start };
            let tokens_short = probe_short.refill_only(rate, burst, t_short);
            let mut probe_long = RateBucket { tokens: 0.0, last_refill: start };
            let tokens_long = probe_long.refill_only(rate, burst, t_long);

            prop_assert!(tokens_long >= tokens_short - 1e-9);
        }
    }

    impl RateBucket {
        /// Test-only helper exposing the refill step without the consume
        /// decision, to assert monotonicity directly.
        fn refill_only(&mut self, rate: f64, burst: f64, now: Instant) -> f64 {
            let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
            self.tokens = (self.tokens + rate * elapsed).min(burst);
            self.last_refill = now;
            self.tokens
        }
    }
}
