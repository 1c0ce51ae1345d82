//! Multi-scope token-bucket rate limiting.
//!
//! # Responsibilities
//! - Count calls against one or more `(limit, period)` scopes
//! - Refill each scope when its window elapses
//! - Provide a per-client-IP middleware on top of the shared cache
//!
//! # Design Decisions
//! - Counters are atomics; no lock is taken on the request path
//! - A call passes only if every scope admits it
//! - Only the scope that rejects a call gets its decrement back; earlier
//!   scopes keep theirs, which errs on the side of throttling
//! - Under contention a window may admit one call more or less than its limit

use std::net::IpAddr;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use thiserror::Error;

use crate::cache::{CacheEntry, CacheKey, SharedCache};
use crate::http::context::{handler, Handler};
use crate::observability::metrics;

/// Nanosecond clock used for window bookkeeping.
pub type NanoClock = Arc<dyn Fn() -> i64 + Send + Sync>;

pub fn system_nano_clock() -> NanoClock {
    Arc::new(|| chrono::Utc::now().timestamp_nanos_opt().unwrap_or(i64::MAX))
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RateError {
    #[error("rate pairs must be (count, period) pairs, got {0} values")]
    OddPairs(usize),
}

/// `limit` calls per `period`.
///
/// A zero period disables the scope; a limit of zero or less rejects
/// every call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Scope {
    pub limit: i64,
    pub period: Duration,
}

impl Scope {
    pub fn new(limit: i64, period: Duration) -> Self {
        Self { limit, period }
    }

    pub fn per_second(limit: i64, seconds: u64) -> Self {
        Self::new(limit, Duration::from_secs(seconds))
    }
}

/// Build scopes from flat `(count, periods)` pairs, each period counted in `unit`.
pub fn scopes(unit: Duration, pairs: &[i64]) -> Result<Vec<Scope>, RateError> {
    if pairs.len() % 2 != 0 {
        return Err(RateError::OddPairs(pairs.len()));
    }
    Ok(pairs
        .chunks_exact(2)
        .map(|pair| {
            let periods = u32::try_from(pair[1].max(0)).unwrap_or(u32::MAX);
            Scope::new(pair[0], unit * periods)
        })
        .collect())
}

/// Build scopes from `(count, seconds)` pairs.
pub fn sec_scopes(pairs: &[i64]) -> Result<Vec<Scope>, RateError> {
    scopes(Duration::from_secs(1), pairs)
}

/// A set of scopes with their live counters.
pub struct RateLimiter {
    scopes: Vec<Scope>,
    remaining: Vec<AtomicI64>,
    start_at: Vec<AtomicI64>,
    clock: NanoClock,
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("scopes", &self.scopes)
            .field("remaining", &self.remaining())
            .finish()
    }
}

impl RateLimiter {
    pub fn new(scopes: Vec<Scope>) -> Self {
        Self::with_clock(scopes, system_nano_clock())
    }

    pub fn with_clock(scopes: Vec<Scope>, clock: NanoClock) -> Self {
        let now = clock();
        let remaining = scopes.iter().map(|s| AtomicI64::new(s.limit.max(0))).collect();
        let start_at = scopes.iter().map(|_| AtomicI64::new(now)).collect();
        Self {
            scopes,
            remaining,
            start_at,
            clock,
        }
    }

    pub fn scopes(&self) -> &[Scope] {
        &self.scopes
    }

    /// True when the configured scopes equal `other`.
    pub fn same_scopes(&self, other: &[Scope]) -> bool {
        self.scopes == other
    }

    /// Calls left in each scope's current window.
    pub fn remaining(&self) -> Vec<i64> {
        self.remaining
            .iter()
            .map(|r| r.load(Ordering::Acquire))
            .collect()
    }

    /// Count one call. Returns `true` when the call must be rejected.
    pub fn reached(&self) -> bool {
        let now = (self.clock)();
        let mut limited = false;

        for (i, scope) in self.scopes.iter().enumerate() {
            if scope.limit <= 0 {
                limited = true;
                continue;
            }
            let period = i64::try_from(scope.period.as_nanos()).unwrap_or(i64::MAX);
            if period <= 0 {
                continue;
            }

            let remaining = &self.remaining[i];
            let start = self.start_at[i].load(Ordering::Acquire);
            if now - start > period
                && self.start_at[i]
                    .compare_exchange(start, now, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
            {
                let left = remaining.load(Ordering::Acquire).max(0);
                remaining.fetch_add(scope.limit - left, Ordering::AcqRel);
            }

            let prev = remaining.fetch_sub(1, Ordering::AcqRel);
            if prev < 1 {
                remaining.fetch_add(1, Ordering::AcqRel);
                limited = true;
            }
        }

        limited
    }
}

/// Reject clients whose IP exceeds `scopes`.
///
/// Limiters live in the shared cache keyed by client IP. Requests without a
/// known peer address are answered 400.
pub fn ip_rate_limit(cache: Arc<SharedCache>, scopes: Vec<Scope>) -> Handler {
    let scopes = Arc::new(scopes);
    handler(move |ctx| {
        let cache = cache.clone();
        let scopes = scopes.clone();
        Box::pin(async move {
            let ip = match ctx.client_ip() {
                Some(ip) => ip,
                None => {
                    ctx.reply_error(StatusCode::BAD_REQUEST, "unknown client address")
                        .await;
                    return;
                }
            };

            if ip_limiter(&cache, ip, &scopes).is_some_and(|limiter| limiter.reached()) {
                tracing::debug!(client = %ip, path = ctx.path(), "ip rate limit exceeded");
                metrics::record_rate_limited("ip");
                ctx.reply_error(StatusCode::TOO_MANY_REQUESTS, "too many requests")
                    .await;
                return;
            }
            ctx.next().await;
        })
    })
}

/// The limiter for `ip`, replaced when the cached one has other scopes.
pub(crate) fn ip_limiter(cache: &SharedCache, ip: IpAddr, scopes: &[Scope]) -> Option<Arc<RateLimiter>> {
    let key = CacheKey::ClientIp(ip);
    let entry = cache.get_or_create(key.clone(), || {
        Some(CacheEntry::Limiter(Arc::new(RateLimiter::new(scopes.to_vec()))))
    })?;

    match entry.as_limiter() {
        Some(limiter) if limiter.same_scopes(scopes) => Some(limiter.clone()),
        _ => {
            let limiter = Arc::new(RateLimiter::new(scopes.to_vec()));
            cache.set(key, CacheEntry::Limiter(limiter.clone()));
            Some(limiter)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicI64 as Counter;

    const SEC: i64 = 1_000_000_000;

    fn manual_clock() -> (Arc<Counter>, NanoClock) {
        let now = Arc::new(Counter::new(0));
        let reader = now.clone();
        (now, Arc::new(move || reader.load(Ordering::SeqCst)))
    }

    #[test]
    fn test_scope_helpers() {
        let s = sec_scopes(&[10, 1, 100, 60]).unwrap();
        assert_eq!(s, vec![Scope::per_second(10, 1), Scope::per_second(100, 60)]);
        assert_eq!(sec_scopes(&[1, 2, 3]), Err(RateError::OddPairs(3)));

        let minutes = scopes(Duration::from_secs(60), &[5, 2]).unwrap();
        assert_eq!(minutes[0].period, Duration::from_secs(120));
    }

    #[test]
    fn test_window_limit_and_refill() {
        let (now, clock) = manual_clock();
        let limiter = RateLimiter::with_clock(sec_scopes(&[3, 10]).unwrap(), clock);

        for _ in 0..3 {
            assert!(!limiter.reached());
        }
        assert!(limiter.reached());
        assert!(limiter.reached());
        assert_eq!(limiter.remaining(), vec![0]);

        // Exactly one period later the window is still open.
        now.store(10 * SEC, Ordering::SeqCst);
        assert!(limiter.reached());

        now.store(10 * SEC + 1, Ordering::SeqCst);
        assert!(!limiter.reached());
        assert_eq!(limiter.remaining(), vec![2]);
    }

    #[test]
    fn test_every_scope_must_admit() {
        let (now, clock) = manual_clock();
        let limiter = RateLimiter::with_clock(sec_scopes(&[2, 1, 3, 60]).unwrap(), clock);

        assert!(!limiter.reached());
        assert!(!limiter.reached());
        // The per-second scope rejects; the per-minute scope keeps the decrement.
        assert!(limiter.reached());
        assert_eq!(limiter.remaining(), vec![0, 0]);

        now.store(2 * SEC, Ordering::SeqCst);
        assert!(limiter.reached());
        assert_eq!(limiter.remaining(), vec![1, 0]);
    }

    #[test]
    fn test_zero_limit_and_zero_period() {
        let never = RateLimiter::new(vec![Scope::per_second(0, 10)]);
        assert!(never.reached());

        let always = RateLimiter::new(vec![Scope::new(1, Duration::ZERO)]);
        for _ in 0..100 {
            assert!(!always.reached());
        }
    }

    #[test]
    fn test_concurrent_calls_respect_limit() {
        let limiter = Arc::new(RateLimiter::new(sec_scopes(&[1000, 3600]).unwrap()));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let limiter = limiter.clone();
                std::thread::spawn(move || (0..250).filter(|_| !limiter.reached()).count())
            })
            .collect();
        let admitted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(admitted, 1000);
    }

    #[test]
    fn test_ip_limiter_is_cached_per_ip() {
        let cache = SharedCache::new(16);
        let ip: IpAddr = "10.0.0.1".parse().unwrap();
        let scopes = sec_scopes(&[1, 60]).unwrap();

        let first = ip_limiter(&cache, ip, &scopes).unwrap();
        let again = ip_limiter(&cache, ip, &scopes).unwrap();
        assert!(Arc::ptr_eq(&first, &again));

        let changed = ip_limiter(&cache, ip, &sec_scopes(&[5, 60]).unwrap()).unwrap();
        assert!(!Arc::ptr_eq(&first, &changed));
    }
}
