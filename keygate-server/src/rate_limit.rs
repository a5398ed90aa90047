//! Rate limiting for the signing endpoint.
//!
//! Bounds how fast a token can be brute-forced and how much signing work an
//! unauthenticated peer can trigger.

use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use std::num::NonZeroU32;
use std::sync::Arc;

/// Sustained and burst limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    pub per_second: u32,
    pub burst: u32,
}

impl Default for RateLimit {
    fn default() -> Self {
        Self {
            per_second: 20,
            burst: 50,
        }
    }
}

/// Returned by [`SigningRateLimiter::check`] when the quota is exhausted.
#[derive(Debug, thiserror::Error)]
#[error("rate limit exceeded")]
pub struct RateLimitExceeded;

/// Process-wide limiter shared by every connection.
#[derive(Clone)]
pub struct SigningRateLimiter {
    limiter: Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>,
}

impl SigningRateLimiter {
    /// Create a limiter. Zero values fall back to the defaults.
    pub fn new(limit: RateLimit) -> Self {
        let defaults = RateLimit::default();
        let per_second = NonZeroU32::new(limit.per_second)
            .or(NonZeroU32::new(defaults.per_second))
            .unwrap_or(NonZeroU32::MIN);
        let burst = NonZeroU32::new(limit.burst)
            .or(NonZeroU32::new(defaults.burst))
            .unwrap_or(NonZeroU32::MIN);

        let quota = Quota::per_second(per_second).allow_burst(burst);

        Self {
            limiter: Arc::new(RateLimiter::direct(quota)),
        }
    }

    /// Check if a request should be allowed.
    pub fn check(&self) -> Result<(), RateLimitExceeded> {
        self.limiter.check().map_err(|_| {
            tracing::warn!("Rate limit exceeded for signing endpoint");
            RateLimitExceeded
        })
    }
}

impl Default for SigningRateLimiter {
    fn default() -> Self {
        Self::new(RateLimit::default())
    }
}
