//! Per-credential request throttling
//!
//! All reconciles share one keyed token bucket, so concurrent reconciles that
//! authenticate with the same credential draw from the same provider quota.

use std::num::NonZeroU32;

use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter};
use tracing::trace;

/// Keyed token bucket limiting provider requests per credential
pub struct ProviderRateLimiter {
    limiter: DefaultKeyedRateLimiter<String>,
}

impl ProviderRateLimiter {
    /// Allow `per_second` sustained requests with bursts up to `burst`
    ///
    /// Zero values are clamped to one.
    pub fn new(per_second: u32, burst: u32) -> Self {
        let rate = NonZeroU32::new(per_second).unwrap_or(NonZeroU32::MIN);
        let burst = NonZeroU32::new(burst).unwrap_or(rate);
        Self {
            limiter: RateLimiter::keyed(Quota::per_second(rate).allow_burst(burst)),
        }
    }

    /// Wait until `key` may issue one more request
    pub async fn until_ready(&self, key: &str) {
        let key = key.to_string();
        if self.limiter.check_key(&key).is_ok() {
            return;
        }
        trace!(credential = %key, "provider rate limit reached, waiting");
        self.limiter.until_key_ready(&key).await;
    }
}

impl std::fmt::Debug for ProviderRateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRateLimiter").finish_non_exhaustive()
    }
}
