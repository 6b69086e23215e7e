//! Token-bucket rate limiting (global + per-IP), guarding the `/v2/*`
//! surface. Process-wide state, created once at kernel startup rather than
//! lazily inside handlers (§9).

use std::{
    collections::HashMap,
    net::IpAddr,
    time::{Duration, Instant},
};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

/// Configuration for a [`RateLimiter`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Global requests-per-second refill rate.
    pub global_rps: f64,
    /// Per-IP requests-per-second refill rate.
    pub per_ip_rps: f64,
    /// Bucket capacity (burst size), shared by global and per-IP buckets.
    pub burst: f64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        RateLimitConfig {
            global_rps: 100.0,
            per_ip_rps: 10.0,
            burst: 20.0,
        }
    }
}

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

impl Bucket {
    fn new(burst: f64) -> Self {
        Bucket {
            tokens: burst,
            last_refill: Instant::now(),
        }
    }

    fn try_take(&mut self, rps: f64, burst: f64) -> bool {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * rps).min(burst);
        self.last_refill = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

/// A global bucket plus one bucket per client IP.
pub struct RateLimiter {
    config: RateLimitConfig,
    global: Mutex<Bucket>,
    per_ip: Mutex<HashMap<IpAddr, Bucket>>,
}

impl RateLimiter {
    /// Creates a limiter with the given configuration.
    pub fn new(config: RateLimitConfig) -> Self {
        RateLimiter {
            global: Mutex::new(Bucket::new(config.burst)),
            per_ip: Mutex::new(HashMap::new()),
            config,
        }
    }

    /// Attempts to take one token from both the global and the per-IP
    /// bucket for `addr`. Returns `true` iff both succeeded.
    pub async fn allow(&self, addr: IpAddr) -> bool {
        let global_ok = self
            .global
            .lock()
            .await
            .try_take(self.config.global_rps, self.config.burst);
        if !global_ok {
            return false;
        }

        let mut per_ip = self.per_ip.lock().await;
        let bucket = per_ip
            .entry(addr)
            .or_insert_with(|| Bucket::new(self.config.burst));
        bucket.try_take(self.config.per_ip_rps, self.config.burst)
    }
}

/// `Retry-After` header value used on every 429 response.
pub const RETRY_AFTER_SECS: u64 = 1;

/// Convenience for handlers: the duration corresponding to [`RETRY_AFTER_SECS`].
pub fn retry_after() -> Duration {
    Duration::from_secs(RETRY_AFTER_SECS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn burst_of_one_allows_first_and_rejects_second() {
        let limiter = RateLimiter::new(RateLimitConfig {
            global_rps: 1000.0,
            per_ip_rps: 1.0,
            burst: 1.0,
        });
        let addr: IpAddr = "127.0.0.1".parse().unwrap();
        assert!(limiter.allow(addr).await);
        assert!(!limiter.allow(addr).await);
    }

    #[tokio::test]
    async fn different_ips_have_independent_buckets() {
        let limiter = RateLimiter::new(RateLimitConfig {
            global_rps: 1000.0,
            per_ip_rps: 1.0,
            burst: 1.0,
        });
        let a: IpAddr = "127.0.0.1".parse().unwrap();
        let b: IpAddr = "127.0.0.2".parse().unwrap();
        assert!(limiter.allow(a).await);
        assert!(limiter.allow(b).await);
    }
}
