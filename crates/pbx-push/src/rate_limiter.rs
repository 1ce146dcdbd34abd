//! Rate Limiter (C14): per-key token bucket guarding the push-gateway
//! client. Structurally mirrors C1's per-source-IP record table — a
//! concurrent map of keys to small mutable records, swept by a janitor
//! rather than carrying per-bucket timers.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

#[derive(Debug, Clone, Copy)]
pub struct RateLimiterConfig {
    /// Tokens replenished per second.
    pub rate: f64,
    /// Maximum tokens a bucket can hold (and its starting balance).
    pub burst: f64,
    /// A bucket idle longer than this is evicted by `cleanup`.
    pub max_age: Duration,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self { rate: 1.0, burst: 5.0, max_age: Duration::from_secs(10 * 60) }
    }
}

struct Bucket {
    tokens: f64,
    last_refill: Instant,
    last_seen: Instant,
}

/// Per-key token bucket. Default key is the caller's license key, falling
/// back to `ip:<remote>` when no license key is available (§4.14).
pub struct RateLimiter {
    config: RateLimiterConfig,
    buckets: Mutex<HashMap<String, Bucket>>,
}

impl RateLimiter {
    pub fn new(config: RateLimiterConfig) -> Self {
        Self { config, buckets: Mutex::new(HashMap::new()) }
    }

    /// Creates the bucket on first use, refills it for elapsed time, and
    /// consumes one token if available.
    pub fn allow(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut buckets = self.buckets.lock();
        let bucket = buckets.entry(key.to_string()).or_insert_with(|| Bucket {
            tokens: self.config.burst,
            last_refill: now,
            last_seen: now,
        });

        let elapsed = now.saturating_duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.config.rate).min(self.config.burst);
        bucket.last_refill = now;
        bucket.last_seen = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Janitor sweep: removes buckets idle longer than `max_age`.
    pub fn cleanup(&self) {
        let now = Instant::now();
        let max_age = self.config.max_age;
        self.buckets.lock().retain(|_, b| now.saturating_duration_since(b.last_seen) <= max_age);
    }

    pub async fn start_janitor(self: std::sync::Arc<Self>, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            self.cleanup();
        }
    }
}

pub fn key_for(license_key: Option<&str>, remote: &str) -> String {
    match license_key {
        Some(k) if !k.is_empty() => k.to_string(),
        _ => format!("ip:{remote}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_up_to_burst_then_denies() {
        let limiter = RateLimiter::new(RateLimiterConfig { rate: 0.0, burst: 3.0, max_age: Duration::from_secs(60) });
        assert!(limiter.allow("k1"));
        assert!(limiter.allow("k1"));
        assert!(limiter.allow("k1"));
        assert!(!limiter.allow("k1"));
    }

    #[test]
    fn falls_back_to_ip_key_without_license() {
        assert_eq!(key_for(None, "10.0.0.1:5060"), "ip:10.0.0.1:5060");
        assert_eq!(key_for(Some("lic-1"), "10.0.0.1:5060"), "lic-1");
    }

    #[test]
    fn separate_keys_have_independent_buckets() {
        let limiter = RateLimiter::new(RateLimiterConfig { rate: 0.0, burst: 1.0, max_age: Duration::from_secs(60) });
        assert!(limiter.allow("a"));
        assert!(limiter.allow("b"));
        assert!(!limiter.allow("a"));
    }
}
