//! Brute-force guard (C1): per-source-IP auth failure tracking with
//! progressive blocking.

use std::collections::HashMap;
use std::net::IpAddr;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;

const FAILURE_WINDOW: Duration = Duration::minutes(10);
const FAILURE_THRESHOLD: usize = 10;
const BASE_BLOCK: Duration = Duration::minutes(5);
const MAX_BLOCK: Duration = Duration::hours(24);

struct Record {
    failures: Vec<DateTime<Utc>>,
    blocked: bool,
    blocked_at: Option<DateTime<Utc>>,
    /// Duration of the block currently in effect (what `is_blocked` reads).
    block_duration: Duration,
    /// Duration the *next* block will last, doubled only after the current
    /// one starts so the first offence still blocks for `BASE_BLOCK`.
    next_block: Duration,
}

impl Default for Record {
    fn default() -> Self {
        Self { failures: Vec::new(), blocked: false, blocked_at: None, block_duration: BASE_BLOCK, next_block: BASE_BLOCK }
    }
}

pub struct BruteForceGuard {
    records: Mutex<HashMap<String, Record>>,
}

impl BruteForceGuard {
    pub fn new() -> Self {
        Self { records: Mutex::new(HashMap::new()) }
    }

    /// "ip:port" and bare "ip" both normalize to the bare IP.
    fn normalize(source: &str) -> String {
        match source.rsplit_once(':') {
            Some((ip, port)) if port.chars().all(|c| c.is_ascii_digit()) && ip.parse::<IpAddr>().is_ok() => {
                ip.to_string()
            }
            _ => source.to_string(),
        }
    }

    pub fn is_blocked(&self, source: &str) -> bool {
        let key = Self::normalize(source);
        let mut records = self.records.lock();
        let Some(record) = records.get_mut(&key) else { return false };
        if !record.blocked {
            return false;
        }
        let blocked_at = record.blocked_at.unwrap_or_else(Utc::now);
        if Utc::now() - blocked_at <= record.next_block {
            true
        } else {
            record.blocked = false;
            record.blocked_at = None;
            false
        }
    }

    pub fn record_failure(&self, source: &str) {
        let key = Self::normalize(source);
        let now = Utc::now();
        let mut records = self.records.lock();
        let record = records.entry(key).or_default();
        record.failures.retain(|t| now - *t <= FAILURE_WINDOW);
        record.failures.push(now);
        if record.failures.len() >= FAILURE_THRESHOLD {
            record.blocked = true;
            record.blocked_at = Some(now);
            record.failures.clear();
            record.next_block = (record.next_block * 2).min(MAX_BLOCK);
        }
    }

    /// Clears the failure window; preserves the next-block duration so a
    /// subsequent offence keeps escalating rather than resetting to base.
    pub fn record_success(&self, source: &str) {
        let key = Self::normalize(source);
        let mut records = self.records.lock();
        if let Some(record) = records.get_mut(&key) {
            record.failures.clear();
        }
    }

    pub fn unblock_ip(&self, ip: &str) -> bool {
        let key = Self::normalize(ip);
        let mut records = self.records.lock();
        match records.get_mut(&key) {
            Some(record) if record.blocked => {
                record.blocked = false;
                record.blocked_at = None;
                true
            }
            _ => false,
        }
    }

    pub fn blocked_ips(&self) -> Vec<String> {
        self.records.lock().iter().filter(|(_, r)| r.blocked).map(|(k, _)| k.clone()).collect()
    }

    pub fn cleanup(&self) {
        let now = Utc::now();
        self.records.lock().retain(|_, r| {
            r.blocked || r.failures.iter().any(|t| now - *t <= FAILURE_WINDOW)
        });
    }
}

impl Default for BruteForceGuard {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn threshold_triggers_on_tenth_failure_not_ninth() {
        let guard = BruteForceGuard::new();
        for _ in 0..9 {
            guard.record_failure("10.0.0.5");
        }
        assert!(!guard.is_blocked("10.0.0.5"));
        guard.record_failure("10.0.0.5");
        assert!(guard.is_blocked("10.0.0.5"));
    }

    #[test]
    fn ip_and_ip_port_share_a_bucket() {
        let guard = BruteForceGuard::new();
        for _ in 0..10 {
            guard.record_failure("10.0.0.5:5060");
        }
        assert!(guard.is_blocked("10.0.0.5"));
    }

    #[test]
    fn first_block_lasts_base_duration_not_doubled() {
        let guard = BruteForceGuard::new();
        for _ in 0..10 {
            guard.record_failure("10.0.0.7");
        }
        let duration = guard.records.lock().get("10.0.0.7").unwrap().block_duration;
        assert_eq!(duration, BASE_BLOCK);
    }

    #[test]
    fn second_block_escalates_to_double_the_base() {
        let guard = BruteForceGuard::new();
        for _ in 0..10 {
            guard.record_failure("10.0.0.8");
        }
        guard.unblock_ip("10.0.0.8");
        guard.record_success("10.0.0.8");
        for _ in 0..10 {
            guard.record_failure("10.0.0.8");
        }
        let duration = guard.records.lock().get("10.0.0.8").unwrap().block_duration;
        assert_eq!(duration, BASE_BLOCK * 2);
    }

    #[test]
    fn success_clears_window_without_resetting_escalation() {
        let guard = BruteForceGuard::new();
        for _ in 0..10 {
            guard.record_failure("10.0.0.6");
        }
        assert!(guard.unblock_ip("10.0.0.6"));
        guard.record_success("10.0.0.6");
        for _ in 0..9 {
            guard.record_failure("10.0.0.6");
        }
        assert!(!guard.is_blocked("10.0.0.6"));
    }
}
