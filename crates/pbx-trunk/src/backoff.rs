//! Exponential backoff with jitter for trunk registration retry (§4.5, §9).
//! A deterministic struct holding attempt count/base/cap; jitter is applied
//! on read, never stored, so the same state can be inspected repeatedly.

use std::time::Duration;

use rand::Rng;

const BASE: Duration = Duration::from_secs(5);
const MAX: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone, Copy)]
pub struct BackoffState {
    attempt: u32,
}

impl BackoffState {
    pub fn new() -> Self {
        Self { attempt: 0 }
    }

    /// Delay before the next attempt, ±20% jitter applied fresh each call.
    pub fn next_delay(&mut self) -> Duration {
        let exp = BASE.as_secs_f64() * 2f64.powi(self.attempt as i32);
        let capped = exp.min(MAX.as_secs_f64());
        self.attempt += 1;

        let jitter = rand::thread_rng().gen_range(0.8..=1.2);
        Duration::from_secs_f64(capped * jitter)
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}

impl Default for BackoffState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_doubles_and_caps_at_five_minutes() {
        let mut backoff = BackoffState::new();
        for _ in 0..20 {
            let delay = backoff.next_delay();
            assert!(delay.as_secs_f64() <= MAX.as_secs_f64() * 1.2 + 0.001);
        }
    }

    #[test]
    fn reset_returns_to_base_delay_range() {
        let mut backoff = BackoffState::new();
        for _ in 0..5 {
            backoff.next_delay();
        }
        backoff.reset();
        let delay = backoff.next_delay();
        assert!(delay.as_secs_f64() >= BASE.as_secs_f64() * 0.8);
        assert!(delay.as_secs_f64() <= BASE.as_secs_f64() * 1.2);
    }
}
