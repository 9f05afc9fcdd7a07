//! # Fibonacci Backoff
//!
//! Per-resource retry delays for failed reconciles. Delays follow the
//! Fibonacci sequence scaled by the minimum and capped at the maximum.

use std::time::Duration;

/// Fibonacci backoff with a minimum and maximum delay in seconds
#[derive(Debug, Clone)]
pub struct FibonacciBackoff {
    min_secs: u64,
    max_secs: u64,
    previous: u64,
    current: u64,
}

impl FibonacciBackoff {
    pub fn new(min_secs: u64, max_secs: u64) -> Self {
        let min_secs = min_secs.max(1);
        Self {
            min_secs,
            max_secs: max_secs.max(min_secs),
            previous: 0,
            current: 1,
        }
    }

    /// Next delay in seconds; advances the sequence
    pub fn next_backoff_seconds(&mut self) -> u64 {
        let delay = self.current.saturating_mul(self.min_secs).min(self.max_secs);
        if delay < self.max_secs {
            let next = self.previous.saturating_add(self.current);
            self.previous = self.current;
            self.current = next;
        }
        delay
    }

    pub fn next_backoff(&mut self) -> Duration {
        Duration::from_secs(self.next_backoff_seconds())
    }

    /// Restart the sequence after a successful reconcile
    pub fn reset(&mut self) {
        self.previous = 0;
        self.current = 1;
    }

    /// Delay for the `error_count`-th consecutive error (0-indexed)
    pub fn calculate_for_error_count(error_count: u32, min_secs: u64, max_secs: u64) -> Duration {
        let mut backoff = Self::new(min_secs, max_secs);
        let mut delay = backoff.next_backoff();
        for _ in 0..error_count {
            delay = backoff.next_backoff();
        }
        delay
    }
}
