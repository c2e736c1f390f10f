//! # Fibonacci Backoff
//!
//! Requeue delays for failed reconciles. The sequence grows more slowly than
//! exponential backoff, so a flapping vCenter is retried steadily without
//! being hammered.
//!
//! Sequence with the defaults (5s min, 300s max): 5s, 5s, 10s, 15s, 25s, 40s,
//! 65s, 105s, 170s, 275s, 300s.

use std::time::Duration;

/// Fibonacci backoff calculator
#[derive(Debug, Clone, Copy)]
pub struct FibonacciBackoff {
    min_secs: u64,
    max_secs: u64,
}

impl FibonacciBackoff {
    /// Create a backoff bounded by `min_secs` and `max_secs`
    #[must_use]
    pub fn new(min_secs: u64, max_secs: u64) -> Self {
        Self {
            min_secs: min_secs.max(1),
            max_secs: max_secs.max(min_secs.max(1)),
        }
    }

    /// Delay before the next retry, given the number of consecutive failures
    ///
    /// Counts 0 and 1 both yield `min_secs`, then each value is the sum
    /// of the previous two, capped at `max_secs`.
    #[must_use]
    pub fn delay_for_error_count(&self, error_count: u32) -> Duration {
        if error_count <= 1 {
            return Duration::from_secs(self.min_secs);
        }

        let mut prev = self.min_secs;
        let mut current = self.min_secs;

        for _ in 2..=error_count {
            let next = prev.saturating_add(current);
            prev = current;
            current = next.min(self.max_secs);

            if current >= self.max_secs {
                break;
            }
        }

        Duration::from_secs(current)
    }

    /// Longest delay this backoff ever yields
    #[must_use]
    pub fn max_delay(&self) -> Duration {
        Duration::from_secs(self.max_secs)
    }
}
