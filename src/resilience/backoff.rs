//! Exponential backoff with jitter.

use std::time::Duration;

use rand::Rng;

/// Delay schedule for repeated connection attempts.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    base_ms: u64,
    max_ms: u64,
}

impl Backoff {
    pub fn new(base_ms: u64, max_ms: u64) -> Self {
        Self {
            base_ms,
            max_ms: max_ms.max(base_ms),
        }
    }

    /// Delay before attempt number `attempt` (1-based). The first attempt never waits.
    pub fn delay(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }

        let exponential_base = 2u64.saturating_pow(attempt - 2);
        let capped_delay = self.base_ms.saturating_mul(exponential_base).min(self.max_ms);

        // Apply jitter (0 to 10% of the delay)
        let jitter_range = capped_delay / 10;
        let jitter = if jitter_range > 0 {
            rand::thread_rng().gen_range(0..jitter_range)
        } else {
            0
        };

        Duration::from_millis(capped_delay + jitter)
    }
}
