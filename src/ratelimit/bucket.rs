//! Token bucket implementation.

use std::time::Duration;

/// A single per-identity rate counter.
///
/// Tokens accumulate lazily at `capacity / window` per second, capped at
/// `capacity`; there is no background ticking. Refill is computed at check
/// time from the elapsed wall time, which smooths admissions across the
/// window rather than resetting the full budget at window boundaries.
#[derive(Debug, Clone)]
pub struct TokenBucket {
    /// Burst size, at least 1 for a usable bucket
    capacity: f64,
    /// Tokens granted per second
    refill_per_sec: f64,
    /// Current balance, always within `[0, capacity]`
    tokens: f64,
    /// Time of the last refill computation, since the Unix epoch
    last_refill: Duration,
}

impl TokenBucket {
    /// Create a bucket that starts full.
    ///
    /// A zero window or a capacity below one yields a bucket that always
    /// denies; admission is never granted by a degenerate configuration.
    pub fn new(capacity: u64, window: Duration, now: Duration) -> Self {
        let capacity = capacity as f64;
        let window_secs = window.as_secs_f64();

        let (capacity, refill_per_sec) = if capacity < 1.0 || window_secs <= 0.0 {
            (0.0, 0.0)
        } else {
            (capacity, capacity / window_secs)
        };

        Self {
            capacity,
            refill_per_sec,
            tokens: capacity,
            last_refill: now,
        }
    }

    /// Consume one token if the refilled balance allows it.
    ///
    /// Returns `true` and decrements on admission; returns `false` without
    /// consuming otherwise.
    pub fn allow(&mut self, now: Duration) -> bool {
        self.refill(now);

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Token balance projected at `now`, without mutating the bucket.
    pub fn tokens_at(&self, now: Duration) -> f64 {
        let elapsed = now.saturating_sub(self.last_refill);
        (self.tokens + elapsed.as_secs_f64() * self.refill_per_sec).min(self.capacity)
    }

    /// Burst size of this bucket.
    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    fn refill(&mut self, now: Duration) {
        let elapsed = now.saturating_sub(self.last_refill);
        self.tokens =
            (self.tokens + elapsed.as_secs_f64() * self.refill_per_sec).min(self.capacity);
        self.last_refill = now;
    }
}
