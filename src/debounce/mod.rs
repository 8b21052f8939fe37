use std::time::{Duration, Instant};

/// Token-bucket debouncer gating a flush action.
///
/// Mutating paths call [`Debouncer::mark_dirty`]; the dispatcher polls
/// [`Debouncer::poll`] before every record. Tokens refill continuously at
/// one per `interval` up to `burst`. The timer is a polled deadline, not a
/// background task.
#[derive(Debug)]
pub struct Debouncer {
    interval: Duration,
    burst: f64,
    tokens: f64,
    last_refill: Instant,
    dirty: bool,
}

impl Debouncer {
    /// Creates a debouncer with a full token bucket.
    pub fn new(interval: Duration, burst: u32) -> Self {
        let burst = f64::from(burst.max(1));
        Self {
            interval,
            burst,
            tokens: burst,
            last_refill: Instant::now(),
            dirty: false,
        }
    }

    /// Marks pending work for the next permitted poll.
    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    /// Returns true when the flush action should run now, consuming one
    /// token. Returns false while clean or rate-limited.
    pub fn poll(&mut self) -> bool {
        self.refill();

        if self.dirty && self.tokens >= 1.0 {
            self.tokens -= 1.0;
            self.dirty = false;
            return true;
        }

        false
    }

    /// Unconditionally clears the pending flag, bypassing the rate limiter.
    /// Used during shutdown when the flush must not wait for a token.
    pub fn force(&mut self) {
        self.dirty = false;
    }

    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill);
        self.last_refill = now;

        if self.interval.is_zero() {
            self.tokens = self.burst;
            return;
        }

        let gained = elapsed.as_secs_f64() / self.interval.as_secs_f64();
        self.tokens = (self.tokens + gained).min(self.burst);
    }
}
