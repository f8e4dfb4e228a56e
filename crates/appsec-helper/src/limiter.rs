//! Per-second cap on forced trace retention.

use std::sync::Arc;

use crate::clock::Clock;

/// Allows at most `max_per_second` grants per wall-clock second.
///
/// Owned by one session; not shared.
pub struct RateLimiter {
    max_per_second: u32,
    counter: u32,
    second: u64,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    /// A limit of zero grants every call.
    #[must_use]
    pub fn new(max_per_second: u32, clock: Arc<dyn Clock>) -> Self {
        Self {
            max_per_second,
            counter: 0,
            second: clock.now_secs(),
            clock,
        }
    }

    #[must_use]
    pub const fn max_per_second(&self) -> u32 {
        self.max_per_second
    }

    pub fn allow(&mut self) -> bool {
        if self.max_per_second == 0 {
            return true;
        }

        let now = self.clock.now_secs();
        if now != self.second {
            self.second = now;
            self.counter = 0;
        }

        if self.counter < self.max_per_second {
            self.counter = self.counter.saturating_add(1);
            true
        } else {
            false
        }
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("max_per_second", &self.max_per_second)
            .field("counter", &self.counter)
            .field("second", &self.second)
            .finish()
    }
}
