//! API schema extraction sampling.
//!
//! Each endpoint key is sampled at most once per period. The period grows as
//! the configured sample rate shrinks.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::debug;

use crate::clock::Clock;

const BASE_PERIOD_SECS: u64 = 30;
const MAX_PERIOD_SECS: u64 = 3600;
const MAX_ENTRIES: usize = 4096;

/// Shared by every session of a service.
pub struct SchemaSampler {
    period_secs: u64,
    last_sampled: DashMap<u64, u64>,
    clock: Arc<dyn Clock>,
}

impl SchemaSampler {
    #[must_use]
    pub fn new(sample_rate: f64, clock: Arc<dyn Clock>) -> Self {
        Self {
            period_secs: period_secs(sample_rate),
            last_sampled: DashMap::new(),
            clock,
        }
    }

    #[must_use]
    pub const fn period_secs(&self) -> u64 {
        self.period_secs
    }

    /// Returns true when `key` has not been sampled within the period, and
    /// records the sample.
    pub fn hit(&self, key: u64) -> bool {
        let now = self.clock.now_secs();

        if self.last_sampled.len() >= MAX_ENTRIES && !self.last_sampled.contains_key(&key) {
            let period = self.period_secs;
            self.last_sampled
                .retain(|_, sampled| now.saturating_sub(*sampled) < period);
            if self.last_sampled.len() >= MAX_ENTRIES {
                debug!(key, "Schema sampler table full");
                return false;
            }
        }

        match self.last_sampled.entry(key) {
            Entry::Occupied(mut entry) => {
                if now.saturating_sub(*entry.get()) >= self.period_secs {
                    entry.insert(now);
                    true
                } else {
                    false
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(now);
                true
            }
        }
    }
}

impl std::fmt::Debug for SchemaSampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemaSampler")
            .field("period_secs", &self.period_secs)
            .field("entries", &self.last_sampled.len())
            .finish()
    }
}

fn period_secs(sample_rate: f64) -> u64 {
    if sample_rate >= 1.0 {
        return BASE_PERIOD_SECS;
    }
    if sample_rate.is_nan() || sample_rate <= 0.0 {
        return MAX_PERIOD_SECS;
    }
    let period = (BASE_PERIOD_SECS as f64 / sample_rate).ceil();
    if period >= MAX_PERIOD_SECS as f64 {
        MAX_PERIOD_SECS
    } else {
        period as u64
    }
}
