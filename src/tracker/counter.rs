//! Incremental deltas over monotonic kernel counters.
//!
//! The kernel keeps cumulative counters (cpu ticks, page faults) that may wrap
//! around or be reset. A [`Counter`] turns successive raw readings into its own
//! running total that never goes backwards.
//!
//! A decrease between two readings is always read as exactly one wraparound of
//! a `u64` counter. A genuine reset to a small value cannot be told apart from
//! a wrap and yields one very large delta.

use log::warn;

/// Width of the kernel counters, for wraparound correction.
pub const MAX_COUNTER_VALUE: u64 = u64::MAX;

/// Running totals are wider than the raw counters so that a wrapped counter,
/// whose total has passed `MAX_COUNTER_VALUE`, can still grow.
pub type DerivedTotal = u128;

/// Delta between two raw readings of the same counter.
pub fn counter_delta(previous: u64, current: u64) -> u64 {
    if current >= previous {
        current - previous
    } else {
        current + (MAX_COUNTER_VALUE - previous)
    }
}

/// Running total derived from a raw counter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counter {
    /// Last raw reading, `None` until the first one arrives
    baseline: Option<u64>,
    total: DerivedTotal,
}

impl Counter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn total(&self) -> DerivedTotal {
        self.total
    }

    #[cfg(test)]
    pub fn baseline(&self) -> Option<u64> {
        self.baseline
    }

    /// Folds a new raw reading into the running total and returns the delta.
    ///
    /// The first reading seeds the total with the raw value itself. An
    /// unavailable reading changes nothing.
    pub fn observe(&mut self, raw: Option<u64>) -> u64 {
        let Some(raw) = raw else {
            return 0;
        };

        let delta = match self.baseline {
            None => raw,
            Some(previous) => counter_delta(previous, raw),
        };
        self.baseline = Some(raw);

        self.total = match self.total.checked_add(DerivedTotal::from(delta)) {
            Some(t) => t,
            None => {
                warn!(
                    "running counter total overflowed (total = {}, delta = {})",
                    self.total, delta
                );
                self.total.wrapping_add(DerivedTotal::from(delta))
            }
        };

        delta
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delta_increasing() {
        assert_eq!(counter_delta(100, 250), 150);
        assert_eq!(counter_delta(7, 7), 0);
    }

    #[test]
    fn test_delta_wraparound() {
        assert_eq!(counter_delta(MAX_COUNTER_VALUE - 5, 3), 8);
    }

    #[test]
    fn test_first_sample_seeds_total() {
        let mut c = Counter::new();
        assert_eq!(c.observe(Some(1000)), 1000);
        assert_eq!(c.total(), 1000);
        assert_eq!(c.baseline(), Some(1000));
    }

    #[test]
    fn test_first_sample_of_zero_is_a_baseline() {
        let mut c = Counter::new();
        c.observe(Some(0));
        assert_eq!(c.baseline(), Some(0));

        c.observe(Some(40));
        assert_eq!(c.total(), 40);
    }

    #[test]
    fn test_running_total_is_monotonic_across_wrap() {
        let mut c = Counter::new();
        let readings = [10, 500, MAX_COUNTER_VALUE - 1, 4, 90];
        let mut last = 0;
        for r in readings {
            c.observe(Some(r));
            assert!(c.total() >= last);
            last = c.total();
        }
    }

    #[test]
    fn test_reset_counts_as_one_large_delta() {
        // A kernel reset to a small value is indistinguishable from a wrap
        let mut c = Counter::new();
        c.observe(Some(1_000));
        let delta = c.observe(Some(10));
        assert_eq!(delta, 10 + (MAX_COUNTER_VALUE - 1_000));
    }

    #[test]
    fn test_unavailable_reading_keeps_state() {
        let mut c = Counter::new();
        c.observe(Some(300));
        assert_eq!(c.observe(None), 0);
        assert_eq!(c.total(), 300);
        assert_eq!(c.baseline(), Some(300));

        c.observe(Some(350));
        assert_eq!(c.total(), 350);
    }

    #[test]
    fn test_total_keeps_growing_past_counter_width() {
        let mut c = Counter::new();
        c.observe(Some(MAX_COUNTER_VALUE - 5));
        c.observe(Some(3));
        assert_eq!(
            c.total(),
            DerivedTotal::from(MAX_COUNTER_VALUE - 5) + 8
        );
    }
}
