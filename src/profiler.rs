//! Cache Observability Hooks
//!
//! An optional per-entry handle reporting the three events a cache entry can
//! go through after creation: a read served from cache, a loss in the
//! concurrent install race, and invalidation by a changed dependency.
//!
//! The hook is deliberately minimal; it neither blocks nor fails, and a cache
//! site with no profiler attached pays only an `Option` check.

use std::sync::atomic::{AtomicU64, Ordering};

/// Receiver for cache entry lifecycle events.
///
/// Implementations must be cheap and non-blocking; they are invoked on the
/// read hot path.
pub trait ProfilerTracker: Send + Sync {
    /// The entry's value was served to a caller.
    fn on_value_used(&self);
    /// The entry was computed but lost the install race to a concurrent
    /// still-valid entry, and was discarded.
    fn on_value_rejected(&self);
    /// The entry was found stale: at least one dependency no longer matches
    /// its recorded stamp. Fired at most once per entry.
    fn on_value_invalidated(&self);
}

/// A [`ProfilerTracker`] backed by atomic counters, mainly useful in tests
/// and ad-hoc diagnostics.
#[derive(Debug, Default)]
pub struct CountingProfiler {
    used: AtomicU64,
    rejected: AtomicU64,
    invalidated: AtomicU64,
}

impl CountingProfiler {
    /// Creates a profiler with all counters at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of reads served from cache.
    pub fn used(&self) -> u64 {
        self.used.load(Ordering::Acquire)
    }

    /// Number of computed entries discarded in install races.
    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Acquire)
    }

    /// Number of entries invalidated by a dependency change.
    pub fn invalidated(&self) -> u64 {
        self.invalidated.load(Ordering::Acquire)
    }
}

impl ProfilerTracker for CountingProfiler {
    fn on_value_used(&self) {
        self.used.fetch_add(1, Ordering::AcqRel);
    }

    fn on_value_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::AcqRel);
    }

    fn on_value_invalidated(&self) {
        self.invalidated.fetch_add(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_track_events() {
        let profiler = CountingProfiler::new();
        profiler.on_value_used();
        profiler.on_value_used();
        profiler.on_value_rejected();
        profiler.on_value_invalidated();
        assert_eq!(profiler.used(), 2);
        assert_eq!(profiler.rejected(), 1);
        assert_eq!(profiler.invalidated(), 1);
    }
}
