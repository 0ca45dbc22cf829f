//! Immutable Cache Entry Snapshot
//!
//! A [`CacheEntry`] is created once per successful computation and never
//! mutated afterwards: the cache advances by replacing the entry, not by
//! editing it. Each entry carries the computed value, the flattened dependency
//! list, and a parallel array of stamps captured at computation time.
//!
//! # Invariants
//!
//! - `dependencies.len() == timestamps.len()`, index-aligned.
//! - Fields never change after construction.
//! - `on_value_invalidated` fires at most once per entry, on the first
//!   failed freshness probe.
//!
//! # Lifecycle
//!
//! Created by the cache site's compute step; dropped when superseded by a
//! fresh entry, when the slot is evicted, or when the holder itself goes away.
//! Readers always re-check for "entry gone" and transparently recompute, so
//! an entry disappearing between probe and read is never an error.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::dep::{Dependency, EntryValidity};
use crate::profiler::ProfilerTracker;

/// An immutable snapshot of one successful computation: value, flattened
/// dependencies, and their stamps.
///
/// Entries implement [`EntryValidity`], so an entry can itself be declared as
/// a dependency of another entry; such nested dependencies are checked
/// structurally (by re-walking their own dependency list) rather than by a
/// numeric stamp.
pub struct CacheEntry<T> {
    value: Option<T>,
    dependencies: Vec<Dependency>,
    timestamps: Vec<i64>,
    profiler: Option<Arc<dyn ProfilerTracker>>,
    invalidation_reported: AtomicBool,
}

impl<T> CacheEntry<T> {
    pub(crate) fn new(
        value: Option<T>,
        dependencies: Vec<Dependency>,
        timestamps: Vec<i64>,
        profiler: Option<Arc<dyn ProfilerTracker>>,
    ) -> Self {
        debug_assert_eq!(dependencies.len(), timestamps.len());
        Self {
            value,
            dependencies,
            timestamps,
            profiler,
            invalidation_reported: AtomicBool::new(false),
        }
    }

    /// The computed value, or `None` if the provider signaled "no result".
    ///
    /// Returns a clone; wrap expensive values in `Arc` if the identity of the
    /// cached object matters to callers.
    #[inline]
    pub fn value(&self) -> Option<T>
    where
        T: Clone,
    {
        self.value.clone()
    }

    /// The flattened, order-preserving dependency list.
    #[inline]
    pub fn dependencies(&self) -> &[Dependency] {
        &self.dependencies
    }

    /// Stamps captured at computation time, parallel to
    /// [`dependencies`](Self::dependencies).
    #[inline]
    pub fn timestamps(&self) -> &[i64] {
        &self.timestamps
    }

    /// True while every dependency still matches its recorded stamp.
    ///
    /// The first failing dependency makes the whole entry stale; there is no
    /// partial validity. The first failure also fires `on_value_invalidated`
    /// on the entry's profiler handle, exactly once over the entry's life.
    pub fn is_up_to_date(&self) -> bool {
        for (dep, &stamp) in self.dependencies.iter().zip(&self.timestamps) {
            if !dep.is_fresh(stamp) {
                self.note_invalidated();
                return false;
            }
        }
        true
    }

    /// Records a read served from this entry.
    #[inline]
    pub(crate) fn mark_used(&self) {
        if let Some(profiler) = &self.profiler {
            profiler.on_value_used();
        }
    }

    /// Records that this entry lost the install race and was discarded.
    #[inline]
    pub(crate) fn mark_rejected(&self) {
        if let Some(profiler) = &self.profiler {
            profiler.on_value_rejected();
        }
    }

    fn note_invalidated(&self) {
        let first = self
            .invalidation_reported
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if first {
            if let Some(profiler) = &self.profiler {
                profiler.on_value_invalidated();
            }
        }
    }
}

impl<T: Send + Sync> EntryValidity for CacheEntry<T> {
    fn is_up_to_date(&self) -> bool {
        CacheEntry::is_up_to_date(self)
    }
}

impl<T: fmt::Debug> fmt::Debug for CacheEntry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheEntry")
            .field("value", &self.value)
            .field("dependencies", &self.dependencies.len())
            .field("timestamps", &self.timestamps)
            .finish()
    }
}
