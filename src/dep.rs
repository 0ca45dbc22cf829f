//! Dependency Model and Version Stamping
//!
//! A cached value stays valid only as long as everything it was computed from
//! stays unchanged. This module defines what "everything" can be:
//!
//! - A [`VersionedResource`]: anything exposing a monotonically non-decreasing
//!   version counter (a document, a settings object, a plain counter).
//! - A nested cache entry, exposed through [`EntryValidity`]: another cached
//!   value whose own freshness transitively covers this one. Nested entries
//!   have no meaningful numeric stamp; they are checked structurally.
//! - An indirection (`Weak`) to another dependency. A cleared indirection
//!   makes the dependency permanently stale.
//!
//! Providers may declare dependencies in nested groups for convenience; the
//! list is flattened once at entry-creation time, preserving order and
//! dropping the [`Dependency::Ignore`] sentinel wherever it appears.
//!
//! # Stamping
//!
//! Each dependency is stamped with a signed 64-bit value at computation time
//! via [`Dependency::timestamp`]:
//!
//! | Dependency kind | Stamp |
//! |-----------------|-------|
//! | `Versioned`     | the resource's native counter |
//! | `Entry`         | sentinel `0` (validity is structural, not numeric) |
//! | `Indirect`      | the target's stamp, or `-1` once cleared |
//!
//! A negative stamp never matches any future stamp, so `-1` means
//! "permanently stale".

use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Weak};

/// Stamp recorded for a nested cache entry dependency.
///
/// Nested entries do not expose a raw version number; their freshness is
/// re-derived by walking their own dependency list. The stored stamp is a
/// fixed sentinel so the parallel `timestamps` array stays index-aligned.
pub(crate) const NESTED_ENTRY_STAMP: i64 = 0;

/// Stamp meaning "this dependency can never be fresh again".
pub(crate) const STALE_STAMP: i64 = -1;

/// Anything exposing a monotonically non-decreasing version counter.
///
/// The counter must never go backwards and must never be negative; a bump
/// signals "something I cover has changed" and invalidates every cache entry
/// stamped with an older value.
///
/// # Examples
///
/// ```
/// use depcache_rs::{VersionCounter, VersionedResource};
///
/// let counter = VersionCounter::new();
/// let before = counter.version();
/// counter.increment();
/// assert!(counter.version() > before);
/// ```
pub trait VersionedResource: Send + Sync {
    /// Returns the current version. Monotonically non-decreasing, never negative.
    fn version(&self) -> i64;
}

/// The structural freshness contract a nested cache entry exposes when used
/// as a dependency of another entry.
pub trait EntryValidity: Send + Sync {
    /// True while every dependency of the nested entry is still fresh.
    fn is_up_to_date(&self) -> bool;
}

/// A simple atomic implementation of [`VersionedResource`].
///
/// Bump it with [`increment`](VersionCounter::increment) whenever the state it
/// guards changes. This is the building block most call sites reach for when
/// they have no natural version counter of their own.
#[derive(Debug, Default)]
pub struct VersionCounter {
    count: AtomicI64,
}

impl VersionCounter {
    /// Creates a counter starting at version 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a modification, bumping the version.
    #[inline]
    pub fn increment(&self) {
        self.count.fetch_add(1, Ordering::Release);
    }

    /// The current version.
    #[inline]
    pub fn version(&self) -> i64 {
        self.count.load(Ordering::Acquire)
    }
}

impl VersionedResource for VersionCounter {
    #[inline]
    fn version(&self) -> i64 {
        VersionCounter::version(self)
    }
}

/// A resource that never changes. Entries depending only on it stay valid
/// until explicitly evicted.
#[derive(Debug, Default, Clone, Copy)]
pub struct NeverChanged;

impl VersionedResource for NeverChanged {
    #[inline]
    fn version(&self) -> i64 {
        0
    }
}

/// A resource considered changed on every probe. Entries depending on it are
/// recomputed on every read; useful for pinning a cache site open during
/// diagnosis.
#[derive(Debug, Default)]
pub struct AlwaysChanged {
    probe: AtomicI64,
}

impl VersionedResource for AlwaysChanged {
    #[inline]
    fn version(&self) -> i64 {
        self.probe.fetch_add(1, Ordering::Relaxed)
    }
}

/// One declared dependency of a cached value.
///
/// The closed set of kinds makes the stamping function exhaustive: there is no
/// "unrecognized dependency" failure mode left at runtime, only the two
/// structural forms (`Group`, `Ignore`) that are consumed during flattening
/// and must not survive into a stored entry.
#[derive(Clone)]
pub enum Dependency {
    /// A resource with a numeric version counter.
    Versioned(Arc<dyn VersionedResource>),
    /// A nested cache entry, checked structurally rather than by stamp.
    Entry(Arc<dyn EntryValidity>),
    /// A weak indirection to another dependency. Once the target is dropped
    /// the dependency is permanently stale.
    Indirect(Weak<Dependency>),
    /// A nested list of dependencies, expanded in place during flattening.
    Group(Vec<Dependency>),
    /// Sentinel dropped during flattening; declares "no dependency here".
    Ignore,
}

impl Dependency {
    /// Wraps a versioned resource.
    pub fn versioned<R: VersionedResource + 'static>(resource: Arc<R>) -> Self {
        Dependency::Versioned(resource)
    }

    /// Wraps a nested cache entry (or anything else with a structural
    /// freshness check).
    pub fn nested(entry: Arc<dyn EntryValidity>) -> Self {
        Dependency::Entry(entry)
    }

    /// Wraps a weak indirection to another dependency.
    pub fn indirect(target: &Arc<Dependency>) -> Self {
        Dependency::Indirect(Arc::downgrade(target))
    }

    /// Groups dependencies into a nested list. Flattened away at
    /// entry-creation time; only a declaration convenience.
    pub fn group(deps: Vec<Dependency>) -> Self {
        Dependency::Group(deps)
    }

    /// Captures the dependency's current stamp.
    ///
    /// Returns `-1` for a cleared indirection (permanently stale), the native
    /// counter for a versioned resource, and a sentinel `0` for a nested
    /// entry. `Group` and `Ignore` never survive flattening; encountering one
    /// here is a programming error, logged and degraded to "always stale"
    /// rather than a panic.
    pub fn timestamp(&self) -> i64 {
        match self {
            Dependency::Versioned(resource) => resource.version(),
            Dependency::Entry(_) => NESTED_ENTRY_STAMP,
            Dependency::Indirect(weak) => match weak.upgrade() {
                Some(target) => target.timestamp(),
                None => STALE_STAMP,
            },
            Dependency::Group(_) | Dependency::Ignore => {
                tracing::error!(
                    kind = self.kind_name(),
                    "unflattened structural dependency reached stamping; treating as stale"
                );
                STALE_STAMP
            }
        }
    }

    /// True if the dependency still matches the stamp captured at
    /// computation time.
    ///
    /// Versioned resources compare stamps (a negative stored stamp never
    /// matches). Nested entries re-derive freshness structurally.
    pub fn is_fresh(&self, stamp: i64) -> bool {
        match self {
            Dependency::Entry(entry) => entry.is_up_to_date(),
            Dependency::Indirect(weak) => match weak.upgrade() {
                Some(target) => target.is_fresh(stamp),
                None => false,
            },
            _ => {
                let current = self.timestamp();
                current == stamp && current >= 0
            }
        }
    }

    fn kind_name(&self) -> &'static str {
        match self {
            Dependency::Versioned(_) => "versioned",
            Dependency::Entry(_) => "entry",
            Dependency::Indirect(_) => "indirect",
            Dependency::Group(_) => "group",
            Dependency::Ignore => "ignore",
        }
    }
}

impl fmt::Debug for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dependency::Versioned(resource) => f
                .debug_tuple("Versioned")
                .field(&resource.version())
                .finish(),
            Dependency::Entry(_) => f.write_str("Entry"),
            Dependency::Indirect(weak) => f
                .debug_tuple("Indirect")
                .field(&weak.upgrade().is_some())
                .finish(),
            Dependency::Group(deps) => f.debug_tuple("Group").field(&deps.len()).finish(),
            Dependency::Ignore => f.write_str("Ignore"),
        }
    }
}

/// Conversion of a cached value into a dependency of its own cache entry.
///
/// This is the typed seam behind "track value" mode: when enabled, the
/// computed value is appended to the flattened dependency list, so a change
/// observed through the value itself invalidates the entry.
pub trait DependencySource {
    /// Returns the dependency this value contributes.
    fn as_dependency(&self) -> Dependency;
}

impl<R: VersionedResource + 'static> DependencySource for Arc<R> {
    fn as_dependency(&self) -> Dependency {
        Dependency::Versioned(self.clone())
    }
}

impl DependencySource for Dependency {
    fn as_dependency(&self) -> Dependency {
        self.clone()
    }
}

/// Flattens a declared dependency list: nested groups are expanded in place
/// (order preserved, any depth) and the `Ignore` sentinel is dropped.
pub(crate) fn flatten(declared: Vec<Dependency>) -> Vec<Dependency> {
    let mut flat = Vec::with_capacity(declared.len());
    flatten_into(declared, &mut flat);
    flat
}

fn flatten_into(declared: Vec<Dependency>, flat: &mut Vec<Dependency>) {
    for dep in declared {
        match dep {
            Dependency::Group(inner) => flatten_into(inner, flat),
            Dependency::Ignore => {}
            leaf => flat.push(leaf),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_counter_increments() {
        let counter = VersionCounter::new();
        assert_eq!(counter.version(), 0);
        counter.increment();
        counter.increment();
        assert_eq!(counter.version(), 2);
    }

    #[test]
    fn test_versioned_stamp_matches_resource() {
        let counter = Arc::new(VersionCounter::new());
        counter.increment();
        let dep = Dependency::versioned(counter.clone());
        assert_eq!(dep.timestamp(), 1);
        assert!(dep.is_fresh(1));
        counter.increment();
        assert!(!dep.is_fresh(1));
    }

    #[test]
    fn test_negative_stored_stamp_is_never_fresh() {
        let dep = Dependency::versioned(Arc::new(NeverChanged));
        assert!(!dep.is_fresh(-1));
    }

    #[test]
    fn test_cleared_indirection_is_permanently_stale() {
        let target = Arc::new(Dependency::versioned(Arc::new(NeverChanged)));
        let dep = Dependency::indirect(&target);
        assert_eq!(dep.timestamp(), 0);
        assert!(dep.is_fresh(0));

        drop(target);
        assert_eq!(dep.timestamp(), STALE_STAMP);
        assert!(!dep.is_fresh(0));
    }

    #[test]
    fn test_indirection_recurses_to_target() {
        let counter = Arc::new(VersionCounter::new());
        let target = Arc::new(Dependency::versioned(counter.clone()));
        let dep = Dependency::indirect(&target);
        counter.increment();
        assert_eq!(dep.timestamp(), 1);
    }

    #[test]
    fn test_always_changed_never_fresh() {
        let dep = Dependency::versioned(Arc::new(AlwaysChanged::default()));
        let stamp = dep.timestamp();
        assert!(!dep.is_fresh(stamp));
    }

    #[test]
    fn test_flatten_expands_groups_in_order() {
        let a = Arc::new(VersionCounter::new());
        let b = Arc::new(VersionCounter::new());
        let c = Arc::new(VersionCounter::new());
        let d = Arc::new(VersionCounter::new());
        for (counter, bumps) in [(&a, 1), (&b, 2), (&c, 3), (&d, 4)] {
            for _ in 0..bumps {
                counter.increment();
            }
        }

        let nested = flatten(vec![
            Dependency::versioned(a.clone()),
            Dependency::group(vec![
                Dependency::versioned(b.clone()),
                Dependency::versioned(c.clone()),
            ]),
            Dependency::versioned(d.clone()),
        ]);
        let plain = flatten(vec![
            Dependency::versioned(a),
            Dependency::versioned(b),
            Dependency::versioned(c),
            Dependency::versioned(d),
        ]);

        let stamps = |deps: &[Dependency]| deps.iter().map(Dependency::timestamp).collect::<Vec<_>>();
        assert_eq!(stamps(&nested), vec![1, 2, 3, 4]);
        assert_eq!(stamps(&nested), stamps(&plain));
    }

    #[test]
    fn test_flatten_drops_ignore_at_any_depth() {
        let counter = Arc::new(VersionCounter::new());
        let flat = flatten(vec![
            Dependency::Ignore,
            Dependency::group(vec![
                Dependency::Ignore,
                Dependency::versioned(counter),
                Dependency::group(vec![Dependency::Ignore]),
            ]),
        ]);
        assert_eq!(flat.len(), 1);
        assert!(matches!(flat[0], Dependency::Versioned(_)));
    }

    #[test]
    fn test_unflattened_group_stamps_stale() {
        let dep = Dependency::group(vec![]);
        assert_eq!(dep.timestamp(), STALE_STAMP);
        assert!(!dep.is_fresh(STALE_STAMP));
    }
}
