//! Cache Site Engine
//!
//! A cache site is one memoized computation: a provider, a slot holding the
//! current [`CacheEntry`], and the protocol that keeps the two consistent
//! under concurrent readers without a global lock.
//!
//! # Read protocol
//!
//! ```text
//! get_value
//!    │
//!    ├─ slot holds an up-to-date entry? ──▶ record read, return value
//!    │
//!    ├─ take StackStamp, snapshot the slot (expected)
//!    ├─ run provider under recursion detection
//!    │     ├─ reentrant (same site already computing on this thread)
//!    │     │      └─▶ compute inline, return value, never cache
//!    │     └─ computed
//!    │            ├─ stamp.may_cache_now() ──▶ compare_and_install
//!    │            └─ cycle observed ─────────▶ return value, never cache
//!    ▼
//! ```
//!
//! # Optimistic install
//!
//! Computation always runs outside any lock: two threads may compute
//! redundant entries concurrently, and that redundancy is the price of never
//! blocking readers behind a slow provider. Only the install is serialized,
//! in a constant-time critical section: if the slot still holds the snapshot
//! taken before computing, the fresh entry replaces it; if another thread
//! already installed a still-valid entry, the fresh one is discarded (its
//! profiler records a rejection) and the winner is returned. An install race
//! is the expected mechanism, never an error.
//!
//! # Eviction
//!
//! The slot's entry can vanish at any time ([`CacheCore::evict`] models the
//! host reclaiming memory). Readers re-check for "entry gone" on every call
//! and transparently recompute; there is no cache-miss error.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::CacheConfig;
use crate::dep::{flatten, Dependency, DependencySource};
use crate::entry::CacheEntry;
use crate::profiler::ProfilerTracker;
use crate::provider::{CacheProvider, ParameterizedCacheProvider};
use crate::recursion::{self, ComputationId};
use crate::stability::ProviderView;

/// Per-site engine shared by the plain and parameterized cache fronts: the
/// slot, the install protocol, and the recursion-guard interaction.
pub(crate) struct SiteEngine<T> {
    slot: Mutex<Option<Arc<CacheEntry<T>>>>,
    config: CacheConfig,
}

impl<T: Clone + Send + Sync + 'static> SiteEngine<T> {
    fn new(config: CacheConfig) -> Self {
        Self {
            slot: Mutex::new(None),
            config,
        }
    }

    /// The computation identity used for reentrancy detection: the engine's
    /// address, stable for the lifetime of the cache site.
    fn identity(&self) -> ComputationId {
        ComputationId::new(self as *const Self as *const () as usize)
    }

    fn snapshot(&self) -> Option<Arc<CacheEntry<T>>> {
        self.slot.lock().clone()
    }

    fn up_to_date_entry(&self) -> Option<Arc<CacheEntry<T>>> {
        let entry = self.snapshot()?;
        if entry.is_up_to_date() {
            Some(entry)
        } else {
            None
        }
    }

    fn evict(&self) {
        self.slot.lock().take();
    }

    fn get_or_compute(&self, compute: &dyn Fn() -> CacheEntry<T>) -> Option<T> {
        if let Some(entry) = self.up_to_date_entry() {
            entry.mark_used();
            self.maybe_recheck(&entry, compute);
            return entry.value();
        }

        let stamp = recursion::mark_stack();
        let expected = self.snapshot();
        match recursion::run_detecting_recursion(self.identity(), compute) {
            Some(fresh) => {
                let fresh = Arc::new(fresh);
                let winner = if stamp.may_cache_now() {
                    self.compare_and_install(expected, fresh)
                } else {
                    // A cycle ran through this computation; the value may be
                    // unstable. Serve it, never cache it.
                    fresh
                };
                winner.mark_used();
                winner.value()
            }
            // Reentrant call into this same site: compute inline without the
            // guard and return the value uncached.
            None => compute().value(),
        }
    }

    /// The optimistic install loop.
    ///
    /// `expected` is the slot snapshot taken before computing. The critical
    /// section is a constant-time read-compare-write; freshness checks run
    /// outside it.
    fn compare_and_install(
        &self,
        mut expected: Option<Arc<CacheEntry<T>>>,
        fresh: Arc<CacheEntry<T>>,
    ) -> Arc<CacheEntry<T>> {
        loop {
            let current = {
                let mut slot = self.slot.lock();
                let current = slot.clone();
                let unchanged = match (&current, &expected) {
                    (None, None) => true,
                    (Some(current), Some(expected)) => Arc::ptr_eq(current, expected),
                    _ => false,
                };
                if unchanged {
                    *slot = Some(fresh.clone());
                    return fresh;
                }
                current
            };

            match current {
                Some(current) => {
                    if current.is_up_to_date() {
                        // Another thread won the race with a still-valid
                        // entry; discard ours and reuse theirs.
                        fresh.mark_rejected();
                        return current;
                    }
                    expected = Some(current);
                }
                None => expected = None,
            }
        }
    }

    /// Randomized re-verification of an entry already deemed up to date:
    /// re-runs the provider and compares the dependency fingerprint, purely
    /// to catch non-deterministic providers. Sampled; logged, never fatal.
    fn maybe_recheck(&self, entry: &CacheEntry<T>, compute: &dyn Fn() -> CacheEntry<T>) {
        let probability = self.config.recheck_probability;
        if probability <= 0.0 || rand::random::<f64>() >= probability {
            return;
        }
        let recomputed = compute();
        if recomputed.timestamps() != entry.timestamps()
            || recomputed.dependencies().len() != entry.dependencies().len()
        {
            tracing::warn!(
                cached = ?entry.timestamps(),
                recomputed = ?recomputed.timestamps(),
                "re-running a cached provider produced a different dependency fingerprint"
            );
        }
    }
}

impl<T> fmt::Debug for SiteEngine<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SiteEngine")
            .field("cached", &self.slot.lock().is_some())
            .finish()
    }
}

/// Appends the computed value itself to the dependency list in "track value"
/// mode.
pub(crate) fn value_dependency<T: DependencySource>(value: &T) -> Dependency {
    value.as_dependency()
}

fn build_entry<T>(
    value: Option<T>,
    declared: Vec<Dependency>,
    track: Option<fn(&T) -> Dependency>,
    profiler: Option<Arc<dyn ProfilerTracker>>,
) -> CacheEntry<T> {
    let mut dependencies = flatten(declared);
    if let (Some(track), Some(value)) = (track, value.as_ref()) {
        dependencies.push(track(value));
    }
    let timestamps = dependencies.iter().map(Dependency::timestamp).collect();
    CacheEntry::new(value, dependencies, timestamps, profiler)
}

/// One memoized computation: returns its cached value while every declared
/// dependency is unchanged, recomputes otherwise.
///
/// `CacheCore` is safe to share across threads; any number of threads may
/// call [`get_value`](CacheCore::get_value) concurrently. Values computed
/// during a reentrant (cyclic) call chain are served but never cached.
///
/// # Examples
///
/// ```
/// use depcache_rs::{CacheCore, Dependency, ProviderResult, VersionCounter};
/// use std::sync::Arc;
///
/// let counter = Arc::new(VersionCounter::new());
/// let source = counter.clone();
/// let cache = CacheCore::new(move || {
///     ProviderResult::new(
///         format!("v{}", source.version()),
///         vec![Dependency::versioned(source.clone())],
///     )
/// });
///
/// assert_eq!(cache.get_value(), Some("v0".to_string()));
/// counter.increment();
/// assert_eq!(cache.get_value(), Some("v1".to_string()));
/// ```
pub struct CacheCore<T> {
    engine: SiteEngine<T>,
    provider: Arc<dyn CacheProvider<T>>,
    profiler: Option<Arc<dyn ProfilerTracker>>,
    track: Option<fn(&T) -> Dependency>,
    owner: u64,
}

impl<T: Clone + Send + Sync + 'static> CacheCore<T> {
    /// Creates a standalone cache site with default configuration.
    pub fn new(provider: impl CacheProvider<T> + 'static) -> Self {
        Self::with_config(provider, CacheConfig::default(), None)
    }

    /// Creates a standalone cache site with an explicit configuration and an
    /// optional profiler attached to every entry it computes.
    pub fn with_config(
        provider: impl CacheProvider<T> + 'static,
        config: CacheConfig,
        profiler: Option<Arc<dyn ProfilerTracker>>,
    ) -> Self {
        Self::assemble(Arc::new(provider), config, profiler, None, 0)
    }

    /// Creates a cache site in "track value" mode: the computed value itself
    /// is appended to the dependency list, so a change observed through the
    /// value invalidates the entry.
    pub fn tracked(provider: impl CacheProvider<T> + 'static) -> Self
    where
        T: DependencySource,
    {
        Self::assemble(
            Arc::new(provider),
            CacheConfig::default(),
            None,
            Some(value_dependency::<T>),
            0,
        )
    }

    pub(crate) fn assemble(
        provider: Arc<dyn CacheProvider<T>>,
        config: CacheConfig,
        profiler: Option<Arc<dyn ProfilerTracker>>,
        track: Option<fn(&T) -> Dependency>,
        owner: u64,
    ) -> Self {
        Self {
            engine: SiteEngine::new(config),
            provider,
            profiler,
            track,
            owner,
        }
    }

    /// Returns the cached value if still valid, recomputing and installing a
    /// fresh entry otherwise. `None` means the provider signaled "no result".
    ///
    /// A provider panic propagates to the caller; nothing is cached and the
    /// previous entry, if any, is left untouched for the next attempt.
    pub fn get_value(&self) -> Option<T> {
        self.engine.get_or_compute(&|| self.compute_entry())
    }

    fn compute_entry(&self) -> CacheEntry<T> {
        let (value, declared) = self.provider.compute().into_parts();
        build_entry(value, declared, self.track, self.profiler.clone())
    }

    /// The current entry, fresh or stale, if one is installed. Useful for
    /// declaring this site as a nested dependency of another site.
    pub fn cached_entry(&self) -> Option<Arc<CacheEntry<T>>> {
        self.engine.snapshot()
    }

    /// True if an entry is installed and all its dependencies are unchanged.
    pub fn has_up_to_date_value(&self) -> bool {
        self.engine.up_to_date_entry().is_some()
    }

    /// Drops the installed entry, modeling reclamation under memory
    /// pressure. The next read transparently recomputes.
    pub fn evict(&self) {
        self.engine.evict();
    }

    pub(crate) fn owner(&self) -> u64 {
        self.owner
    }

    pub(crate) fn provider_view(&self) -> ProviderView<'_> {
        ProviderView {
            label: self.provider.type_label(),
            identity: Arc::as_ptr(&self.provider) as *const () as usize,
            fields: self.provider.inspect(),
        }
    }
}

impl<T> fmt::Debug for CacheCore<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheCore")
            .field("engine", &self.engine)
            .field("provider", &self.provider.type_label())
            .field("tracks_value", &self.track.is_some())
            .finish()
    }
}

/// A cache site whose provider takes one caller-supplied parameter.
///
/// The cached value is shared across all callers of the site, so the
/// parameter must not change the result between logically identical calls;
/// it exists to thread context (a session, a connection) into the provider
/// without capturing it.
pub struct ParameterizedCacheCore<P, T> {
    engine: SiteEngine<T>,
    provider: Arc<dyn ParameterizedCacheProvider<P, T>>,
    profiler: Option<Arc<dyn ProfilerTracker>>,
    track: Option<fn(&T) -> Dependency>,
    owner: u64,
}

impl<P, T> ParameterizedCacheCore<P, T>
where
    P: Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
{
    /// Creates a standalone parameterized cache site.
    pub fn new(provider: impl ParameterizedCacheProvider<P, T> + 'static) -> Self {
        Self::assemble(Arc::new(provider), CacheConfig::default(), None, None, 0)
    }

    pub(crate) fn assemble(
        provider: Arc<dyn ParameterizedCacheProvider<P, T>>,
        config: CacheConfig,
        profiler: Option<Arc<dyn ProfilerTracker>>,
        track: Option<fn(&T) -> Dependency>,
        owner: u64,
    ) -> Self {
        Self {
            engine: SiteEngine::new(config),
            provider,
            profiler,
            track,
            owner,
        }
    }

    /// Returns the cached value if still valid, recomputing with `param`
    /// otherwise. See [`CacheCore::get_value`] for the protocol.
    pub fn get_value(&self, param: &P) -> Option<T> {
        self.engine.get_or_compute(&|| self.compute_entry(param))
    }

    fn compute_entry(&self, param: &P) -> CacheEntry<T> {
        let (value, declared) = self.provider.compute(param).into_parts();
        build_entry(value, declared, self.track, self.profiler.clone())
    }

    /// The current entry, fresh or stale, if one is installed.
    pub fn cached_entry(&self) -> Option<Arc<CacheEntry<T>>> {
        self.engine.snapshot()
    }

    /// True if an entry is installed and all its dependencies are unchanged.
    pub fn has_up_to_date_value(&self) -> bool {
        self.engine.up_to_date_entry().is_some()
    }

    /// Drops the installed entry; the next read recomputes.
    pub fn evict(&self) {
        self.engine.evict();
    }

    pub(crate) fn owner(&self) -> u64 {
        self.owner
    }

    pub(crate) fn provider_view(&self) -> ProviderView<'_> {
        ProviderView {
            label: self.provider.type_label(),
            identity: Arc::as_ptr(&self.provider) as *const () as usize,
            fields: self.provider.inspect(),
        }
    }
}

impl<P, T> fmt::Debug for ParameterizedCacheCore<P, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParameterizedCacheCore")
            .field("engine", &self.engine)
            .field("provider", &self.provider.type_label())
            .finish()
    }
}
