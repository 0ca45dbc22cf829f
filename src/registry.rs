//! Cache Registry and Holder Storage
//!
//! The registry routes `(holder, key, provider)` requests to the right cache
//! site, creating it exactly once per `(holder, key)` pair, and supports bulk
//! invalidation across every holder it has ever tracked.
//!
//! # Holders
//!
//! A holder is an arbitrary object used only as a storage location for cache
//! sites, keyed by opaque [`SlotKey`]s. Anything implementing
//! [`UserDataHolder`] qualifies; [`UserDataHost`] is a ready-made
//! implementation for objects with no natural slot storage of their own.
//!
//! # Creation races
//!
//! Two threads may race to create the first cache site for a `(holder, key)`
//! pair. Creation is cheap (no computation happens yet), so both build one
//! and `put_user_slot_if_absent` picks the winner; the loser's site is
//! dropped unused.
//!
//! # Bulk invalidation
//!
//! The registry weakly tracks every holder and every key it has served.
//! [`clear_all`](CacheRegistry::clear_all) walks the cross product and clears
//! each slot. This is O(holders × keys) and meant for rare global events (a
//! settings change, a session reload), not for the hot path. Holders that have already
//! been dropped are skipped; holders cleared by a coarser lifecycle event can
//! opt out of tracking entirely via
//! [`UserDataHolder::tracked_for_bulk_clear`].
//!
//! # Ownership
//!
//! Each registry stamps the sites it creates. A site found under a key but
//! stamped by a different registry (a stale leftover from a torn-down
//! session) is discarded and rebuilt rather than reused.

use std::any::Any;
use std::fmt;
use std::mem;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use hashbrown::{HashMap, HashSet};
use parking_lot::{Mutex, RwLock};

use crate::config::CacheConfig;
use crate::dep::{Dependency, DependencySource};
use crate::profiler::ProfilerTracker;
use crate::provider::{CacheProvider, ParameterizedCacheProvider};
use crate::site::{value_dependency, CacheCore, ParameterizedCacheCore};
use crate::stability::{ProviderStabilityChecker, ProviderView};

/// An opaque, globally unique, named key identifying one cache site on a
/// holder.
///
/// Create each key once (typically in a `static` or `OnceLock`) and reuse it;
/// two keys created with the same name are distinct keys.
///
/// # Examples
///
/// ```
/// use depcache_rs::SlotKey;
///
/// let a = SlotKey::new("parsed-imports");
/// let b = SlotKey::new("parsed-imports");
/// assert_ne!(a, b);
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SlotKey {
    id: u64,
    name: &'static str,
}

impl SlotKey {
    /// Creates a fresh key. Identity is the allocation, not the name.
    pub fn new(name: &'static str) -> Self {
        static NEXT_ID: AtomicU64 = AtomicU64::new(1);
        Self {
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            name,
        }
    }

    /// The diagnostic name the key was created with.
    pub fn name(&self) -> &'static str {
        self.name
    }
}

/// Storage contract a holder object offers to the registry: opaque typed
/// slots with put-if-absent semantics.
pub trait UserDataHolder: Send + Sync {
    /// Returns the value stored under `key`, if any.
    fn get_user_slot(&self, key: &SlotKey) -> Option<Arc<dyn Any + Send + Sync>>;

    /// Stores `value` under `key` unless a value is already present; returns
    /// the stored value either way (the winner of a creation race).
    fn put_user_slot_if_absent(
        &self,
        key: &SlotKey,
        value: Arc<dyn Any + Send + Sync>,
    ) -> Arc<dyn Any + Send + Sync>;

    /// Removes the value stored under `key`.
    fn clear_user_slot(&self, key: &SlotKey);

    /// Whether the registry should weakly track this holder for
    /// [`CacheRegistry::clear_all`]. Holder kinds whose slots are already
    /// cleared on a coarser lifecycle event should return `false` to avoid
    /// redundant bookkeeping.
    fn tracked_for_bulk_clear(&self) -> bool {
        true
    }
}

/// A ready-made [`UserDataHolder`]: a concurrent map from keys to opaque
/// values. Embed or wrap it to give any object slot storage.
#[derive(Default)]
pub struct UserDataHost {
    slots: RwLock<HashMap<SlotKey, Arc<dyn Any + Send + Sync>>>,
}

impl UserDataHost {
    /// Creates an empty holder.
    pub fn new() -> Self {
        Self::default()
    }
}

impl UserDataHolder for UserDataHost {
    fn get_user_slot(&self, key: &SlotKey) -> Option<Arc<dyn Any + Send + Sync>> {
        self.slots.read().get(key).cloned()
    }

    fn put_user_slot_if_absent(
        &self,
        key: &SlotKey,
        value: Arc<dyn Any + Send + Sync>,
    ) -> Arc<dyn Any + Send + Sync> {
        self.slots.write().entry(*key).or_insert(value).clone()
    }

    fn clear_user_slot(&self, key: &SlotKey) {
        self.slots.write().remove(key);
    }
}

impl fmt::Debug for UserDataHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserDataHost")
            .field("slots", &self.slots.read().len())
            .finish()
    }
}

/// Binds named cache sites to holder objects and mediates their lifecycle.
///
/// One registry per top-level session equivalent; construct it explicitly and
/// tear it down with [`clear_all`](CacheRegistry::clear_all). Sites created
/// by a registry are stamped with its identity and are not reused by another.
///
/// # Examples
///
/// ```
/// use depcache_rs::{
///     CacheRegistry, Dependency, ProviderResult, SlotKey, UserDataHost, VersionCounter,
/// };
/// use std::sync::Arc;
///
/// let registry = CacheRegistry::new();
/// let holder = Arc::new(UserDataHost::new());
/// let key = SlotKey::new("doubled");
///
/// let counter = Arc::new(VersionCounter::new());
/// let source = counter.clone();
/// let value = registry.get_or_create_cached_value(&holder, &key, move || {
///     ProviderResult::new(source.version() * 2, vec![Dependency::versioned(source.clone())])
/// });
/// assert_eq!(value, Some(0));
/// ```
pub struct CacheRegistry {
    id: u64,
    config: CacheConfig,
    profiler: Option<Arc<dyn ProfilerTracker>>,
    checker: ProviderStabilityChecker,
    holders: Mutex<HashMap<usize, Weak<dyn UserDataHolder>>>,
    keys: Mutex<HashSet<SlotKey>>,
}

impl CacheRegistry {
    /// Creates a registry with default configuration (all debug paths off).
    pub fn new() -> Self {
        Self::with_config(CacheConfig::default())
    }

    /// Creates a registry with an explicit configuration.
    pub fn with_config(config: CacheConfig) -> Self {
        Self::with_profiler(config, None)
    }

    /// Creates a registry whose sites attach `profiler` to every entry they
    /// compute.
    pub fn with_profiler(
        config: CacheConfig,
        profiler: Option<Arc<dyn ProfilerTracker>>,
    ) -> Self {
        static NEXT_ID: AtomicU64 = AtomicU64::new(1);
        Self {
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            config,
            profiler,
            checker: ProviderStabilityChecker::new(config.stability_checks),
            holders: Mutex::new(HashMap::new()),
            keys: Mutex::new(HashSet::new()),
        }
    }

    /// Returns the value cached under `(holder, key)`, creating the cache
    /// site on first use and recomputing via `provider` whenever the cached
    /// entry is stale or evicted.
    pub fn get_or_create_cached_value<H, T, P>(
        &self,
        holder: &Arc<H>,
        key: &SlotKey,
        provider: P,
    ) -> Option<T>
    where
        H: UserDataHolder + 'static,
        T: Clone + Send + Sync + 'static,
        P: CacheProvider<T> + 'static,
    {
        self.cached_value_impl(holder, key, Arc::new(provider), None)
    }

    /// Like [`get_or_create_cached_value`](Self::get_or_create_cached_value),
    /// but in "track value" mode: the computed value itself joins the
    /// dependency list, so a change observed through the value invalidates
    /// the entry.
    pub fn get_or_create_tracked_cached_value<H, T, P>(
        &self,
        holder: &Arc<H>,
        key: &SlotKey,
        provider: P,
    ) -> Option<T>
    where
        H: UserDataHolder + 'static,
        T: Clone + Send + Sync + DependencySource + 'static,
        P: CacheProvider<T> + 'static,
    {
        self.cached_value_impl(holder, key, Arc::new(provider), Some(value_dependency::<T>))
    }

    /// Parameterized variant: the provider receives `param` on every
    /// recomputation. The parameter must not change the result between
    /// logically identical calls; the cached value is shared by all callers
    /// of the site.
    pub fn get_or_create_parameterized_cached_value<H, P, T, Prov>(
        &self,
        holder: &Arc<H>,
        key: &SlotKey,
        provider: Prov,
        param: &P,
    ) -> Option<T>
    where
        H: UserDataHolder + 'static,
        P: Send + Sync + 'static,
        T: Clone + Send + Sync + 'static,
        Prov: ParameterizedCacheProvider<P, T> + 'static,
    {
        self.parameterized_impl(holder, key, Arc::new(provider), None, param)
    }

    /// Parameterized variant in "track value" mode.
    pub fn get_or_create_tracked_parameterized_cached_value<H, P, T, Prov>(
        &self,
        holder: &Arc<H>,
        key: &SlotKey,
        provider: Prov,
        param: &P,
    ) -> Option<T>
    where
        H: UserDataHolder + 'static,
        P: Send + Sync + 'static,
        T: Clone + Send + Sync + DependencySource + 'static,
        Prov: ParameterizedCacheProvider<P, T> + 'static,
    {
        self.parameterized_impl(
            holder,
            key,
            Arc::new(provider),
            Some(value_dependency::<T>),
            param,
        )
    }

    fn cached_value_impl<H, T>(
        &self,
        holder: &Arc<H>,
        key: &SlotKey,
        provider: Arc<dyn CacheProvider<T>>,
        track: Option<fn(&T) -> Dependency>,
    ) -> Option<T>
    where
        H: UserDataHolder + 'static,
        T: Clone + Send + Sync + 'static,
    {
        if let Some(existing) = self.reusable_site::<H, CacheCore<T>>(holder, key) {
            if self.config.stability_checks && !existing.has_up_to_date_value() {
                self.checker.check_equivalent(
                    key,
                    &existing.provider_view(),
                    &provider_view(&provider),
                );
            }
            return existing.get_value();
        }

        let site = Arc::new(CacheCore::assemble(
            provider,
            self.config,
            self.profiler.clone(),
            track,
            self.id,
        ));
        let site = self.install_site(holder, key, site);
        site.get_value()
    }

    fn parameterized_impl<H, P, T>(
        &self,
        holder: &Arc<H>,
        key: &SlotKey,
        provider: Arc<dyn ParameterizedCacheProvider<P, T>>,
        track: Option<fn(&T) -> Dependency>,
        param: &P,
    ) -> Option<T>
    where
        H: UserDataHolder + 'static,
        P: Send + Sync + 'static,
        T: Clone + Send + Sync + 'static,
    {
        if let Some(existing) = self.reusable_site::<H, ParameterizedCacheCore<P, T>>(holder, key) {
            if self.config.stability_checks && !existing.has_up_to_date_value() {
                self.checker.check_equivalent(
                    key,
                    &existing.provider_view(),
                    &parameterized_provider_view(&provider),
                );
            }
            return existing.get_value(param);
        }

        let site = Arc::new(ParameterizedCacheCore::assemble(
            provider,
            self.config,
            self.profiler.clone(),
            track,
            self.id,
        ));
        let site = self.install_site(holder, key, site);
        site.get_value(param)
    }

    /// Looks up an existing site of the expected type that this registry
    /// owns. A slot holding a foreign or mistyped site is cleared so the
    /// caller can rebuild it; a single bad slot must not poison the key.
    fn reusable_site<H, S>(&self, holder: &Arc<H>, key: &SlotKey) -> Option<Arc<S>>
    where
        H: UserDataHolder + 'static,
        S: OwnedSite + Send + Sync + 'static,
    {
        let stored = holder.get_user_slot(key)?;
        match stored.downcast::<S>() {
            Ok(site) if site.owner_id() == self.id => Some(site),
            Ok(_) => {
                tracing::debug!(
                    key = key.name(),
                    "discarding cache site owned by a different registry"
                );
                holder.clear_user_slot(key);
                None
            }
            Err(_) => {
                tracing::error!(
                    key = key.name(),
                    "cache slot holds an unexpected type; clearing and rebuilding"
                );
                holder.clear_user_slot(key);
                None
            }
        }
    }

    fn install_site<H, S>(&self, holder: &Arc<H>, key: &SlotKey, site: Arc<S>) -> Arc<S>
    where
        H: UserDataHolder + 'static,
        S: Send + Sync + 'static,
    {
        let installed = holder.put_user_slot_if_absent(key, site.clone());
        let site = match installed.downcast::<S>() {
            // Either our site or a concurrently created winner.
            Ok(winner) => winner,
            Err(_) => {
                tracing::error!(
                    key = key.name(),
                    "cache slot raced with an unexpected type; serving uninstalled site"
                );
                site
            }
        };
        if holder.tracked_for_bulk_clear() {
            self.track_site(holder, key);
        }
        site
    }

    fn track_site<H: UserDataHolder + 'static>(&self, holder: &Arc<H>, key: &SlotKey) {
        let address = Arc::as_ptr(holder) as *const () as usize;
        let weak: Weak<dyn UserDataHolder> = Arc::<H>::downgrade(holder);
        // Insert unconditionally: the address may have been reused by a new
        // holder after a tracked one was dropped.
        self.holders.lock().insert(address, weak);
        self.keys.lock().insert(*key);
    }

    /// Clears every tracked key's slot on every tracked holder still alive,
    /// then resets the tracking collections.
    ///
    /// O(holders × keys); meant for rare global events, not the hot path.
    /// Cleared sites are recreated from scratch on next access.
    pub fn clear_all(&self) {
        let holders = mem::take(&mut *self.holders.lock());
        let keys = mem::take(&mut *self.keys.lock());
        for weak in holders.values() {
            if let Some(holder) = weak.upgrade() {
                for key in &keys {
                    holder.clear_user_slot(key);
                }
            }
        }
    }

    /// Number of holders currently tracked for bulk invalidation (dead
    /// holders included until the next [`clear_all`](Self::clear_all)).
    pub fn tracked_holders(&self) -> usize {
        self.holders.lock().len()
    }
}

impl Default for CacheRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CacheRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheRegistry")
            .field("id", &self.id)
            .field("config", &self.config)
            .field("tracked_holders", &self.holders.lock().len())
            .field("tracked_keys", &self.keys.lock().len())
            .finish()
    }
}

/// Owner stamp accessor shared by the two site shapes, so lookup code can be
/// generic over them.
trait OwnedSite {
    fn owner_id(&self) -> u64;
}

impl<T: Clone + Send + Sync + 'static> OwnedSite for CacheCore<T> {
    fn owner_id(&self) -> u64 {
        self.owner()
    }
}

impl<P, T> OwnedSite for ParameterizedCacheCore<P, T>
where
    P: Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
{
    fn owner_id(&self) -> u64 {
        self.owner()
    }
}

fn provider_view<T>(provider: &Arc<dyn CacheProvider<T>>) -> ProviderView<'_> {
    ProviderView {
        label: provider.type_label(),
        identity: Arc::as_ptr(provider) as *const () as usize,
        fields: provider.inspect(),
    }
}

fn parameterized_provider_view<P, T>(
    provider: &Arc<dyn ParameterizedCacheProvider<P, T>>,
) -> ProviderView<'_> {
    ProviderView {
        label: provider.type_label(),
        identity: Arc::as_ptr(provider) as *const () as usize,
        fields: provider.inspect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dep::VersionCounter;
    use crate::provider::ProviderResult;
    use std::sync::atomic::AtomicU64 as StdAtomicU64;

    fn fixed_provider(value: i32, runs: Arc<StdAtomicU64>) -> impl CacheProvider<i32> {
        move || {
            runs.fetch_add(1, Ordering::SeqCst);
            ProviderResult::new(value, Vec::new())
        }
    }

    #[test]
    fn test_site_created_once_per_holder_key() {
        let registry = CacheRegistry::new();
        let holder = Arc::new(UserDataHost::new());
        let key = SlotKey::new("once");
        let runs = Arc::new(StdAtomicU64::new(0));

        let first = registry.get_or_create_cached_value(&holder, &key, fixed_provider(5, runs.clone()));
        let second = registry.get_or_create_cached_value(&holder, &key, fixed_provider(5, runs.clone()));
        assert_eq!(first, Some(5));
        assert_eq!(second, Some(5));
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_distinct_keys_get_distinct_sites() {
        let registry = CacheRegistry::new();
        let holder = Arc::new(UserDataHost::new());
        let key_a = SlotKey::new("a");
        let key_b = SlotKey::new("b");
        let runs = Arc::new(StdAtomicU64::new(0));

        registry.get_or_create_cached_value(&holder, &key_a, fixed_provider(1, runs.clone()));
        registry.get_or_create_cached_value(&holder, &key_b, fixed_provider(2, runs.clone()));
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_foreign_registry_site_rebuilt() {
        let holder = Arc::new(UserDataHost::new());
        let key = SlotKey::new("foreign");
        let runs = Arc::new(StdAtomicU64::new(0));

        let first_registry = CacheRegistry::new();
        first_registry.get_or_create_cached_value(&holder, &key, fixed_provider(1, runs.clone()));

        let second_registry = CacheRegistry::new();
        let value =
            second_registry.get_or_create_cached_value(&holder, &key, fixed_provider(2, runs.clone()));
        assert_eq!(value, Some(2));
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_mistyped_slot_cleared_and_rebuilt() {
        let registry = CacheRegistry::new();
        let holder = Arc::new(UserDataHost::new());
        let key = SlotKey::new("mistyped");
        holder.put_user_slot_if_absent(&key, Arc::new(42_u8));

        let runs = Arc::new(StdAtomicU64::new(0));
        let value = registry.get_or_create_cached_value(&holder, &key, fixed_provider(3, runs.clone()));
        assert_eq!(value, Some(3));
    }

    #[test]
    fn test_clear_all_resets_tracking() {
        let registry = CacheRegistry::new();
        let holder = Arc::new(UserDataHost::new());
        let key = SlotKey::new("clear");
        let runs = Arc::new(StdAtomicU64::new(0));

        registry.get_or_create_cached_value(&holder, &key, fixed_provider(1, runs.clone()));
        assert_eq!(registry.tracked_holders(), 1);

        registry.clear_all();
        assert_eq!(registry.tracked_holders(), 0);
        assert!(holder.get_user_slot(&key).is_none());

        registry.get_or_create_cached_value(&holder, &key, fixed_provider(1, runs.clone()));
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_clear_all_tolerates_dead_holders() {
        let registry = CacheRegistry::new();
        let key = SlotKey::new("dead-holder");
        let runs = Arc::new(StdAtomicU64::new(0));

        {
            let holder = Arc::new(UserDataHost::new());
            registry.get_or_create_cached_value(&holder, &key, fixed_provider(1, runs.clone()));
        }
        registry.clear_all();
        assert_eq!(registry.tracked_holders(), 0);
    }

    #[test]
    fn test_opted_out_holder_not_tracked() {
        struct Untracked(UserDataHost);
        impl UserDataHolder for Untracked {
            fn get_user_slot(&self, key: &SlotKey) -> Option<Arc<dyn Any + Send + Sync>> {
                self.0.get_user_slot(key)
            }
            fn put_user_slot_if_absent(
                &self,
                key: &SlotKey,
                value: Arc<dyn Any + Send + Sync>,
            ) -> Arc<dyn Any + Send + Sync> {
                self.0.put_user_slot_if_absent(key, value)
            }
            fn clear_user_slot(&self, key: &SlotKey) {
                self.0.clear_user_slot(key)
            }
            fn tracked_for_bulk_clear(&self) -> bool {
                false
            }
        }

        let registry = CacheRegistry::new();
        let holder = Arc::new(Untracked(UserDataHost::new()));
        let key = SlotKey::new("untracked");
        let runs = Arc::new(StdAtomicU64::new(0));
        registry.get_or_create_cached_value(&holder, &key, fixed_provider(1, runs));
        assert_eq!(registry.tracked_holders(), 0);
    }

    #[test]
    fn test_parameterized_value_shared_across_params() {
        let registry = CacheRegistry::new();
        let holder = Arc::new(UserDataHost::new());
        let key = SlotKey::new("parameterized");
        let counter = Arc::new(VersionCounter::new());

        let source = counter.clone();
        let provider = move |param: &i64| {
            ProviderResult::new(
                source.version() + param,
                vec![Dependency::versioned(source.clone())],
            )
        };

        let first = registry
            .get_or_create_parameterized_cached_value(&holder, &key, provider.clone(), &10);
        assert_eq!(first, Some(10));

        // Still cached: the new parameter is not consulted.
        let second = registry
            .get_or_create_parameterized_cached_value(&holder, &key, provider.clone(), &20);
        assert_eq!(second, Some(10));

        counter.increment();
        let third =
            registry.get_or_create_parameterized_cached_value(&holder, &key, provider, &20);
        assert_eq!(third, Some(21));
    }
}
