//! Cache Provider Contracts
//!
//! A provider is the expensive, side-effect-free computation a cache site
//! memoizes. It returns a [`ProviderResult`]: the computed value (possibly
//! absent) together with everything the value depends on. The engine flattens
//! and stamps the declared dependencies when it builds the cache entry.
//!
//! Plain closures of the right shape are providers out of the box:
//!
//! ```
//! use depcache_rs::{CacheCore, Dependency, ProviderResult, VersionCounter};
//! use std::sync::Arc;
//!
//! let counter = Arc::new(VersionCounter::new());
//! let dep_source = counter.clone();
//! let cache = CacheCore::new(move || {
//!     ProviderResult::new(dep_source.version() * 2, vec![Dependency::versioned(dep_source.clone())])
//! });
//! assert_eq!(cache.get_value(), Some(0));
//! ```
//!
//! Struct providers can additionally implement [`Inspectable`] to opt into
//! the debug-only stability check (see the `stability` module).

use crate::dep::Dependency;
use crate::stability::Inspectable;

/// The outcome of one provider computation: an optional value plus the
/// dependency list the value was derived from.
#[derive(Debug)]
pub struct ProviderResult<T> {
    value: Option<T>,
    dependencies: Vec<Dependency>,
}

impl<T> ProviderResult<T> {
    /// A result carrying a value.
    pub fn new(value: T, dependencies: Vec<Dependency>) -> Self {
        Self {
            value: Some(value),
            dependencies,
        }
    }

    /// A result signaling "no value", still guarded by dependencies so the
    /// absence itself is cached and invalidated like any value.
    pub fn without_value(dependencies: Vec<Dependency>) -> Self {
        Self {
            value: None,
            dependencies,
        }
    }

    pub(crate) fn into_parts(self) -> (Option<T>, Vec<Dependency>) {
        (self.value, self.dependencies)
    }
}

/// A memoizable computation.
///
/// Providers must be side-effect-free and deterministic with respect to their
/// declared dependencies: running the provider twice without a dependency
/// change must produce equivalent results. A provider that panics propagates
/// the panic to the caller; nothing is cached.
pub trait CacheProvider<T>: Send + Sync {
    /// Runs the computation.
    fn compute(&self) -> ProviderResult<T>;

    /// The provider's type name, used for diagnostics and the stability
    /// check's closure heuristic.
    fn type_label(&self) -> &'static str;

    /// Structural view of the provider's captured state for the debug-only
    /// stability check. `None` (the default) means the provider is opaque
    /// and cannot be cross-checked.
    fn inspect(&self) -> Option<&dyn Inspectable> {
        None
    }
}

impl<T, F> CacheProvider<T> for F
where
    F: Fn() -> ProviderResult<T> + Send + Sync,
{
    fn compute(&self) -> ProviderResult<T> {
        self()
    }

    fn type_label(&self) -> &'static str {
        std::any::type_name::<F>()
    }
}

/// A memoizable computation taking one caller-supplied parameter.
///
/// The parameter must be effectively constant for a given cache site: the
/// cached value is shared across calls, so two callers passing parameters
/// that change the result would corrupt each other. The stability check
/// exists to catch exactly that class of bug for captured state; parameters
/// deserve the same discipline.
pub trait ParameterizedCacheProvider<P, T>: Send + Sync {
    /// Runs the computation for `param`.
    fn compute(&self, param: &P) -> ProviderResult<T>;

    /// The provider's type name, see [`CacheProvider::type_label`].
    fn type_label(&self) -> &'static str;

    /// Structural view of captured state, see [`CacheProvider::inspect`].
    fn inspect(&self) -> Option<&dyn Inspectable> {
        None
    }
}

impl<P, T, F> ParameterizedCacheProvider<P, T> for F
where
    F: Fn(&P) -> ProviderResult<T> + Send + Sync,
{
    fn compute(&self, param: &P) -> ProviderResult<T> {
        self(param)
    }

    fn type_label(&self) -> &'static str {
        std::any::type_name::<F>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closure_is_a_provider() {
        let provider = || ProviderResult::new(5, Vec::new());
        let (value, deps) = CacheProvider::compute(&provider).into_parts();
        assert_eq!(value, Some(5));
        assert!(deps.is_empty());
        assert!(CacheProvider::<i32>::type_label(&provider).contains("closure"));
    }

    #[test]
    fn test_result_without_value() {
        let result: ProviderResult<String> = ProviderResult::without_value(Vec::new());
        let (value, _) = result.into_parts();
        assert_eq!(value, None);
    }

    #[test]
    fn test_parameterized_closure_is_a_provider() {
        let provider = |param: &i32| ProviderResult::new(param * 3, Vec::new());
        let (value, _) = provider.compute(&4).into_parts();
        assert_eq!(value, Some(12));
    }
}
