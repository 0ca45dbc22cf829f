#![doc = include_str!("../README.md")]
//!
//! ---
//!
//! # Code Reference
//!
//! This section provides quick code examples and API references for the main
//! building blocks.
//!
//! ## Choosing an Entry Point
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                  Which API Should I Use?                             │
//! ├──────────────────────────────────────────────────────────────────────┤
//! │                                                                      │
//! │  Do many objects each carry their own cached value under a          │
//! │  shared key?                                                         │
//! │        │                                                             │
//! │   Yes  │  No                                                         │
//! │    │   │                                                             │
//! │    ▼   ▼                                                             │
//! │  ┌──────────────┐   ┌──────────────┐                                │
//! │  │CacheRegistry │   │  CacheCore   │                                │
//! │  │ + SlotKey    │   │ (standalone) │                                │
//! │  └──────────────┘   └──────┬───────┘                                │
//! │                            │                                         │
//! │        Does the provider need caller context per call?              │
//! │                       Yes  │  No                                     │
//! │                        │   │                                         │
//! │                        ▼   ▼                                         │
//! │        ┌───────────────────────┐  ┌───────────┐                     │
//! │        │ParameterizedCacheCore │  │ CacheCore │                     │
//! │        └───────────────────────┘  └───────────┘                     │
//! │                                                                      │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Reference
//!
//! | Type | Description | Best Use Case |
//! |------|-------------|---------------|
//! | [`CacheCore`] | One memoized computation | A value derived from versioned inputs |
//! | [`ParameterizedCacheCore`] | Memoized computation with a call parameter | Threading a session/context into the provider |
//! | [`CacheRegistry`] | Named cache sites on holder objects | Many holders, shared keys, bulk invalidation |
//! | [`Dependency`] | What a cached value depends on | Version counters, nested entries, groups |
//! | [`CountingProfiler`] | Read/reject/invalidation counters | Tests and diagnostics |
//!
//! ## Code Examples
//!
//! ### Standalone cache site
//!
//! A [`CacheCore`] memoizes one provider. The provider declares its
//! dependencies; the value stays cached until one of them changes.
//!
//! ```rust
//! use depcache_rs::{CacheCore, Dependency, ProviderResult, VersionCounter};
//! use std::sync::Arc;
//!
//! let schema_version = Arc::new(VersionCounter::new());
//! let source = schema_version.clone();
//! let plan = CacheCore::new(move || {
//!     let plan = format!("plan@{}", source.version());
//!     ProviderResult::new(plan, vec![Dependency::versioned(source.clone())])
//! });
//!
//! assert_eq!(plan.get_value(), Some("plan@0".to_string()));
//! assert_eq!(plan.get_value(), Some("plan@0".to_string())); // cached
//!
//! schema_version.increment();
//! assert_eq!(plan.get_value(), Some("plan@1".to_string())); // recomputed
//! ```
//!
//! ### Registry with holder objects
//!
//! A [`CacheRegistry`] attaches cache sites to arbitrary holder objects under
//! [`SlotKey`]s, creating each site once and supporting bulk invalidation.
//!
//! ```rust
//! use depcache_rs::{
//!     CacheRegistry, Dependency, ProviderResult, SlotKey, UserDataHost, VersionCounter,
//! };
//! use std::sync::Arc;
//!
//! let registry = CacheRegistry::new();
//! let key = SlotKey::new("line-count");
//! let document = Arc::new(UserDataHost::new());
//!
//! let edits = Arc::new(VersionCounter::new());
//! let source = edits.clone();
//! let count = registry.get_or_create_cached_value(&document, &key, move || {
//!     ProviderResult::new(source.version(), vec![Dependency::versioned(source.clone())])
//! });
//! assert_eq!(count, Some(0));
//!
//! registry.clear_all(); // drops every tracked site; next read recomputes
//! ```
//!
//! ### Nesting cache sites
//!
//! A cached entry can itself be a dependency of another site: the outer value
//! is fresh only while the inner entry is.
//!
//! ```rust
//! use depcache_rs::{CacheCore, Dependency, ProviderResult, VersionCounter};
//! use std::sync::Arc;
//!
//! let counter = Arc::new(VersionCounter::new());
//! let source = counter.clone();
//! let inner = Arc::new(CacheCore::new(move || {
//!     ProviderResult::new(source.version(), vec![Dependency::versioned(source.clone())])
//! }));
//!
//! inner.get_value();
//! let inner_entry = inner.cached_entry().unwrap();
//! let outer = CacheCore::new(move || {
//!     ProviderResult::new((), vec![Dependency::nested(inner_entry.clone())])
//! });
//! outer.get_value();
//!
//! counter.increment(); // invalidates inner, therefore outer
//! assert!(!outer.has_up_to_date_value());
//! ```
//!
//! ## Read Protocol
//!
//! Computation always runs outside any lock; only the install of a fresh
//! entry is serialized:
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────────┐
//! │  thread A                    slot                    thread B      │
//! │                                                                    │
//! │  snapshot ───────────────▶ (empty) ◀─────────────── snapshot       │
//! │  compute entry A                                    compute entry B│
//! │  lock, slot == snapshot?                                           │
//! │     yes ─▶ install A ────▶ [ A ]                                   │
//! │                                     lock, slot == snapshot? no     │
//! │                                     A up to date? yes              │
//! │                                     reject B, serve A ◀────────────│
//! └────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Redundant computation is expected under contention; exactly one entry
//! becomes visible and the losers are discarded with a profiler notification.
//!
//! ## Modules
//!
//! - [`mod@dep`]: Dependency declarations and version tracking
//! - [`mod@entry`]: The immutable cache entry (value + dependency stamps)
//! - [`mod@site`]: Cache sites and the optimistic install protocol
//! - [`mod@registry`]: Named cache sites on holder objects, bulk invalidation
//! - [`mod@recursion`]: Reentrancy detection and caching suppression
//! - [`mod@stability`]: Debug-only provider equivalence checking
//! - [`mod@profiler`]: Cache event counters
//! - [`mod@config`]: Configuration knobs

/// Dependency declarations and version tracking.
///
/// Provides the [`Dependency`] enum, the [`VersionedResource`] and
/// [`EntryValidity`] traits, and the ready-made [`VersionCounter`],
/// [`NeverChanged`] and [`AlwaysChanged`] sources.
pub mod dep;

/// The immutable cache entry: a value paired with the dependency stamps it
/// was computed against.
pub mod entry;

/// Cache event counters.
///
/// Provides the [`ProfilerTracker`] trait and the [`CountingProfiler`]
/// implementation used by tests and diagnostics.
pub mod profiler;

/// Provider contracts.
///
/// Providers are the memoized computations; plain closures qualify via
/// blanket implementations.
pub mod provider;

/// Reentrancy detection.
///
/// Tracks in-flight computations per thread and suppresses caching for
/// values computed inside a dependency cycle.
pub mod recursion;

/// Cache sites and the optimistic install protocol.
///
/// Provides [`CacheCore`] and [`ParameterizedCacheCore`].
pub mod site;

/// Named cache sites on holder objects.
///
/// Provides [`CacheRegistry`], [`SlotKey`], and the [`UserDataHolder`]
/// storage contract with its [`UserDataHost`] implementation.
pub mod registry;

/// Debug-only provider equivalence checking.
///
/// Catches providers that capture different state for the same cache key.
pub mod stability;

/// Configuration knobs for registries and standalone sites.
pub mod config;

// Re-export cache site types
pub use site::{CacheCore, ParameterizedCacheCore};

// Re-export registry types
pub use registry::{CacheRegistry, SlotKey, UserDataHolder, UserDataHost};

// Re-export dependency types
pub use dep::{
    AlwaysChanged, Dependency, DependencySource, EntryValidity, NeverChanged, VersionCounter,
    VersionedResource,
};

// Re-export entry and provider types
pub use entry::CacheEntry;
pub use provider::{CacheProvider, ParameterizedCacheProvider, ProviderResult};

// Re-export recursion guard surface
pub use recursion::{mark_stack, StackStamp};

// Re-export diagnostics types
pub use config::CacheConfig;
pub use profiler::{CountingProfiler, ProfilerTracker};
pub use stability::{CapturedField, FieldValue, Inspectable, ProviderStabilityChecker, ProviderView};
