//! Cache Configuration
//!
//! Configuration follows the public-field convention: create the struct with
//! all fields set, no builders. Both knobs are debug aids and default to off;
//! a production cache runs with `CacheConfig::default()`.
//!
//! # Examples
//!
//! ```
//! use depcache_rs::CacheConfig;
//!
//! let debug_config = CacheConfig {
//!     stability_checks: true,
//!     recheck_probability: 0.01,
//! };
//! assert!(debug_config.stability_checks);
//! ```

/// Debug and diagnostics knobs for a cache registry and its sites.
#[derive(Clone, Copy, Debug, Default)]
pub struct CacheConfig {
    /// Cross-check a replacement provider against the installed one when a
    /// stale cache site is re-requested. Defects are logged once per key and
    /// never alter behavior. Development builds only.
    pub stability_checks: bool,

    /// Probability, per up-to-date read, of re-running the provider purely to
    /// verify it still produces the same dependency fingerprint. Catches
    /// non-deterministic providers. `0.0` disables; keep small, every sampled
    /// read pays a full recomputation.
    pub recheck_probability: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_disables_debug_paths() {
        let config = CacheConfig::default();
        assert!(!config.stability_checks);
        assert_eq!(config.recheck_probability, 0.0);
    }
}
