//! Feature flags consulted by the sync services.

use std::collections::{BTreeSet, HashMap};

/// Whether stops are cached locally at all. Defaults to `true`.
pub const LOCAL_CACHING_ENABLED: &str = "stops.local_caching_enabled";

/// Comma-separated stop ids that are cached even when local caching is
/// disabled.
pub const HIGH_PRIORITY_STOP_IDS: &str = "stops.high_priority_ids";

/// Read-only view of remotely configured flags.
///
/// Implementations return `None` for unknown keys; callers apply their own
/// defaults.
pub trait FeatureFlags: Send + Sync {
    /// Read a boolean flag.
    fn bool_flag(&self, key: &str) -> Option<bool>;

    /// Read a string flag.
    fn string_flag(&self, key: &str) -> Option<String>;

    /// Read a numeric flag.
    fn number_flag(&self, key: &str) -> Option<f64>;
}

/// In-memory [`FeatureFlags`] populated up front.
///
/// # Examples
///
/// ```
/// use transit_data::flags::{FeatureFlags, LOCAL_CACHING_ENABLED, StaticFeatureFlags};
///
/// let flags = StaticFeatureFlags::default().with_bool(LOCAL_CACHING_ENABLED, false);
/// assert_eq!(flags.bool_flag(LOCAL_CACHING_ENABLED), Some(false));
/// assert_eq!(flags.string_flag("missing"), None);
/// ```
#[derive(Debug, Clone, Default)]
pub struct StaticFeatureFlags {
    bools: HashMap<String, bool>,
    strings: HashMap<String, String>,
    numbers: HashMap<String, f64>,
}

impl StaticFeatureFlags {
    /// Set a boolean flag.
    #[must_use]
    pub fn with_bool(mut self, key: impl Into<String>, value: bool) -> Self {
        self.bools.insert(key.into(), value);
        self
    }

    /// Set a string flag.
    #[must_use]
    pub fn with_string(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.strings.insert(key.into(), value.into());
        self
    }

    /// Set a numeric flag.
    #[must_use]
    pub fn with_number(mut self, key: impl Into<String>, value: f64) -> Self {
        self.numbers.insert(key.into(), value);
        self
    }
}

impl FeatureFlags for StaticFeatureFlags {
    fn bool_flag(&self, key: &str) -> Option<bool> {
        self.bools.get(key).copied()
    }

    fn string_flag(&self, key: &str) -> Option<String> {
        self.strings.get(key).cloned()
    }

    fn number_flag(&self, key: &str) -> Option<f64> {
        self.numbers.get(key).copied()
    }
}

/// Which stops a sync may write, derived from the caching flags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StopCachingPolicy {
    /// Whether every stop is cached.
    pub caching_enabled: bool,
    /// Stops cached regardless of `caching_enabled`.
    pub priority_ids: BTreeSet<String>,
}

impl StopCachingPolicy {
    /// Read the policy from `flags`.
    pub fn from_flags(flags: &dyn FeatureFlags) -> Self {
        let priority_ids = flags
            .string_flag(HIGH_PRIORITY_STOP_IDS)
            .map(|joined| {
                joined
                    .split(',')
                    .map(str::trim)
                    .filter(|id| !id.is_empty())
                    .map(str::to_owned)
                    .collect()
            })
            .unwrap_or_default();
        Self {
            caching_enabled: flags.bool_flag(LOCAL_CACHING_ENABLED).unwrap_or(true),
            priority_ids,
        }
    }

    /// Whether this policy leaves nothing to sync.
    #[must_use]
    pub fn is_disabled(&self) -> bool {
        !self.caching_enabled && self.priority_ids.is_empty()
    }

    /// Whether the stop with `stop_id` may be written.
    #[must_use]
    pub fn admits(&self, stop_id: &str) -> bool {
        self.caching_enabled || self.priority_ids.contains(stop_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn caching_defaults_to_enabled() {
        let policy = StopCachingPolicy::from_flags(&StaticFeatureFlags::default());
        assert!(policy.caching_enabled);
        assert!(!policy.is_disabled());
        assert!(policy.admits("anything"));
    }

    #[rstest]
    fn priority_list_is_trimmed_and_deduplicated() {
        let flags = StaticFeatureFlags::default()
            .with_bool(LOCAL_CACHING_ENABLED, false)
            .with_string(HIGH_PRIORITY_STOP_IDS, " a, b ,,a ");
        let policy = StopCachingPolicy::from_flags(&flags);

        assert_eq!(
            policy.priority_ids,
            BTreeSet::from(["a".to_owned(), "b".to_owned()])
        );
        assert!(policy.admits("a"));
        assert!(!policy.admits("c"));
    }

    #[rstest]
    #[case(None)]
    #[case(Some(" , "))]
    fn disabled_without_priority_stops(#[case] priority: Option<&str>) {
        let mut flags = StaticFeatureFlags::default().with_bool(LOCAL_CACHING_ENABLED, false);
        if let Some(ids) = priority {
            flags = flags.with_string(HIGH_PRIORITY_STOP_IDS, ids);
        }
        assert!(StopCachingPolicy::from_flags(&flags).is_disabled());
    }

    #[rstest]
    fn number_flags_are_returned() {
        let flags = StaticFeatureFlags::default().with_number("sync.max_age_hours", 24.0);
        assert_eq!(flags.number_flag("sync.max_age_hours"), Some(24.0));
    }
}
