use std::collections::HashMap;
use std::num::NonZeroU64;
use std::time::Duration;

/// Requests allowed per window, and how long to block once that is exceeded.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Quota {
    limit: NonZeroU64,
    block: Duration,
}

impl Quota {
    /// Creates a new `Quota`.
    ///
    /// # Arguments
    ///
    /// * `limit` - The maximum number of requests admitted within a single window.
    /// * `block` - How long an identifier is denied after exceeding `limit`.
    ///   A zero duration means no block is imposed.
    pub const fn new(limit: NonZeroU64, block: Duration) -> Self {
        Self { limit, block }
    }

    pub fn limit(&self) -> u64 {
        self.limit.get()
    }

    pub fn block(&self) -> Duration {
        self.block
    }
}

/// The quota table: a default plus per-identifier overrides.
///
/// Overrides replace the default outright, there is no merging of fields.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Quotas {
    default: Quota,
    overrides: HashMap<String, Quota>,
}

impl Quotas {
    pub fn new(default: Quota) -> Self {
        Self {
            default,
            overrides: HashMap::new(),
        }
    }

    /// Register a quota for a specific identifier, replacing any earlier one.
    pub fn with_override(mut self, identifier: impl Into<String>, quota: Quota) -> Self {
        self.overrides.insert(identifier.into(), quota);
        self
    }

    pub fn default_quota(&self) -> &Quota {
        &self.default
    }

    pub fn overrides(&self) -> &HashMap<String, Quota> {
        &self.overrides
    }

    /// The quota in force for `identifier`.
    pub fn resolve(&self, identifier: &str) -> &Quota {
        self.overrides.get(identifier).unwrap_or(&self.default)
    }
}

impl Extend<(String, Quota)> for Quotas {
    fn extend<T: IntoIterator<Item = (String, Quota)>>(&mut self, iter: T) {
        self.overrides.extend(iter);
    }
}
