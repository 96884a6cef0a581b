//! Thread-safe string registries for hostile IPs and approved users.

use dashmap::DashSet;

/// A concurrent set of strings with idempotent add and remove.
#[derive(Debug, Default)]
pub struct Registry {
    entries: DashSet<String>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, value: &str) -> bool {
        self.entries.contains(value)
    }

    /// Add `value`. Returns `true` if it was not already present.
    pub fn record(&self, value: &str) -> bool {
        self.entries.insert(value.to_string())
    }

    /// Remove `value`. Returns `true` if it was present.
    pub fn forget(&self, value: &str) -> bool {
        self.entries.remove(value).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
