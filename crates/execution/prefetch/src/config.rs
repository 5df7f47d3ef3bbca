use serde::{Deserialize, Serialize};

/// Tunables of the [`crate::TriePrefetcher`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PrefetchConfig {
    /// Whether block execution runs a prefetcher at all.
    pub enabled: bool,
    /// A batch with more keys than this is split across child workers.
    pub parallel_threshold: usize,
    /// Maximum number of keys handed to one child at a time.
    pub child_capacity: usize,
    /// Maximum number of children loading concurrently for one trie.
    pub max_children: usize,
}

impl Default for PrefetchConfig {
    fn default() -> Self {
        Self { enabled: true, parallel_threshold: 32, child_capacity: 16, max_children: 4 }
    }
}

impl PrefetchConfig {
    /// Sets whether the prefetcher runs.
    pub const fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Sets the fan-out threshold.
    pub const fn with_parallel_threshold(mut self, threshold: usize) -> Self {
        self.parallel_threshold = threshold;
        self
    }

    /// Sets the per-child capacity.
    pub const fn with_child_capacity(mut self, capacity: usize) -> Self {
        self.child_capacity = capacity;
        self
    }

    /// Sets the maximum number of concurrent children.
    pub const fn with_max_children(mut self, max: usize) -> Self {
        self.max_children = max;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: PrefetchConfig = serde_json::from_str(r#"{"maxChildren":8}"#).unwrap();
        assert_eq!(config, PrefetchConfig::default().with_max_children(8));
    }
}
