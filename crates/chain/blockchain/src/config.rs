//! Chain manager configuration.

use alloy_primitives::B256;
use meridian_executor::FeeDistributionConfig;
use meridian_prefetch::PrefetchConfig;
use serde::{Deserialize, Serialize};

/// Default number of trailing blocks whose state is kept available.
pub const DEFAULT_STATE_HISTORY: u64 = 128;

/// Default distance behind the head at which canonical blocks move to the ancient tier.
pub const DEFAULT_FREEZER_THRESHOLD: u64 = 90_000;

/// How states are keyed in the state store.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StateScheme {
    /// Nodes keyed by hash.
    #[default]
    Hash,
    /// Nodes keyed by path. Keeps one extra state in memory for the head.
    Path,
}

/// Sizes of the in-memory caches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CacheConfig {
    /// Headers by hash.
    pub headers: usize,
    /// Total difficulties by hash.
    pub tds: usize,
    /// Block numbers by hash.
    pub numbers: usize,
    /// Bodies by hash.
    pub bodies: usize,
    /// Receipts by hash.
    pub receipts: usize,
    /// Known invalid blocks.
    pub invalid_blocks: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            headers: 512,
            tds: 1024,
            numbers: 2048,
            bodies: 256,
            receipts: 32,
            invalid_blocks: 256,
        }
    }
}

/// Configuration of a [`BlockChain`](crate::BlockChain).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BlockchainConfig {
    /// Number of trailing blocks whose state stays available.
    pub state_history: u64,
    /// State key scheme.
    pub state_scheme: StateScheme,
    /// Keeps every state forever.
    pub archive: bool,
    /// Persists the state of every block whose number is a multiple of this value.
    pub flush_interval: Option<u64>,
    /// Maximum number of side blocks held for deferred execution.
    pub buffer_limit: usize,
    /// Distance behind the head at which canonical blocks are frozen. `None` disables freezing.
    pub freezer_threshold: Option<u64>,
    /// Cache sizes.
    pub cache: CacheConfig,
    /// Trie prefetcher settings.
    pub prefetch: PrefetchConfig,
    /// Fee distribution settings.
    pub fee_distribution: FeeDistributionConfig,
    /// Block hashes rejected unconditionally.
    pub bad_hashes: Vec<B256>,
}

impl Default for BlockchainConfig {
    fn default() -> Self {
        Self {
            state_history: DEFAULT_STATE_HISTORY,
            state_scheme: StateScheme::default(),
            archive: false,
            flush_interval: None,
            buffer_limit: 256,
            freezer_threshold: Some(DEFAULT_FREEZER_THRESHOLD),
            cache: CacheConfig::default(),
            prefetch: PrefetchConfig::default(),
            fee_distribution: FeeDistributionConfig::default(),
            bad_hashes: Vec::new(),
        }
    }
}

impl BlockchainConfig {
    /// Sets the number of trailing blocks whose state stays available.
    pub const fn with_state_history(mut self, blocks: u64) -> Self {
        self.state_history = blocks;
        self
    }

    /// Sets the state key scheme.
    pub const fn with_state_scheme(mut self, scheme: StateScheme) -> Self {
        self.state_scheme = scheme;
        self
    }

    /// Enables or disables archive mode.
    pub const fn with_archive(mut self, archive: bool) -> Self {
        self.archive = archive;
        self
    }

    /// Sets the buffered block limit.
    pub const fn with_buffer_limit(mut self, limit: usize) -> Self {
        self.buffer_limit = limit;
        self
    }

    /// Sets the freezer threshold.
    pub const fn with_freezer_threshold(mut self, threshold: Option<u64>) -> Self {
        self.freezer_threshold = threshold;
        self
    }

    /// Sets the prefetcher settings.
    pub const fn with_prefetch(mut self, prefetch: PrefetchConfig) -> Self {
        self.prefetch = prefetch;
        self
    }

    /// Sets the fee distribution settings.
    pub fn with_fee_distribution(mut self, config: FeeDistributionConfig) -> Self {
        self.fee_distribution = config;
        self
    }

    /// Adds hashes to reject unconditionally.
    pub fn with_bad_hashes(mut self, hashes: impl IntoIterator<Item = B256>) -> Self {
        self.bad_hashes.extend(hashes);
        self
    }

    /// Number of trailing blocks whose state is retained, adjusted for the state scheme.
    pub const fn retention_window(&self) -> u64 {
        match self.state_scheme {
            StateScheme::Hash => self.state_history,
            StateScheme::Path => self.state_history + 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::hash(StateScheme::Hash, 128)]
    #[case::path(StateScheme::Path, 129)]
    fn test_retention_window(#[case] scheme: StateScheme, #[case] expected: u64) {
        let config = BlockchainConfig::default().with_state_scheme(scheme);
        assert_eq!(config.retention_window(), expected);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: BlockchainConfig =
            serde_json::from_str(r#"{ "stateHistory": 32, "cache": { "headers": 8 } }"#).unwrap();
        assert_eq!(config.state_history, 32);
        assert_eq!(config.cache.headers, 8);
        assert_eq!(config.cache.tds, CacheConfig::default().tds);
        assert_eq!(config.freezer_threshold, Some(DEFAULT_FREEZER_THRESHOLD));
        assert!(config.prefetch.enabled);
    }
}
