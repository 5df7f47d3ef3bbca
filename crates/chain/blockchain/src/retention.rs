//! Trailing-window retention of executed states.

use crate::{BlockchainConfig, metrics::Metrics};
use alloy_primitives::{B256, BlockNumber};
use meridian_storage::{StateStore, StorageError};
use std::{
    collections::{BTreeMap, HashSet},
    sync::Arc,
};
use tracing::{debug, trace};

/// Holds a reference on the state of every recently executed block.
///
/// States of blocks at or below `head - window` are dereferenced on [`StateRetention::prune`],
/// which lets the state store release them. Roots still needed by buffered side chains are
/// held back until they are no longer protected. In archive mode nothing is released.
#[derive(Debug)]
pub struct StateRetention {
    store: Arc<dyn StateStore>,
    window: u64,
    archive: bool,
    flush_interval: Option<u64>,
    queue: BTreeMap<BlockNumber, Vec<(B256, B256)>>,
}

impl StateRetention {
    /// Creates the retention queue configured by `config`.
    pub fn new(store: Arc<dyn StateStore>, config: &BlockchainConfig) -> Self {
        Self {
            store,
            window: config.retention_window(),
            archive: config.archive,
            flush_interval: config.flush_interval.filter(|interval| *interval > 0),
            queue: BTreeMap::new(),
        }
    }

    /// Number of trailing blocks whose state is kept.
    pub const fn window(&self) -> u64 {
        self.window
    }

    /// References the state `root` of block `(number, hash)`.
    ///
    /// States falling on the flush interval are persisted.
    pub fn track(&mut self, number: BlockNumber, hash: B256, root: B256) -> Result<(), StorageError> {
        self.store.reference(root);
        self.queue.entry(number).or_default().push((hash, root));
        if self.archive || self.flush_interval.is_some_and(|interval| number % interval == 0) {
            self.store.persist(root)?;
            trace!(target: "blockchain", number, %root, "Persisted state");
        }
        Ok(())
    }

    /// Releases the states of blocks at or below `head - window`, except `protected` roots.
    ///
    /// Returns the number of released states.
    pub fn prune(&mut self, head: BlockNumber, protected: &HashSet<B256>) -> usize {
        if self.archive {
            return 0;
        }
        let Some(limit) = head.checked_sub(self.window) else { return 0 };

        let mut released = 0;
        let mut held = Vec::new();
        while let Some(entry) = self.queue.first_entry() {
            if *entry.key() > limit {
                break;
            }
            let number = *entry.key();
            for (hash, root) in entry.remove() {
                if protected.contains(&root) {
                    held.push((number, hash, root));
                    continue;
                }
                self.store.dereference(root);
                released += 1;
            }
        }
        for (number, hash, root) in held {
            self.queue.entry(number).or_default().push((hash, root));
        }

        if released > 0 {
            Metrics::record_pruned(released);
            debug!(target: "blockchain", head, limit, released, "Pruned states");
        }
        released
    }

    /// Drops the references of blocks above `number`, used when the chain is rewound.
    pub fn forget_above(&mut self, number: BlockNumber) {
        for (_, entries) in self.queue.split_off(&(number + 1)) {
            for (_, root) in entries {
                self.store.dereference(root);
            }
        }
    }

    /// Drops every reference.
    pub fn clear(&mut self) {
        for (_, entries) in std::mem::take(&mut self.queue) {
            for (_, root) in entries {
                self.store.dereference(root);
            }
        }
    }

    /// Number of tracked states.
    pub fn len(&self) -> usize {
        self.queue.values().map(Vec::len).sum()
    }

    /// Returns true if no state is tracked.
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::{Address, U256};
    use meridian_primitives::{Account, proofs};
    use meridian_storage::{MemoryStateStore, StateCommit, StateSnapshot};
    use rstest::rstest;

    fn commit(store: &MemoryStateStore, seed: u64) -> B256 {
        let accounts =
            BTreeMap::from([(Address::with_last_byte(1), Account::with_balance(U256::from(seed)))]);
        let root = proofs::state_root(accounts.iter());
        store
            .commit(StateCommit {
                snapshot: StateSnapshot { root, accounts, storage: BTreeMap::new() },
                codes: Vec::new(),
            })
            .unwrap()
    }

    fn retention(store: &Arc<MemoryStateStore>, config: BlockchainConfig) -> StateRetention {
        StateRetention::new(store.clone(), &config)
    }

    #[test]
    fn test_prune_window() {
        let store = Arc::new(MemoryStateStore::new());
        let mut retention = retention(&store, BlockchainConfig::default().with_state_history(4));
        let roots = (1..=10u64)
            .map(|number| {
                let root = commit(&store, number);
                retention.track(number, B256::with_last_byte(number as u8), root).unwrap();
                root
            })
            .collect::<Vec<_>>();

        assert_eq!(retention.prune(10, &HashSet::new()), 6);
        for (index, root) in roots.iter().enumerate() {
            assert_eq!(store.has_state(root), index + 1 > 6, "block {}", index + 1);
        }
        assert_eq!(retention.len(), 4);
    }

    #[test]
    fn test_protected_root_is_held() {
        let store = Arc::new(MemoryStateStore::new());
        let mut retention = retention(&store, BlockchainConfig::default().with_state_history(2));
        let roots = (1..=5u64)
            .map(|number| {
                let root = commit(&store, number);
                retention.track(number, B256::with_last_byte(number as u8), root).unwrap();
                root
            })
            .collect::<Vec<_>>();

        let protected = HashSet::from([roots[0]]);
        assert_eq!(retention.prune(5, &protected), 2);
        assert!(store.has_state(&roots[0]));
        assert!(!store.has_state(&roots[1]));

        assert_eq!(retention.prune(5, &HashSet::new()), 1);
        assert!(!store.has_state(&roots[0]));
    }

    #[rstest]
    #[case::archive(BlockchainConfig::default().with_state_history(1).with_archive(true), 0)]
    #[case::hash(BlockchainConfig::default().with_state_history(1), 2)]
    #[case::path(
        BlockchainConfig::default()
            .with_state_history(1)
            .with_state_scheme(crate::StateScheme::Path),
        1
    )]
    fn test_prune_modes(#[case] config: BlockchainConfig, #[case] released: usize) {
        let store = Arc::new(MemoryStateStore::new());
        let mut retention = retention(&store, config);
        for number in 1..=3u64 {
            retention.track(number, B256::with_last_byte(number as u8), commit(&store, number)).unwrap();
        }
        assert_eq!(retention.prune(3, &HashSet::new()), released);
    }

    #[test]
    fn test_shared_root_counted_per_block() {
        let store = Arc::new(MemoryStateStore::new());
        let mut retention = retention(&store, BlockchainConfig::default().with_state_history(1));
        let root = commit(&store, 1);
        retention.track(1, B256::with_last_byte(1), root).unwrap();
        retention.track(2, B256::with_last_byte(2), root).unwrap();

        retention.prune(2, &HashSet::new());
        assert!(store.has_state(&root));
        retention.forget_above(0);
        assert!(!store.has_state(&root));
        assert!(retention.is_empty());
    }

    #[test]
    fn test_flush_interval_persists() {
        let store = Arc::new(MemoryStateStore::new());
        let mut config = BlockchainConfig::default().with_state_history(1);
        config.flush_interval = Some(2);
        let mut retention = retention(&store, config);
        let roots = (1..=4u64)
            .map(|number| {
                let root = commit(&store, number);
                retention.track(number, B256::with_last_byte(number as u8), root).unwrap();
                root
            })
            .collect::<Vec<_>>();
        retention.prune(4, &HashSet::new());
        assert!(!store.has_state(&roots[0]));
        assert!(store.is_persisted(&roots[1]));
        assert!(store.has_state(&roots[1]));
    }
}
