//! Reference-counted in-memory state store.

use crate::{
    AccountTrie, StateCommit, StateSnapshot, StateStore, StorageError, StorageSlots, StorageTrie,
};
use alloy_primitives::{Address, B256, Bytes};
use meridian_primitives::EMPTY_ROOT_HASH;
use parking_lot::RwLock;
use std::{collections::HashMap, sync::Arc, time::Duration};
use tracing::trace;

#[derive(Debug)]
struct StateEntry {
    snapshot: Arc<StateSnapshot>,
    refs: u64,
    persisted: bool,
}

#[derive(Debug, Default)]
struct Inner {
    states: HashMap<B256, StateEntry>,
    codes: HashMap<B256, Bytes>,
}

/// A [`StateStore`] keeping every state in memory.
///
/// Released states vanish from the store, but readers already holding a trie handle keep their
/// snapshot alive until the handle is dropped.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    inner: RwLock<Inner>,
    latency: Option<Duration>,
}

impl MemoryStateStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every cold trie read sleep for `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Drops every state that was not persisted, as a process restart would.
    pub fn drop_dirty(&self) -> usize {
        let mut inner = self.inner.write();
        let before = inner.states.len();
        inner.states.retain(|_, entry| entry.persisted);
        before - inner.states.len()
    }

    /// Current reference count of `root`.
    pub fn refs(&self, root: &B256) -> Option<u64> {
        self.inner.read().states.get(root).map(|entry| entry.refs)
    }

    /// Returns true if `root` is persisted.
    pub fn is_persisted(&self, root: &B256) -> bool {
        self.inner.read().states.get(root).is_some_and(|entry| entry.persisted)
    }

    fn snapshot(&self, root: B256) -> Result<Arc<StateSnapshot>, StorageError> {
        if root == EMPTY_ROOT_HASH {
            return Ok(Arc::new(StateSnapshot::empty()));
        }
        self.inner
            .read()
            .states
            .get(&root)
            .map(|entry| entry.snapshot.clone())
            .ok_or(StorageError::MissingTrieNode(root))
    }
}

impl StateStore for MemoryStateStore {
    fn open_trie(&self, root: B256) -> Result<AccountTrie, StorageError> {
        Ok(AccountTrie::new(self.snapshot(root)?, self.latency))
    }

    fn open_storage_trie(
        &self,
        state_root: B256,
        owner: Address,
        root: B256,
    ) -> Result<StorageTrie, StorageError> {
        let snapshot = self.snapshot(state_root)?;
        let found = snapshot.accounts.get(&owner).map_or(EMPTY_ROOT_HASH, |a| a.storage_root);
        if found != root {
            return Err(StorageError::StorageRootMismatch { owner, expected: root, found });
        }
        let slots =
            snapshot.storage.get(&owner).cloned().unwrap_or_else(|| Arc::new(StorageSlots::new()));
        Ok(StorageTrie::new(owner, root, slots, self.latency))
    }

    fn code(&self, hash: &B256) -> Option<Bytes> {
        self.inner.read().codes.get(hash).cloned()
    }

    fn commit(&self, commit: StateCommit) -> Result<B256, StorageError> {
        let root = commit.root();
        let mut inner = self.inner.write();
        for (hash, code) in commit.codes {
            inner.codes.entry(hash).or_insert(code);
        }
        if root != EMPTY_ROOT_HASH {
            inner.states.entry(root).or_insert_with(|| StateEntry {
                snapshot: Arc::new(commit.snapshot),
                refs: 0,
                persisted: false,
            });
        }
        trace!(target: "storage", %root, "Committed state");
        Ok(root)
    }

    fn reference(&self, root: B256) {
        if let Some(entry) = self.inner.write().states.get_mut(&root) {
            entry.refs += 1;
        }
    }

    fn dereference(&self, root: B256) {
        let mut inner = self.inner.write();
        let Some(entry) = inner.states.get_mut(&root) else { return };
        entry.refs = entry.refs.saturating_sub(1);
        if entry.refs == 0 && !entry.persisted {
            inner.states.remove(&root);
            trace!(target: "storage", %root, "Released state");
        }
    }

    fn persist(&self, root: B256) -> Result<(), StorageError> {
        if root == EMPTY_ROOT_HASH {
            return Ok(());
        }
        let mut inner = self.inner.write();
        let entry = inner.states.get_mut(&root).ok_or(StorageError::MissingTrieNode(root))?;
        entry.persisted = true;
        Ok(())
    }

    fn has_state(&self, root: &B256) -> bool {
        *root == EMPTY_ROOT_HASH || self.inner.read().states.contains_key(root)
    }

    fn dirty_len(&self) -> usize {
        self.inner.read().states.values().filter(|entry| !entry.persisted).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::U256;
    use meridian_primitives::{Account, proofs};
    use std::collections::BTreeMap;

    fn commit_with_balance(balance: u64) -> StateCommit {
        let address = Address::with_last_byte(1);
        let slot = B256::with_last_byte(1);
        let slots = Arc::new(BTreeMap::from([(slot, U256::from(balance))]));
        let storage_root = proofs::storage_root(slots.iter());
        let account = Account { storage_root, ..Account::with_balance(U256::from(balance)) };
        let accounts = BTreeMap::from([(address, account)]);
        let root = proofs::state_root(accounts.iter());
        StateCommit {
            snapshot: StateSnapshot { root, accounts, storage: BTreeMap::from([(address, slots)]) },
            codes: Vec::new(),
        }
    }

    #[test]
    fn test_reference_counting_releases_dirty_state() {
        let store = MemoryStateStore::new();
        let root = store.commit(commit_with_balance(1)).unwrap();
        store.reference(root);
        store.reference(root);
        store.dereference(root);
        assert!(store.has_state(&root));
        store.dereference(root);
        assert!(!store.has_state(&root));
    }

    #[test]
    fn test_persisted_state_is_never_released() {
        let store = MemoryStateStore::new();
        let root = store.commit(commit_with_balance(1)).unwrap();
        store.reference(root);
        store.persist(root).unwrap();
        store.dereference(root);
        assert!(store.has_state(&root));
        assert_eq!(store.drop_dirty(), 0);
        assert_eq!(store.dirty_len(), 0);
    }

    #[test]
    fn test_live_handle_outlives_release() {
        let store = MemoryStateStore::new();
        let root = store.commit(commit_with_balance(7)).unwrap();
        store.reference(root);
        let trie = store.open_trie(root).unwrap();
        store.dereference(root);
        assert!(!store.has_state(&root));
        let account = trie.account(&Address::with_last_byte(1)).unwrap();
        assert_eq!(account.balance, U256::from(7));
    }

    #[test]
    fn test_open_storage_trie() {
        let store = MemoryStateStore::new();
        let commit = commit_with_balance(3);
        let owner = Address::with_last_byte(1);
        let storage_root = commit.snapshot.accounts[&owner].storage_root;
        let root = store.commit(commit).unwrap();

        let trie = store.open_storage_trie(root, owner, storage_root).unwrap();
        assert_eq!(trie.slot(&B256::with_last_byte(1)), U256::from(3));
        assert!(trie.is_warm(&B256::with_last_byte(1)));
        assert!(matches!(
            store.open_storage_trie(root, owner, EMPTY_ROOT_HASH),
            Err(StorageError::StorageRootMismatch { .. })
        ));
        assert_eq!(store.open_trie(B256::with_last_byte(9)).unwrap_err(), StorageError::MissingTrieNode(B256::with_last_byte(9)));
    }
}
