use alloy_primitives::{Address, B256};
use meridian_storage::{AccountTrie, StateStore, StorageError, StorageTrie};

/// Identifies a trie: the account trie of a state, or the storage trie of one account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TrieId {
    /// Root of the state the trie belongs to.
    pub state_root: B256,
    /// Owner of a storage trie, `None` for the account trie.
    pub owner: Option<Address>,
    /// Root of the trie itself.
    pub root: B256,
}

impl TrieId {
    /// The account trie of `state_root`.
    pub const fn account(state_root: B256) -> Self {
        Self { state_root, owner: None, root: state_root }
    }

    /// The storage trie of `owner` in `state_root`.
    pub const fn storage(state_root: B256, owner: Address, root: B256) -> Self {
        Self { state_root, owner: Some(owner), root }
    }

    pub(crate) fn open(&self, store: &dyn StateStore) -> Result<PrefetchedTrie, StorageError> {
        match self.owner {
            None => store.open_trie(self.root).map(PrefetchedTrie::Account),
            Some(owner) => {
                store.open_storage_trie(self.state_root, owner, self.root).map(PrefetchedTrie::Storage)
            }
        }
    }
}

/// A key to load into a trie.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrefetchKey {
    /// An account in the account trie.
    Account(Address),
    /// A slot in a storage trie.
    Slot(B256),
}

/// A trie handle warmed by the prefetcher.
#[derive(Debug, Clone)]
pub enum PrefetchedTrie {
    /// Account trie.
    Account(AccountTrie),
    /// Storage trie.
    Storage(StorageTrie),
}

impl PrefetchedTrie {
    /// Loads `key`. Keys of the wrong kind are ignored.
    pub(crate) fn load(&self, key: &PrefetchKey) {
        match (self, key) {
            (Self::Account(trie), PrefetchKey::Account(address)) => {
                trie.account(address);
            }
            (Self::Storage(trie), PrefetchKey::Slot(slot)) => {
                trie.slot(slot);
            }
            _ => {}
        }
    }

    /// Returns the account trie, if this is one.
    pub fn into_account(self) -> Option<AccountTrie> {
        match self {
            Self::Account(trie) => Some(trie),
            Self::Storage(_) => None,
        }
    }

    /// Returns the storage trie, if this is one.
    pub fn into_storage(self) -> Option<StorageTrie> {
        match self {
            Self::Storage(trie) => Some(trie),
            Self::Account(_) => None,
        }
    }
}
