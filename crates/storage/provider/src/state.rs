//! State store interfaces and trie handles.

use crate::StorageError;
use alloy_primitives::{Address, B256, Bytes, U256};
use meridian_primitives::{Account, EMPTY_ROOT_HASH};
use parking_lot::Mutex;
use std::{
    collections::{BTreeMap, HashSet},
    sync::Arc,
    time::Duration,
};

/// Slots of a single storage trie, keyed by unhashed slot.
pub type StorageSlots = BTreeMap<B256, U256>;

/// The world state rooted at a single state root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateSnapshot {
    /// State root.
    pub root: B256,
    /// Every live account.
    pub accounts: BTreeMap<Address, Account>,
    /// Storage of every account with a non-empty storage trie.
    pub storage: BTreeMap<Address, Arc<StorageSlots>>,
}

impl StateSnapshot {
    /// The empty state.
    pub fn empty() -> Self {
        Self { root: EMPTY_ROOT_HASH, accounts: BTreeMap::new(), storage: BTreeMap::new() }
    }
}

/// The output of executing a block: the full post-state plus newly deployed code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateCommit {
    /// Post-state.
    pub snapshot: StateSnapshot,
    /// Code deployed by the block, keyed by code hash.
    pub codes: Vec<(B256, Bytes)>,
}

impl StateCommit {
    /// Root of the committed state.
    pub const fn root(&self) -> B256 {
        self.snapshot.root
    }
}

/// Keys already loaded into a trie handle.
#[derive(Debug, Default)]
struct Warm<K> {
    keys: Mutex<HashSet<K>>,
}

impl<K: std::hash::Hash + Eq + Copy> Warm<K> {
    /// Marks `key` as loaded. Returns true if it was cold.
    fn load(&self, key: K) -> bool {
        self.keys.lock().insert(key)
    }

    fn contains(&self, key: &K) -> bool {
        self.keys.lock().contains(key)
    }

    fn len(&self) -> usize {
        self.keys.lock().len()
    }
}

fn simulate_load(latency: Option<Duration>) {
    if let Some(latency) = latency {
        std::thread::sleep(latency);
    }
}

/// A read handle over the account trie of a state root.
///
/// Handles are cheap to clone and share their cache of loaded keys, so a handle warmed by the
/// prefetcher serves later reads without paying the load latency again.
#[derive(Debug, Clone)]
pub struct AccountTrie {
    snapshot: Arc<StateSnapshot>,
    latency: Option<Duration>,
    warm: Arc<Warm<Address>>,
}

impl AccountTrie {
    /// Opens a handle over `snapshot`. Cold reads sleep for `latency` when set.
    pub fn new(snapshot: Arc<StateSnapshot>, latency: Option<Duration>) -> Self {
        Self { snapshot, latency, warm: Arc::default() }
    }

    /// Root of the trie.
    pub fn root(&self) -> B256 {
        self.snapshot.root
    }

    /// Returns the account at `address`.
    pub fn account(&self, address: &Address) -> Option<Account> {
        if self.warm.load(*address) {
            simulate_load(self.latency);
        }
        self.snapshot.accounts.get(address).copied()
    }

    /// Returns true if `address` was already loaded through this handle or one of its clones.
    pub fn is_warm(&self, address: &Address) -> bool {
        self.warm.contains(address)
    }

    /// Number of loaded accounts.
    pub fn warm_len(&self) -> usize {
        self.warm.len()
    }

    /// Returns the snapshot the handle reads from.
    pub const fn snapshot(&self) -> &Arc<StateSnapshot> {
        &self.snapshot
    }
}

/// A read handle over the storage trie of a single account.
#[derive(Debug, Clone)]
pub struct StorageTrie {
    owner: Address,
    root: B256,
    slots: Arc<StorageSlots>,
    latency: Option<Duration>,
    warm: Arc<Warm<B256>>,
}

impl StorageTrie {
    /// Opens a handle over `slots`.
    pub fn new(
        owner: Address,
        root: B256,
        slots: Arc<StorageSlots>,
        latency: Option<Duration>,
    ) -> Self {
        Self { owner, root, slots, latency, warm: Arc::default() }
    }

    /// Owner of the trie.
    pub const fn owner(&self) -> Address {
        self.owner
    }

    /// Root of the trie.
    pub const fn root(&self) -> B256 {
        self.root
    }

    /// Returns the value of `slot`, zero if unset.
    pub fn slot(&self, slot: &B256) -> U256 {
        if self.warm.load(*slot) {
            simulate_load(self.latency);
        }
        self.slots.get(slot).copied().unwrap_or_default()
    }

    /// Returns true if `slot` was already loaded.
    pub fn is_warm(&self, slot: &B256) -> bool {
        self.warm.contains(slot)
    }

    /// Number of loaded slots.
    pub fn warm_len(&self) -> usize {
        self.warm.len()
    }

    /// Returns every slot of the trie.
    pub const fn slots(&self) -> &Arc<StorageSlots> {
        &self.slots
    }
}

/// The trie and state store.
///
/// Committed states start out dirty and unreferenced. The chain manager references the states
/// it retains, dereferences them once they leave the retention window and persists a state to
/// make it survive a restart. A dirty state whose reference count drops to zero is released.
#[auto_impl::auto_impl(&, Arc)]
pub trait StateStore: Send + Sync + std::fmt::Debug {
    /// Opens the account trie of `root`.
    fn open_trie(&self, root: B256) -> Result<AccountTrie, StorageError>;

    /// Opens the storage trie of `owner` in the state rooted at `state_root`.
    fn open_storage_trie(
        &self,
        state_root: B256,
        owner: Address,
        root: B256,
    ) -> Result<StorageTrie, StorageError>;

    /// Returns the code with the given hash.
    fn code(&self, hash: &B256) -> Option<Bytes>;

    /// Inserts a new state. Returns its root.
    fn commit(&self, commit: StateCommit) -> Result<B256, StorageError>;

    /// Adds a reference to `root`.
    fn reference(&self, root: B256);

    /// Removes a reference from `root`, releasing it if it is dirty and unreferenced.
    fn dereference(&self, root: B256);

    /// Persists `root` so it survives restarts and is never released.
    fn persist(&self, root: B256) -> Result<(), StorageError>;

    /// Returns true if the state of `root` is available.
    fn has_state(&self, root: &B256) -> bool;

    /// Number of states held in memory but not persisted.
    fn dirty_len(&self) -> usize;
}
