//! Journaled world-state overlay used during block execution.

use alloy_primitives::{Address, B256, Bytes, Log, U256, keccak256};
use meridian_prefetch::{PrefetchKey, PrefetchedTrie, TriePrefetcher, TrieId};
use meridian_primitives::{Account, EMPTY_ROOT_HASH, KECCAK_EMPTY, proofs};
use meridian_storage::{
    AccountTrie, StateCommit, StateSnapshot, StateStore, StorageError, StorageSlots, StorageTrie,
};
use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};
use tracing::{trace, warn};

#[derive(Debug, Clone, Default)]
struct StateObject {
    account: Option<Account>,
    original: Option<Account>,
    storage: HashMap<B256, U256>,
    storage_trie: Option<StorageTrie>,
    code: Option<Bytes>,
    created: bool,
    dirty: bool,
}

impl StateObject {
    fn loaded(account: Option<Account>) -> Self {
        Self { account, original: account, ..Default::default() }
    }

    fn account_mut(&mut self) -> &mut Account {
        self.dirty = true;
        self.account.get_or_insert_with(Account::default)
    }
}

#[derive(Debug)]
enum JournalEntry {
    Exists { address: Address, prev: Option<Account> },
    Balance { address: Address, prev: U256 },
    Nonce { address: Address, prev: u64 },
    Code { address: Address, prev_hash: B256, prev_code: Option<Bytes> },
    Storage { address: Address, slot: B256, prev: Option<U256> },
    Reset { address: Address, prev: Box<StateObject> },
    Touch { address: Address },
    Refund { prev: u64 },
    Log,
}

/// Reads from the parent state, preferring warm handles from the prefetcher.
#[derive(Debug)]
struct StateReader {
    store: Arc<dyn StateStore>,
    root: B256,
    trie: AccountTrie,
    prefetcher: Option<Arc<TriePrefetcher>>,
    used_accounts: Vec<PrefetchKey>,
    used_slots: HashMap<TrieId, Vec<PrefetchKey>>,
}

impl StateReader {
    fn account(&mut self, address: &Address) -> Option<Account> {
        self.used_accounts.push(PrefetchKey::Account(*address));
        let warm = self.prefetcher.as_ref().and_then(|p| p.peek(&TrieId::account(self.root)));
        match warm {
            Some(PrefetchedTrie::Account(trie)) => trie.account(address),
            _ => self.trie.account(address),
        }
    }

    fn storage_trie(
        &mut self,
        address: Address,
        storage_root: B256,
    ) -> Result<StorageTrie, StorageError> {
        let id = TrieId::storage(self.root, address, storage_root);
        if let Some(PrefetchedTrie::Storage(trie)) =
            self.prefetcher.as_ref().and_then(|p| p.peek(&id))
        {
            return Ok(trie);
        }
        self.store.open_storage_trie(self.root, address, storage_root)
    }

    fn record_slot(&mut self, address: Address, storage_root: B256, slot: B256) {
        let id = TrieId::storage(self.root, address, storage_root);
        self.used_slots.entry(id).or_default().push(PrefetchKey::Slot(slot));
    }

    fn report_used(&mut self) {
        let Some(prefetcher) = &self.prefetcher else { return };
        prefetcher.used(&TrieId::account(self.root), self.used_accounts.drain(..));
        for (id, keys) in self.used_slots.drain() {
            prefetcher.used(&id, keys);
        }
    }

    /// Full base slots of a storage trie, waiting for the prefetcher when it covers the trie.
    fn base_slots(
        &self,
        snapshot: &StateSnapshot,
        address: Address,
        storage_root: B256,
    ) -> StorageSlots {
        let id = TrieId::storage(self.root, address, storage_root);
        if let Some(PrefetchedTrie::Storage(trie)) =
            self.prefetcher.as_ref().and_then(|p| p.trie(&id))
        {
            return (**trie.slots()).clone();
        }
        snapshot.storage.get(&address).map(|slots| (**slots).clone()).unwrap_or_default()
    }
}

fn object<'a>(
    objects: &'a mut HashMap<Address, StateObject>,
    reader: &mut StateReader,
    address: Address,
) -> &'a mut StateObject {
    objects.entry(address).or_insert_with(|| StateObject::loaded(reader.account(&address)))
}

fn ensure_exists(obj: &mut StateObject, journal: &mut Vec<JournalEntry>, address: Address) {
    if obj.account.is_none() {
        journal.push(JournalEntry::Exists { address, prev: None });
        obj.account_mut();
    }
}

/// A journaled overlay over the state of a parent block.
///
/// Reads fall through to the parent state on first access, through the prefetcher when one is
/// attached. Writes stay in memory until [`StateDb::commit`] folds them into a new
/// [`StateCommit`]. Every write is journaled so [`StateDb::revert_to`] can undo it.
#[derive(Debug)]
pub struct StateDb {
    reader: StateReader,
    objects: HashMap<Address, StateObject>,
    journal: Vec<JournalEntry>,
    touched: HashSet<Address>,
    logs: Vec<Log>,
    refund: u64,
    db_error: Option<StorageError>,
}

impl StateDb {
    /// Opens the state rooted at `root`.
    pub fn new(store: Arc<dyn StateStore>, root: B256) -> Result<Self, StorageError> {
        let trie = store.open_trie(root)?;
        Ok(Self {
            reader: StateReader {
                store,
                root,
                trie,
                prefetcher: None,
                used_accounts: Vec::new(),
                used_slots: HashMap::new(),
            },
            objects: HashMap::new(),
            journal: Vec::new(),
            touched: HashSet::new(),
            logs: Vec::new(),
            refund: 0,
            db_error: None,
        })
    }

    /// Attaches a prefetcher consulted on every cold read.
    pub fn with_prefetcher(mut self, prefetcher: Arc<TriePrefetcher>) -> Self {
        self.reader.prefetcher = Some(prefetcher);
        self
    }

    /// Root of the parent state.
    pub const fn parent_root(&self) -> B256 {
        self.reader.root
    }

    /// The attached prefetcher.
    pub const fn prefetcher(&self) -> Option<&Arc<TriePrefetcher>> {
        self.reader.prefetcher.as_ref()
    }

    /// Returns the account at `address`, `None` if it does not exist.
    pub fn basic(&mut self, address: Address) -> Option<Account> {
        object(&mut self.objects, &mut self.reader, address).account
    }

    /// Returns true if an account exists at `address`.
    pub fn exists(&mut self, address: Address) -> bool {
        self.basic(address).is_some()
    }

    /// Balance of `address`.
    pub fn balance(&mut self, address: Address) -> U256 {
        self.basic(address).map(|a| a.balance).unwrap_or_default()
    }

    /// Nonce of `address`.
    pub fn nonce(&mut self, address: Address) -> u64 {
        self.basic(address).map(|a| a.nonce).unwrap_or_default()
    }

    /// Code hash of `address`.
    pub fn code_hash(&mut self, address: Address) -> B256 {
        self.basic(address).map_or(KECCAK_EMPTY, |a| a.code_hash)
    }

    /// Code of `address`.
    pub fn code(&mut self, address: Address) -> Bytes {
        let Self { objects, reader, .. } = self;
        let obj = object(objects, reader, address);
        if let Some(code) = &obj.code {
            return code.clone();
        }
        let Some(account) = obj.account.filter(Account::has_code) else { return Bytes::new() };
        let code = reader.store.code(&account.code_hash).unwrap_or_default();
        obj.code = Some(code.clone());
        code
    }

    /// Value of `slot` in the storage of `address`.
    pub fn storage(&mut self, address: Address, slot: B256) -> U256 {
        let Self { objects, reader, db_error, .. } = self;
        let obj = object(objects, reader, address);
        if let Some(value) = obj.storage.get(&slot) {
            return *value;
        }
        if obj.created {
            return U256::ZERO;
        }
        let Some(original) = obj.original.filter(|a| a.storage_root != EMPTY_ROOT_HASH) else {
            return U256::ZERO;
        };
        reader.record_slot(address, original.storage_root, slot);
        if obj.storage_trie.is_none() {
            match reader.storage_trie(address, original.storage_root) {
                Ok(trie) => obj.storage_trie = Some(trie),
                Err(err) => {
                    warn!(target: "executor", %address, %err, "Failed to open storage trie");
                    db_error.get_or_insert(err);
                    return U256::ZERO;
                }
            }
        }
        obj.storage_trie.as_ref().map(|trie| trie.slot(&slot)).unwrap_or_default()
    }

    /// Credits `amount` to `address`, creating the account if needed.
    pub fn add_balance(&mut self, address: Address, amount: U256) {
        self.touch(address);
        if amount.is_zero() {
            return;
        }
        self.modify(address, |account| account.balance = account.balance.saturating_add(amount));
    }

    /// Debits `amount` from `address`. The caller checks the balance first.
    pub fn sub_balance(&mut self, address: Address, amount: U256) {
        self.touch(address);
        if amount.is_zero() {
            return;
        }
        self.modify(address, |account| account.balance = account.balance.saturating_sub(amount));
    }

    /// Moves `amount` from `from` to `to`. Returns false and changes nothing if `from` holds
    /// less than `amount`.
    pub fn transfer(&mut self, from: Address, to: Address, amount: U256) -> bool {
        if self.balance(from) < amount {
            return false;
        }
        self.sub_balance(from, amount);
        self.add_balance(to, amount);
        true
    }

    /// Sets the nonce of `address`.
    pub fn set_nonce(&mut self, address: Address, nonce: u64) {
        self.modify(address, |account| account.nonce = nonce);
    }

    /// Deploys `code` at `address`.
    pub fn set_code(&mut self, address: Address, code: Bytes) {
        let Self { objects, reader, journal, .. } = self;
        let obj = object(objects, reader, address);
        ensure_exists(obj, journal, address);
        let prev_hash = obj.account.map_or(KECCAK_EMPTY, |a| a.code_hash);
        journal.push(JournalEntry::Code { address, prev_hash, prev_code: obj.code.clone() });
        obj.account_mut().code_hash = if code.is_empty() { KECCAK_EMPTY } else { keccak256(&code) };
        obj.code = Some(code);
    }

    /// Writes `value` to `slot` in the storage of `address`.
    pub fn set_storage(&mut self, address: Address, slot: B256, value: U256) {
        let prev_value = self.storage(address, slot);
        if prev_value == value {
            return;
        }
        let Self { objects, reader, journal, .. } = self;
        let obj = object(objects, reader, address);
        ensure_exists(obj, journal, address);
        journal.push(JournalEntry::Storage { address, slot, prev: obj.storage.get(&slot).copied() });
        obj.dirty = true;
        obj.storage.insert(slot, value);
    }

    /// Creates a fresh account at `address`, keeping its balance and dropping its storage.
    pub fn create_account(&mut self, address: Address) {
        let Self { objects, reader, journal, .. } = self;
        let obj = object(objects, reader, address);
        journal.push(JournalEntry::Reset { address, prev: Box::new(obj.clone()) });
        let balance = obj.account.map(|a| a.balance).unwrap_or_default();
        obj.account = Some(Account::with_balance(balance));
        obj.storage.clear();
        obj.storage_trie = None;
        obj.code = None;
        obj.created = true;
        obj.dirty = true;
    }

    /// Marks `address` as touched for empty-account deletion.
    pub fn touch(&mut self, address: Address) {
        if self.touched.insert(address) {
            self.journal.push(JournalEntry::Touch { address });
        }
    }

    /// Appends a log emitted by the running transaction.
    pub fn add_log(&mut self, log: Log) {
        self.logs.push(log);
        self.journal.push(JournalEntry::Log);
    }

    /// Logs emitted by the running transaction so far.
    pub fn logs(&self) -> &[Log] {
        &self.logs
    }

    /// Adds to the refund counter.
    pub fn add_refund(&mut self, gas: u64) {
        self.journal.push(JournalEntry::Refund { prev: self.refund });
        self.refund += gas;
    }

    /// Current refund counter.
    pub const fn refund(&self) -> u64 {
        self.refund
    }

    /// Returns an identifier to revert to.
    pub fn snapshot(&self) -> usize {
        self.journal.len()
    }

    /// Undoes every change made after `snapshot` was taken.
    pub fn revert_to(&mut self, snapshot: usize) {
        while self.journal.len() > snapshot {
            let Some(entry) = self.journal.pop() else { break };
            self.undo(entry);
        }
    }

    /// Ends the running transaction: deletes touched empty accounts, clears the journal and
    /// returns the logs the transaction emitted.
    pub fn finalise(&mut self) -> Vec<Log> {
        for address in self.touched.drain() {
            if let Some(obj) = self.objects.get_mut(&address)
                && obj.account.is_some_and(|account| account.is_empty())
            {
                obj.account = None;
                obj.dirty = true;
            }
        }
        self.journal.clear();
        self.refund = 0;
        std::mem::take(&mut self.logs)
    }

    /// Folds every change into a new state, computing storage roots and the state root.
    ///
    /// Waits for the prefetcher on every trie it covers.
    pub fn commit(mut self) -> Result<StateCommit, StorageError> {
        if let Some(err) = self.db_error.take() {
            return Err(err);
        }
        self.finalise();
        self.reader.report_used();

        let base_trie = match self
            .reader
            .prefetcher
            .as_ref()
            .and_then(|p| p.trie(&TrieId::account(self.reader.root)))
        {
            Some(PrefetchedTrie::Account(trie)) => trie,
            _ => self.reader.trie.clone(),
        };
        let base = base_trie.snapshot();
        let mut accounts = base.accounts.clone();
        let mut storage = base.storage.clone();
        let mut codes = Vec::new();

        for (address, obj) in &self.objects {
            if !obj.dirty {
                continue;
            }
            let Some(mut account) = obj.account else {
                accounts.remove(address);
                storage.remove(address);
                continue;
            };
            if obj.created || !obj.storage.is_empty() {
                let mut slots = match obj.original {
                    Some(original) if !obj.created && original.storage_root != EMPTY_ROOT_HASH => {
                        self.reader.base_slots(base, *address, original.storage_root)
                    }
                    _ => StorageSlots::new(),
                };
                for (slot, value) in &obj.storage {
                    if value.is_zero() {
                        slots.remove(slot);
                    } else {
                        slots.insert(*slot, *value);
                    }
                }
                if slots.is_empty() {
                    account.storage_root = EMPTY_ROOT_HASH;
                    storage.remove(address);
                } else {
                    account.storage_root = proofs::storage_root(slots.iter());
                    storage.insert(*address, Arc::new(slots));
                }
            }
            if let Some(code) = &obj.code
                && obj.original.map(|a| a.code_hash) != Some(account.code_hash)
                && account.has_code()
            {
                codes.push((account.code_hash, code.clone()));
            }
            accounts.insert(*address, account);
        }

        let root = proofs::state_root(accounts.iter());
        trace!(target: "executor", parent = %self.reader.root, %root, dirty = self.objects.len(), "Committed state");
        Ok(StateCommit { snapshot: StateSnapshot { root, accounts, storage }, codes })
    }

    fn modify(&mut self, address: Address, f: impl FnOnce(&mut Account)) {
        let Self { objects, reader, journal, .. } = self;
        let obj = object(objects, reader, address);
        match obj.account {
            None => journal.push(JournalEntry::Exists { address, prev: None }),
            Some(account) => {
                journal.push(JournalEntry::Balance { address, prev: account.balance });
                journal.push(JournalEntry::Nonce { address, prev: account.nonce });
            }
        }
        f(obj.account_mut());
    }

    fn undo(&mut self, entry: JournalEntry) {
        match entry {
            JournalEntry::Exists { address, prev } => {
                if let Some(obj) = self.objects.get_mut(&address) {
                    obj.account = prev;
                }
            }
            JournalEntry::Balance { address, prev } => {
                if let Some(account) = self.objects.get_mut(&address).and_then(|o| o.account.as_mut())
                {
                    account.balance = prev;
                }
            }
            JournalEntry::Nonce { address, prev } => {
                if let Some(account) = self.objects.get_mut(&address).and_then(|o| o.account.as_mut())
                {
                    account.nonce = prev;
                }
            }
            JournalEntry::Code { address, prev_hash, prev_code } => {
                if let Some(obj) = self.objects.get_mut(&address) {
                    if let Some(account) = obj.account.as_mut() {
                        account.code_hash = prev_hash;
                    }
                    obj.code = prev_code;
                }
            }
            JournalEntry::Storage { address, slot, prev } => {
                if let Some(obj) = self.objects.get_mut(&address) {
                    match prev {
                        Some(value) => obj.storage.insert(slot, value),
                        None => obj.storage.remove(&slot),
                    };
                }
            }
            JournalEntry::Reset { address, prev } => {
                self.objects.insert(address, *prev);
            }
            JournalEntry::Touch { address } => {
                self.touched.remove(&address);
            }
            JournalEntry::Refund { prev } => self.refund = prev,
            JournalEntry::Log => {
                self.logs.pop();
            }
        }
    }
}
