//! Scheduling prefetches and collecting the warmed tries.

use crate::{
    PrefetchConfig, PrefetchError, PrefetchKey, PrefetchedTrie, TrieId,
    fetcher::{FetcherStats, SubFetcher},
    metrics::Metrics,
};
use alloy_primitives::B256;
use meridian_storage::StateStore;
use parking_lot::Mutex;
use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};
use tracing::debug;

/// Totals over every trie of a [`TriePrefetcher`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PrefetchReport {
    /// Number of tries prefetched.
    pub tries: usize,
    /// Keys loaded.
    pub loaded: u64,
    /// Keys scheduled again after they were already seen.
    pub duplicates: u64,
    /// Distinct keys later read by execution.
    pub used: u64,
    /// Distinct keys loaded but never read by execution.
    pub wasted: u64,
}

impl PrefetchReport {
    fn add(&mut self, stats: FetcherStats) {
        self.tries += 1;
        self.loaded += stats.loaded;
        self.duplicates += stats.duplicates;
        self.used += stats.used;
        self.wasted += stats.wasted;
    }
}

/// Warms the tries a block is about to touch.
///
/// Every distinct [`TrieId`] gets its own worker thread. Execution consults the prefetcher with
/// [`TriePrefetcher::peek`], which never blocks, and falls back to loading from the store on a
/// miss. Results never affect correctness.
#[derive(Debug)]
pub struct TriePrefetcher {
    store: Arc<dyn StateStore>,
    root: B256,
    namespace: &'static str,
    config: PrefetchConfig,
    fetchers: Mutex<HashMap<TrieId, Arc<SubFetcher>>>,
    closed: AtomicBool,
    discarded: AtomicBool,
}

impl TriePrefetcher {
    /// Creates a prefetcher for the state rooted at `root`. `namespace` labels its metrics.
    pub fn new(
        store: Arc<dyn StateStore>,
        root: B256,
        namespace: &'static str,
        config: PrefetchConfig,
    ) -> Self {
        Self {
            store,
            root,
            namespace,
            config,
            fetchers: Mutex::default(),
            closed: AtomicBool::new(false),
            discarded: AtomicBool::new(false),
        }
    }

    /// Root of the state being prefetched.
    pub const fn root(&self) -> B256 {
        self.root
    }

    /// Schedules `keys` for loading into the trie `id`, starting its worker on first use.
    pub fn schedule(
        &self,
        id: TrieId,
        keys: impl IntoIterator<Item = PrefetchKey>,
    ) -> Result<(), PrefetchError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(PrefetchError::Terminated);
        }
        let fetcher = self
            .fetchers
            .lock()
            .entry(id)
            .or_insert_with(|| SubFetcher::spawn(self.store.clone(), id, self.config))
            .clone();
        fetcher.schedule(keys);
        Ok(())
    }

    /// Returns the trie handle for `id` if a worker opened it, without waiting for pending
    /// loads.
    pub fn peek(&self, id: &TrieId) -> Option<PrefetchedTrie> {
        if self.discarded.load(Ordering::Acquire) {
            return None;
        }
        self.fetcher(id)?.peek()
    }

    /// Waits until every key scheduled for `id` is loaded and returns the warmed handle.
    pub fn trie(&self, id: &TrieId) -> Option<PrefetchedTrie> {
        if self.discarded.load(Ordering::Acquire) {
            return None;
        }
        self.fetcher(id)?.wait()
    }

    /// Marks keys of `id` as read by execution.
    pub fn used(&self, id: &TrieId, keys: impl IntoIterator<Item = PrefetchKey>) {
        if let Some(fetcher) = self.fetcher(id) {
            fetcher.used(keys);
        }
    }

    /// Stops every worker from accepting new keys.
    ///
    /// With `async_` false the call blocks until every worker drained its queue and exited.
    /// With `async_` true it returns immediately: in-flight loads finish in the background,
    /// pending keys are dropped and the results are discarded.
    pub fn terminate(&self, async_: bool) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if async_ {
            self.discarded.store(true, Ordering::Release);
        }
        let fetchers = self.fetchers.lock().values().cloned().collect::<Vec<_>>();
        for fetcher in &fetchers {
            fetcher.stop(async_);
        }
        if !async_ {
            for fetcher in &fetchers {
                fetcher.join();
            }
        }
        debug!(target: "prefetch", root = %self.root, tries = fetchers.len(), async_, "Terminated prefetcher");
    }

    /// Collects the counters of every worker and records them as metrics.
    pub fn report(&self) -> PrefetchReport {
        let mut report = PrefetchReport::default();
        for fetcher in self.fetchers.lock().values() {
            report.add(fetcher.stats());
        }
        Metrics::record_report(self.namespace, &report);
        report
    }

    fn fetcher(&self, id: &TrieId) -> Option<Arc<SubFetcher>> {
        self.fetchers.lock().get(id).cloned()
    }
}

impl Drop for TriePrefetcher {
    fn drop(&mut self) {
        self.terminate(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::{Address, U256};
    use meridian_primitives::{Account, proofs};
    use meridian_storage::{MemoryStateStore, StateCommit, StateSnapshot};
    use rstest::rstest;
    use std::{collections::BTreeMap, time::Duration};

    fn store_with_accounts(count: u8, latency: Option<Duration>) -> (Arc<dyn StateStore>, B256) {
        let accounts = (1..=count)
            .map(|i| (Address::with_last_byte(i), Account::with_balance(U256::from(i))))
            .collect::<BTreeMap<_, _>>();
        let root = proofs::state_root(accounts.iter());
        let mut store = MemoryStateStore::new();
        if let Some(latency) = latency {
            store = store.with_latency(latency);
        }
        let commit = StateCommit {
            snapshot: StateSnapshot { root, accounts, storage: BTreeMap::new() },
            codes: Vec::new(),
        };
        store.commit(commit).unwrap();
        (Arc::new(store), root)
    }

    fn keys(count: u8) -> Vec<PrefetchKey> {
        (1..=count).map(|i| PrefetchKey::Account(Address::with_last_byte(i))).collect()
    }

    #[rstest]
    #[case::sequential(8, PrefetchConfig::default())]
    #[case::fan_out(100, PrefetchConfig::default().with_parallel_threshold(10).with_child_capacity(7))]
    fn test_trie_is_warm_after_wait(#[case] count: u8, #[case] config: PrefetchConfig) {
        let (store, root) = store_with_accounts(count, None);
        let prefetcher = TriePrefetcher::new(store, root, "test", config);
        let id = TrieId::account(root);
        prefetcher.schedule(id, keys(count)).unwrap();

        let trie = prefetcher.trie(&id).unwrap().into_account().unwrap();
        assert_eq!(trie.warm_len(), count as usize);
        assert!(trie.is_warm(&Address::with_last_byte(1)));
        assert_eq!(prefetcher.report().loaded, count as u64);
    }

    #[test]
    fn test_duplicates_and_waste() {
        let (store, root) = store_with_accounts(4, None);
        let prefetcher = TriePrefetcher::new(store, root, "test", PrefetchConfig::default());
        let id = TrieId::account(root);
        prefetcher.schedule(id, keys(4)).unwrap();
        prefetcher.schedule(id, keys(2)).unwrap();
        prefetcher.trie(&id).unwrap();
        prefetcher.used(&id, [PrefetchKey::Account(Address::with_last_byte(1))]);
        prefetcher.terminate(false);

        let report = prefetcher.report();
        assert_eq!(report.tries, 1);
        assert_eq!(report.duplicates, 2);
        assert_eq!(report.used, 1);
        assert_eq!(report.wasted, 3);
    }

    #[test]
    fn test_schedule_after_terminate() {
        let (store, root) = store_with_accounts(1, None);
        let prefetcher = TriePrefetcher::new(store, root, "test", PrefetchConfig::default());
        prefetcher.terminate(false);
        assert_eq!(
            prefetcher.schedule(TrieId::account(root), keys(1)),
            Err(PrefetchError::Terminated)
        );
    }

    #[test]
    fn test_async_terminate_discards_results() {
        let (store, root) = store_with_accounts(50, Some(Duration::from_millis(2)));
        let prefetcher = TriePrefetcher::new(store, root, "test", PrefetchConfig::default());
        let id = TrieId::account(root);
        prefetcher.schedule(id, keys(50)).unwrap();
        prefetcher.terminate(true);
        assert!(prefetcher.peek(&id).is_none());
        assert!(prefetcher.trie(&id).is_none());
    }

    #[test]
    fn test_missing_root_is_not_fatal() {
        let (store, _) = store_with_accounts(1, None);
        let missing = B256::with_last_byte(0xaa);
        let prefetcher = TriePrefetcher::new(store, missing, "test", PrefetchConfig::default());
        let id = TrieId::account(missing);
        prefetcher.schedule(id, keys(1)).unwrap();
        assert!(prefetcher.trie(&id).is_none());
    }
}
