//! Per-trie background loader.

use crate::{PrefetchConfig, PrefetchKey, PrefetchedTrie, TrieId, metrics::Metrics};
use meridian_storage::StateStore;
use parking_lot::{Condvar, Mutex};
use std::{
    collections::HashSet,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    thread::JoinHandle,
};
use tracing::{trace, warn};

#[derive(Debug, Default)]
struct FetcherState {
    tasks: Vec<PrefetchKey>,
    seen: HashSet<PrefetchKey>,
    used: HashSet<PrefetchKey>,
    duplicates: u64,
    loaded: u64,
    trie: Option<PrefetchedTrie>,
    busy: bool,
    stopping: bool,
    exited: bool,
}

/// Counters of a single [`SubFetcher`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FetcherStats {
    pub(crate) loaded: u64,
    pub(crate) duplicates: u64,
    pub(crate) used: u64,
    pub(crate) wasted: u64,
}

/// Loads the keys scheduled for one trie on a dedicated thread.
///
/// Keys are deduplicated on arrival. Large batches are split across scoped child threads that
/// only live for the duration of the batch.
#[derive(Debug)]
pub(crate) struct SubFetcher {
    id: TrieId,
    state: Mutex<FetcherState>,
    cond: Condvar,
    interrupt: AtomicBool,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl SubFetcher {
    /// Starts a fetcher for `id`. The trie is opened on the worker thread.
    pub(crate) fn spawn(
        store: Arc<dyn StateStore>,
        id: TrieId,
        config: PrefetchConfig,
    ) -> Arc<Self> {
        let fetcher = Arc::new(Self {
            id,
            state: Mutex::new(FetcherState { busy: true, ..Default::default() }),
            cond: Condvar::new(),
            interrupt: AtomicBool::new(false),
            handle: Mutex::new(None),
        });
        let worker = fetcher.clone();
        let handle = std::thread::Builder::new()
            .name("trie-prefetch".to_string())
            .spawn(move || worker.run(store, config));
        match handle {
            Ok(handle) => *fetcher.handle.lock() = Some(handle),
            Err(err) => {
                warn!(target: "prefetch", %err, "Failed to spawn prefetch worker");
                let mut state = fetcher.state.lock();
                state.busy = false;
                state.exited = true;
            }
        }
        fetcher
    }

    /// Queues keys that were not seen before.
    pub(crate) fn schedule(&self, keys: impl IntoIterator<Item = PrefetchKey>) {
        let mut state = self.state.lock();
        if state.stopping {
            return;
        }
        for key in keys {
            if state.seen.insert(key) {
                state.tasks.push(key);
            } else {
                state.duplicates += 1;
            }
        }
        if !state.tasks.is_empty() {
            state.busy = true;
            self.cond.notify_all();
        }
    }

    /// Returns the trie handle without waiting for pending loads.
    pub(crate) fn peek(&self) -> Option<PrefetchedTrie> {
        self.state.lock().trie.clone()
    }

    /// Waits until every scheduled key is loaded, then returns the trie handle.
    pub(crate) fn wait(&self) -> Option<PrefetchedTrie> {
        let mut state = self.state.lock();
        while state.busy && !state.exited {
            self.cond.wait(&mut state);
        }
        state.trie.clone()
    }

    /// Records keys read by execution.
    pub(crate) fn used(&self, keys: impl IntoIterator<Item = PrefetchKey>) {
        self.state.lock().used.extend(keys);
    }

    /// Stops accepting keys. With `interrupt`, pending keys are skipped; otherwise they are
    /// drained first.
    pub(crate) fn stop(&self, interrupt: bool) {
        if interrupt {
            self.interrupt.store(true, Ordering::Relaxed);
        }
        let mut state = self.state.lock();
        state.stopping = true;
        if interrupt {
            state.tasks.clear();
        }
        self.cond.notify_all();
    }

    /// Joins the worker thread.
    pub(crate) fn join(&self) {
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                warn!(target: "prefetch", id = ?self.id, "Prefetch worker panicked");
            }
        }
    }

    pub(crate) fn stats(&self) -> FetcherStats {
        let state = self.state.lock();
        let used = state.used.intersection(&state.seen).count() as u64;
        FetcherStats {
            loaded: state.loaded,
            duplicates: state.duplicates,
            used,
            wasted: state.seen.len() as u64 - used,
        }
    }

    fn run(self: Arc<Self>, store: Arc<dyn StateStore>, config: PrefetchConfig) {
        let trie = match self.id.open(store.as_ref()) {
            Ok(trie) => Some(trie),
            Err(err) => {
                warn!(target: "prefetch", id = ?self.id, %err, "Failed to open trie for prefetching");
                None
            }
        };
        self.state.lock().trie = trie.clone();

        loop {
            let tasks = {
                let mut state = self.state.lock();
                while state.tasks.is_empty() {
                    state.busy = false;
                    self.cond.notify_all();
                    if state.stopping {
                        state.exited = true;
                        return;
                    }
                    self.cond.wait(&mut state);
                }
                state.busy = true;
                std::mem::take(&mut state.tasks)
            };
            let Some(trie) = &trie else { continue };
            let loaded = self.load(trie, &tasks, &config);
            self.state.lock().loaded += loaded;
            trace!(target: "prefetch", id = ?self.id, loaded, "Loaded prefetch batch");
        }
    }

    fn load(&self, trie: &PrefetchedTrie, keys: &[PrefetchKey], config: &PrefetchConfig) -> u64 {
        let loaded = AtomicUsize::new(0);
        let load_chunk = |chunk: &[PrefetchKey]| {
            for key in chunk {
                if self.interrupt.load(Ordering::Relaxed) {
                    return;
                }
                trie.load(key);
                loaded.fetch_add(1, Ordering::Relaxed);
            }
        };

        if keys.len() <= config.parallel_threshold || config.max_children <= 1 {
            load_chunk(keys);
            return loaded.into_inner() as u64;
        }

        let chunks = keys.chunks(config.child_capacity.max(1)).collect::<Vec<_>>();
        let children = chunks.len().min(config.max_children);
        let next = AtomicUsize::new(0);
        std::thread::scope(|scope| {
            for _ in 0..children {
                scope.spawn(|| {
                    while let Some(chunk) = chunks.get(next.fetch_add(1, Ordering::Relaxed)) {
                        load_chunk(chunk);
                    }
                });
            }
        });
        Metrics::record_children(children);
        loaded.into_inner() as u64
    }
}
