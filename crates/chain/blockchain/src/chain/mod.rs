//! The chain manager.

use crate::{
    BadBlock, BadBlockReport, BadBlocks, BadHashes, BlockBuffer, BlockValidator, BlockchainConfig,
    BlockchainError, ChainHeads, ChainNotifications, ForkChoice, HeaderChain, HeadsUpdate,
    StateRetention, genesis_block, genesis_state,
    metrics::Metrics,
    notifications::{ChainEvent, ChainHeadEvent, ChainLog, ChainReorgEvent, ChainSideEvent},
    verifier::AncestorVerifier,
};
use alloy_primitives::{B256, BlockNumber, U256};
use lru::LruCache;
use meridian_consensus::Consensus;
use meridian_executor::{Evm, ExecutionOutcome, StateDb, StateProcessor};
use meridian_prefetch::TriePrefetcher;
use meridian_primitives::{BlockBody, BlockNumHash, ChainSpec, Receipt, SealedBlock, SealedHeader};
use meridian_storage::{
    ChainWriter, StateCommit, StateStore, StorageError, StoreBatch, TxLookupEntry,
};
use parking_lot::{Mutex, RwLock};
use std::{
    num::NonZeroUsize,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

mod head;
mod headers;
mod insert;
mod reorg;

#[cfg(test)]
mod tests;

/// What happened to an inserted block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display)]
pub enum WriteStatus {
    /// The block became the canonical head.
    #[display("canonical")]
    Canonical,
    /// The block was executed and stored next to the canonical chain.
    #[display("side")]
    Side,
    /// The block was stored without state, its execution is deferred.
    #[display("buffered")]
    Buffered,
    /// The block and its state were already known.
    #[display("known")]
    Known,
}

impl WriteStatus {
    const fn metric_label(self) -> &'static str {
        match self {
            Self::Canonical => Metrics::STATUS_CANONICAL,
            Self::Side => Metrics::STATUS_SIDE,
            Self::Buffered => Metrics::STATUS_BUFFERED,
            Self::Known => Metrics::STATUS_KNOWN,
        }
    }
}

/// State only the writer holding the chain lock may touch.
#[derive(Debug)]
struct ChainInner {
    buffer: BlockBuffer,
    retention: StateRetention,
}

fn lru<K: std::hash::Hash + Eq, V>(size: usize) -> Mutex<LruCache<K, V>> {
    Mutex::new(LruCache::new(NonZeroUsize::new(size).unwrap_or(NonZeroUsize::MIN)))
}

/// Maintains the canonical chain.
///
/// Blocks and headers are inserted in batches. Every mutation of the canonical chain happens
/// under a single writer lock, while lookups only take short-lived read locks and may run
/// concurrently with an insertion. Chain changes are published through broadcast channels,
/// see [`BlockChain::subscribe_chain_head`] and friends.
#[derive(Debug)]
pub struct BlockChain {
    config: BlockchainConfig,
    spec: Arc<ChainSpec>,
    genesis: SealedBlock,
    store: Arc<dyn ChainWriter>,
    state: Arc<dyn StateStore>,
    headers: Arc<HeaderChain>,
    validator: BlockValidator,
    processor: StateProcessor,
    forkchoice: ForkChoice,
    verifier: Option<Arc<dyn AncestorVerifier>>,
    heads: RwLock<ChainHeads>,
    inner: Mutex<ChainInner>,
    bodies: Mutex<LruCache<B256, BlockBody>>,
    receipts: Mutex<LruCache<B256, Vec<Receipt>>>,
    invalid: Mutex<LruCache<B256, B256>>,
    notifications: ChainNotifications,
    bad_blocks: BadBlocks,
    stopped: AtomicBool,
}

impl BlockChain {
    /// Opens the chain held by `store` and `state`, writing the genesis block of `spec` into
    /// empty stores.
    ///
    /// The persisted heads are loaded and repaired: banned heads are rolled back and a block
    /// head whose state is missing is rewound to the nearest ancestor with state.
    ///
    /// # Errors
    ///
    /// [`BlockchainError::GenesisMismatch`] if the stored genesis differs from `spec`.
    pub fn new(
        store: Arc<dyn ChainWriter>,
        state: Arc<dyn StateStore>,
        spec: Arc<ChainSpec>,
        consensus: Arc<dyn Consensus>,
        evm: Arc<dyn Evm>,
        config: BlockchainConfig,
    ) -> Result<Self, BlockchainError> {
        BadHashes::extend(config.bad_hashes.iter().copied());

        let genesis = genesis_block(&spec);
        let headers = Arc::new(HeaderChain::new(store.clone(), consensus.clone(), &config.cache));
        let validator = BlockValidator::new(headers.clone(), state.clone());
        let processor = StateProcessor::new(spec.clone(), evm, consensus)
            .with_fee_distribution(Arc::new(config.fee_distribution.clone()));
        let inner = ChainInner {
            buffer: BlockBuffer::new(config.buffer_limit),
            retention: StateRetention::new(state.clone(), &config),
        };

        let chain = Self {
            spec,
            heads: RwLock::new(ChainHeads::genesis(genesis.header.clone())),
            genesis,
            store,
            state,
            headers,
            validator,
            processor,
            forkchoice: ForkChoice::default(),
            verifier: None,
            inner: Mutex::new(inner),
            bodies: lru(config.cache.bodies),
            receipts: lru(config.cache.receipts),
            invalid: lru(config.cache.invalid_blocks),
            notifications: ChainNotifications::default(),
            bad_blocks: BadBlocks::default(),
            stopped: AtomicBool::new(false),
            config,
        };
        chain.write_genesis()?;
        chain.load_last_state()?;
        Ok(chain)
    }

    /// Requires every inserted batch to build on an attested ancestor.
    pub fn with_ancestor_verifier(mut self, verifier: Arc<dyn AncestorVerifier>) -> Self {
        self.verifier = Some(verifier);
        self
    }

    /// Writes the genesis block and state unless the store already holds them.
    fn write_genesis(&self) -> Result<(), BlockchainError> {
        let genesis = &self.genesis;
        if !self.state.has_state(&genesis.header.state_root) {
            self.state.commit(genesis_state(&self.spec))?;
        }
        self.state.persist(genesis.header.state_root)?;

        match self.store.canonical_hash(0) {
            Some(stored) if stored != genesis.hash() => {
                return Err(BlockchainError::GenesisMismatch {
                    stored,
                    configured: genesis.hash(),
                });
            }
            Some(_) => return Ok(()),
            None => {}
        }

        let mut batch = StoreBatch::new();
        batch
            .put_block(genesis)
            .put_receipts(genesis.hash(), Vec::new())
            .put_td(genesis.hash(), genesis.header.difficulty)
            .put_canonical(0, genesis.hash())
            .set_head_header(genesis.hash())
            .set_head_snap(genesis.hash())
            .set_head_block(genesis.hash());
        self.store.commit(batch)?;
        info!(target: "blockchain", hash = %genesis.hash(), "Wrote genesis block");
        Ok(())
    }

    /// Loads the persisted heads and repairs them.
    fn load_last_state(&self) -> Result<(), BlockchainError> {
        let mut inner = self.inner.lock();
        let stored = |hash: Option<B256>| hash.and_then(|hash| self.headers.header(&hash));
        let Some(mut header_head) = stored(self.store.head_header_hash()) else {
            warn!(target: "blockchain", "Head header missing, resetting chain");
            drop(inner);
            return self.reset_with_genesis();
        };

        if BadHashes::contains(&header_head.hash()) {
            while BadHashes::contains(&header_head.hash()) && header_head.number() > 0 {
                header_head = self.headers.parent(&header_head)?;
            }
            warn!(
                target: "blockchain",
                number = header_head.number(),
                hash = %header_head.hash(),
                "Rolling back banned chain head"
            );
            self.rewind(&mut inner, header_head.number())?;
            return Ok(());
        }

        let mut block_head = stored(self.store.head_block_hash()).unwrap_or_else(|| header_head.clone());
        let stale = block_head.clone();
        while !self.has_executed(&block_head) && block_head.number() > 0 {
            block_head = self.headers.parent(&block_head)?;
        }
        if block_head != stale {
            warn!(
                target: "blockchain",
                from = stale.number(),
                to = block_head.number(),
                "Head state missing, repairing chain"
            );
        }
        let snap_head = stored(self.store.head_snap_hash())
            .filter(|snap| snap.number() >= block_head.number())
            .unwrap_or_else(|| block_head.clone());

        let update = HeadsUpdate {
            header: Some(header_head),
            snap: Some(snap_head),
            block: Some(block_head.clone()),
        };
        let heads = match self.heads.read().apply_update(update) {
            Ok(heads) => heads,
            Err(err) => {
                warn!(target: "blockchain", %err, "Inconsistent head markers, rewinding to block head");
                ChainHeads::genesis(block_head.clone())
            }
        };
        let persisted = (
            self.store.head_header_hash(),
            self.store.head_snap_hash(),
            self.store.head_block_hash(),
        );
        if persisted != (Some(heads.header().hash()), Some(heads.snap().hash()), Some(heads.block().hash())) {
            self.persist_heads(&heads)?;
        }
        info!(
            target: "blockchain",
            header = heads.header().number(),
            snap = heads.snap().number(),
            block = heads.block().number(),
            "Loaded chain heads"
        );
        *self.heads.write() = heads;
        Ok(())
    }

    fn persist_heads(&self, heads: &ChainHeads) -> Result<(), StorageError> {
        let mut batch = StoreBatch::new();
        batch
            .set_head_header(heads.header().hash())
            .set_head_snap(heads.snap().hash())
            .set_head_block(heads.block().hash());
        self.store.commit(batch)
    }

    /// The configuration.
    pub const fn config(&self) -> &BlockchainConfig {
        &self.config
    }

    /// The chain spec.
    pub fn spec(&self) -> &ChainSpec {
        &self.spec
    }

    /// The genesis block.
    pub const fn genesis(&self) -> &SealedBlock {
        &self.genesis
    }

    /// The header index.
    pub const fn header_chain(&self) -> &Arc<HeaderChain> {
        &self.headers
    }

    /// The head of the validated header chain.
    pub fn current_header(&self) -> SealedHeader {
        self.heads.read().header().clone()
    }

    /// The head of the blocks with stored bodies and receipts.
    pub fn current_snap_block(&self) -> SealedHeader {
        self.heads.read().snap().clone()
    }

    /// The head of the fully executed canonical chain.
    pub fn current_block(&self) -> SealedHeader {
        self.heads.read().block().clone()
    }

    /// Returns the header with the given hash.
    pub fn header_by_hash(&self, hash: &B256) -> Option<SealedHeader> {
        self.headers.header(hash)
    }

    /// Returns the canonical header at `number`.
    pub fn header_by_number(&self, number: BlockNumber) -> Option<SealedHeader> {
        self.headers.header_by_number(number)
    }

    /// Returns the body of the block with the given hash.
    pub fn body(&self, hash: &B256) -> Option<BlockBody> {
        if let Some(body) = self.bodies.lock().get(hash) {
            return Some(body.clone());
        }
        let body = self.store.body(hash)?;
        self.bodies.lock().put(*hash, body.clone());
        Some(body)
    }

    /// Returns the block with the given hash, canonical or not.
    pub fn block_by_hash(&self, hash: &B256) -> Option<SealedBlock> {
        Some(SealedBlock::new(self.headers.header(hash)?, self.body(hash)?))
    }

    /// Returns the canonical block at `number`.
    pub fn block_by_number(&self, number: BlockNumber) -> Option<SealedBlock> {
        self.block_by_hash(&self.canonical_hash(number)?)
    }

    /// Returns the total difficulty of the block with the given hash.
    pub fn td(&self, hash: &B256) -> Option<U256> {
        self.headers.td(hash)
    }

    /// Returns the receipts of the block with the given hash.
    pub fn receipts_by_hash(&self, hash: &B256) -> Option<Vec<Receipt>> {
        if let Some(receipts) = self.receipts.lock().get(hash) {
            return Some(receipts.clone());
        }
        let receipts = self.store.receipts(hash)?;
        self.receipts.lock().put(*hash, receipts.clone());
        Some(receipts)
    }

    /// Returns the canonical hash at `number`.
    pub fn canonical_hash(&self, number: BlockNumber) -> Option<B256> {
        self.headers.canonical_hash(number)
    }

    /// Returns the canonical location of a transaction.
    pub fn transaction_location(&self, tx_hash: &B256) -> Option<TxLookupEntry> {
        self.store.tx_lookup(tx_hash)
    }

    /// Returns true if the body of the block is stored.
    pub fn has_block(&self, hash: &B256) -> bool {
        self.bodies.lock().contains(hash) || self.store.body(hash).is_some()
    }

    /// Returns true if the state with the given root is available.
    pub fn has_state(&self, root: &B256) -> bool {
        self.state.has_state(root)
    }

    /// Returns true if the block is stored and its post-state is available.
    pub fn has_block_and_state(&self, hash: &B256) -> bool {
        self.headers
            .header(hash)
            .is_some_and(|header| self.validator.has_block_and_state(hash, &header.state_root))
    }

    /// Opens the state with the given root.
    pub fn state_at(&self, root: B256) -> Result<StateDb, StorageError> {
        StateDb::new(self.state.clone(), root)
    }

    /// Walks `distance` blocks back from the block `(hash, number)`.
    pub fn ancestor(&self, hash: B256, number: BlockNumber, distance: u64) -> Option<BlockNumHash> {
        self.headers.ancestor(hash, number, distance)
    }

    /// Returns true once fork choice is driven by [`Self::set_canonical`].
    pub fn is_merged(&self) -> bool {
        self.forkchoice.is_merged()
    }

    /// The most recently rejected blocks, newest first.
    pub fn bad_blocks(&self) -> Vec<BadBlock> {
        self.bad_blocks.list()
    }

    /// Number of side blocks awaiting deferred execution.
    pub fn buffered_blocks(&self) -> usize {
        self.inner.lock().buffer.len()
    }

    /// Subscribes to new canonical heads.
    pub fn subscribe_chain_head(&self) -> broadcast::Receiver<ChainHeadEvent> {
        self.notifications.subscribe_head()
    }

    /// Subscribes to side blocks.
    pub fn subscribe_chain_side(&self) -> broadcast::Receiver<ChainSideEvent> {
        self.notifications.subscribe_side()
    }

    /// Subscribes to blocks joining the canonical chain.
    pub fn subscribe_chain(&self) -> broadcast::Receiver<ChainEvent> {
        self.notifications.subscribe_chain()
    }

    /// Subscribes to logs added to the canonical chain.
    pub fn subscribe_logs(&self) -> broadcast::Receiver<Vec<ChainLog>> {
        self.notifications.subscribe_logs()
    }

    /// Subscribes to logs removed from the canonical chain by reorgs.
    pub fn subscribe_removed_logs(&self) -> broadcast::Receiver<Vec<ChainLog>> {
        self.notifications.subscribe_removed_logs()
    }

    /// Subscribes to reorgs.
    pub fn subscribe_chain_reorg(&self) -> broadcast::Receiver<ChainReorgEvent> {
        self.notifications.subscribe_reorg()
    }

    /// Stops the chain. Later insertions fail with [`BlockchainError::Stopped`].
    ///
    /// Waits for the running insertion, then persists the state of the block head so a restart
    /// resumes without replaying blocks. Every other retained state is released.
    pub fn stop(&self) -> Result<(), BlockchainError> {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let mut inner = self.inner.lock();
        let head = self.current_block();
        self.state.persist(head.state_root)?;
        inner.retention.clear();
        info!(
            target: "blockchain",
            number = head.number(),
            hash = %head.hash(),
            root = %head.state_root,
            "Persisted head state, blockchain stopped"
        );
        Ok(())
    }

    fn ensure_running(&self) -> Result<(), BlockchainError> {
        if self.stopped.load(Ordering::Acquire) {
            return Err(BlockchainError::Stopped);
        }
        Ok(())
    }

    /// Returns true if the block has receipts and its post-state is available.
    fn has_executed(&self, header: &SealedHeader) -> bool {
        self.state.has_state(&header.state_root) && self.store.receipts(&header.hash()).is_some()
    }

    /// Loads the block of `header` from the buffer or the store.
    fn load_block(&self, inner: &ChainInner, header: &SealedHeader) -> Result<SealedBlock, BlockchainError> {
        if let Some(block) = inner.buffer.block_by_hash(&header.hash()) {
            return Ok(block.clone());
        }
        let body = self.body(&header.hash()).ok_or(BlockchainError::MissingBody(header.hash()))?;
        Ok(SealedBlock::new(header.clone(), body))
    }

    /// Executes `block` on the state `parent_root` and validates the result.
    ///
    /// On success the post-state is committed to the state store and its root returned. Nothing
    /// is committed for an invalid block.
    fn execute(
        &self,
        block: &SealedBlock,
        parent_root: B256,
    ) -> Result<(ExecutionOutcome, B256), ExecutionFailure> {
        let mut state =
            self.state_at(parent_root).map_err(|err| ExecutionFailure::new(err, Vec::new()))?;
        let prefetcher = self.config.prefetch.enabled.then(|| {
            Arc::new(TriePrefetcher::new(
                self.state.clone(),
                parent_root,
                "chain",
                self.config.prefetch,
            ))
        });
        if let Some(prefetcher) = &prefetcher {
            state = state.with_prefetcher(prefetcher.clone());
        }

        let result = self.apply_and_validate(block, state);
        if let Some(prefetcher) = prefetcher {
            prefetcher.terminate(false);
            prefetcher.report();
        }

        let (outcome, commit) = result?;
        let root = match self.state.commit(commit) {
            Ok(root) => root,
            Err(err) => return Err(ExecutionFailure::new(err, outcome.receipts)),
        };
        Ok((outcome, root))
    }

    fn apply_and_validate(
        &self,
        block: &SealedBlock,
        mut state: StateDb,
    ) -> Result<(ExecutionOutcome, StateCommit), ExecutionFailure> {
        let outcome = self
            .processor
            .apply_block(block, &mut state)
            .map_err(|err| ExecutionFailure::new(err, Vec::new()))?;
        let commit = match state.commit() {
            Ok(commit) => commit,
            Err(err) => return Err(ExecutionFailure::new(err, outcome.receipts)),
        };
        if let Err(err) = self.validator.validate_state(block, commit.root(), &outcome) {
            return Err(ExecutionFailure::new(err, outcome.receipts));
        }
        Ok((outcome, commit))
    }

    /// Executes a stored block whose state is missing and writes its receipts.
    ///
    /// The parent state must be available.
    fn replay(&self, inner: &mut ChainInner, block: &SealedBlock) -> Result<(), BlockchainError> {
        let parent = self.headers.parent(&block.header)?;
        let (outcome, root) = match self.execute(block, parent.state_root) {
            Ok(executed) => executed,
            Err(failure) => return Err(self.reject(block, failure)),
        };
        let mut batch = StoreBatch::new();
        batch.put_block(block).put_receipts(block.hash(), outcome.receipts);
        self.store.commit(batch)?;
        inner.retention.track(block.number(), block.hash(), root)?;
        inner.buffer.remove_block(&block.hash());
        debug!(target: "blockchain", number = block.number(), hash = %block.hash(), "Replayed block");
        Ok(())
    }

    /// Makes the state of `header` available, replaying blocks from the nearest ancestor with
    /// state.
    fn recover_state(&self, inner: &mut ChainInner, header: &SealedHeader) -> Result<(), BlockchainError> {
        let mut pending = Vec::new();
        let mut current = header.clone();
        while !self.has_executed(&current) {
            if current.number() == 0 {
                break;
            }
            let parent = self.headers.parent(&current)?;
            pending.push(current);
            current = parent;
        }
        if pending.is_empty() {
            return Ok(());
        }
        debug!(
            target: "blockchain",
            from = current.number(),
            to = header.number(),
            "Recovering missing state"
        );
        let mut blocks = Vec::with_capacity(pending.len());
        for header in pending.iter().rev() {
            blocks.push(self.load_block(inner, header)?);
        }
        for (index, block) in blocks.iter().enumerate() {
            if let Err(err) = self.replay(inner, block) {
                if err.is_invalid_block() {
                    for descendant in &blocks[index + 1..] {
                        self.invalid.lock().put(descendant.hash(), block.hash());
                    }
                }
                return Err(err);
            }
        }
        Ok(())
    }

    /// Records `block` as invalid if `failure` proves it so and logs a diagnostic report.
    fn reject(&self, block: &SealedBlock, failure: ExecutionFailure) -> BlockchainError {
        let ExecutionFailure { error: err, receipts } = failure;
        if !err.is_invalid_block() {
            return err;
        }
        self.invalid.lock().put(block.hash(), block.hash());
        Metrics::record_invalid();
        let bad = BadBlock { block: block.clone(), receipts, error: err.clone() };
        error!(target: "blockchain", "{}", BadBlockReport::new(&self.spec, &bad));
        self.bad_blocks.record(bad);
        err
    }

    /// Returns the invalid block `hash` descends from, caching the verdict for `hash`.
    fn invalid_ancestor(&self, hash: B256, parent: B256) -> Option<B256> {
        let mut invalid = self.invalid.lock();
        if let Some(bad) = invalid.get(&hash) {
            return Some(*bad);
        }
        let bad = *invalid.get(&parent)?;
        invalid.put(hash, bad);
        Some(bad)
    }

    /// Releases states behind the retention window and freezes old canonical blocks. Runs after
    /// every advance of the block head.
    fn after_head_advance(&self, inner: &mut ChainInner, head: &SealedHeader) -> Result<(), BlockchainError> {
        let mut protected = inner.buffer.anchor_roots();
        protected.insert(head.state_root);
        inner.retention.prune(head.number(), &protected);

        let Some(threshold) = self.config.freezer_threshold else { return Ok(()) };
        let limit = head.number().saturating_sub(threshold);
        if limit <= self.store.ancients() {
            return Ok(());
        }
        let frozen = self.store.freeze(limit)?;
        self.headers.purge();
        self.bodies.lock().clear();
        self.receipts.lock().clear();
        if let Some(number) = frozen.checked_sub(1) {
            inner.buffer.clean_old_blocks(number);
            Metrics::record_buffered(inner.buffer.len());
        }
        Ok(())
    }
}

/// A block failed execution or post-state validation.
#[derive(Debug)]
struct ExecutionFailure {
    error: BlockchainError,
    /// Receipts produced before the failure was detected.
    receipts: Vec<Receipt>,
}

impl ExecutionFailure {
    fn new(error: impl Into<BlockchainError>, receipts: Vec<Receipt>) -> Self {
        Self { error: error.into(), receipts }
    }
}

impl From<BlockchainError> for ExecutionFailure {
    fn from(error: BlockchainError) -> Self {
        Self { error, receipts: Vec::new() }
    }
}
