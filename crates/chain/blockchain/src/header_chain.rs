//! Header index and total difficulty ledger.

use crate::{BlockchainError, CacheConfig, ValidationError};
use alloy_primitives::{B256, BlockNumber, U256};
use lru::LruCache;
use meridian_consensus::{Consensus, HeaderProvider};
use meridian_primitives::{BlockNumHash, Header, SealedHeader};
use meridian_storage::{ChainWriter, StoreBatch};
use parking_lot::Mutex;
use std::{num::NonZeroUsize, sync::Arc};
use tracing::trace;

fn lru<K: std::hash::Hash + Eq, V>(size: usize) -> Mutex<LruCache<K, V>> {
    Mutex::new(LruCache::new(NonZeroUsize::new(size).unwrap_or(NonZeroUsize::MIN)))
}

/// Caching index over the headers of the chain store.
///
/// Every header is addressable by hash, canonical headers also by number. The total difficulty
/// of a header is the total difficulty of its parent plus the weight the consensus engine
/// assigns to the header.
#[derive(Debug)]
pub struct HeaderChain {
    store: Arc<dyn ChainWriter>,
    consensus: Arc<dyn Consensus>,
    headers: Mutex<LruCache<B256, SealedHeader>>,
    tds: Mutex<LruCache<B256, U256>>,
    numbers: Mutex<LruCache<B256, BlockNumber>>,
}

impl HeaderChain {
    /// Creates an index over `store`.
    pub fn new(store: Arc<dyn ChainWriter>, consensus: Arc<dyn Consensus>, cache: &CacheConfig) -> Self {
        Self {
            store,
            consensus,
            headers: lru(cache.headers),
            tds: lru(cache.tds),
            numbers: lru(cache.numbers),
        }
    }

    /// The underlying store.
    pub const fn store(&self) -> &Arc<dyn ChainWriter> {
        &self.store
    }

    /// The consensus engine headers are verified with.
    pub const fn consensus(&self) -> &Arc<dyn Consensus> {
        &self.consensus
    }

    /// Returns the header with the given hash.
    pub fn header(&self, hash: &B256) -> Option<SealedHeader> {
        if let Some(header) = self.headers.lock().get(hash) {
            return Some(header.clone());
        }
        let header = self.store.header(hash)?;
        self.headers.lock().put(*hash, header.clone());
        Some(header)
    }

    /// Returns the canonical header at `number`.
    pub fn header_by_number(&self, number: BlockNumber) -> Option<SealedHeader> {
        self.header(&self.store.canonical_hash(number)?)
    }

    /// Returns the number of the header with the given hash.
    pub fn number(&self, hash: &B256) -> Option<BlockNumber> {
        if let Some(number) = self.numbers.lock().get(hash) {
            return Some(*number);
        }
        let number = self.store.header_number(hash)?;
        self.numbers.lock().put(*hash, number);
        Some(number)
    }

    /// Returns true if the header is known.
    pub fn has_header(&self, hash: &B256) -> bool {
        self.number(hash).is_some()
    }

    /// Returns the canonical hash at `number`.
    pub fn canonical_hash(&self, number: BlockNumber) -> Option<B256> {
        self.store.canonical_hash(number)
    }

    /// Returns true if `block` is part of the canonical chain.
    pub fn is_canonical(&self, block: &BlockNumHash) -> bool {
        self.canonical_hash(block.number) == Some(block.hash)
    }

    /// Returns the total difficulty of the header with the given hash.
    pub fn td(&self, hash: &B256) -> Option<U256> {
        if let Some(td) = self.tds.lock().get(hash) {
            return Some(*td);
        }
        let td = self.store.td(hash)?;
        self.tds.lock().put(*hash, td);
        Some(td)
    }

    /// Walks `distance` blocks back from the header `(hash, number)`.
    ///
    /// Canonical headers resolve through the number index. Side headers are walked parent by
    /// parent until the walk joins the canonical chain.
    pub fn ancestor(&self, hash: B256, number: BlockNumber, distance: u64) -> Option<BlockNumHash> {
        if distance > number {
            return None;
        }
        let target = number - distance;
        let (mut hash, mut number) = (hash, number);
        while number > target {
            if self.canonical_hash(number) == Some(hash) {
                return self.canonical_hash(target).map(|hash| BlockNumHash::new(target, hash));
            }
            let header = self.header(&hash)?;
            hash = header.parent_hash();
            number -= 1;
        }
        Some(BlockNumHash::new(number, hash))
    }

    /// Returns the parent of `header`.
    ///
    /// # Errors
    ///
    /// [`ValidationError::UnknownAncestor`] if the parent header is not known.
    pub fn parent(&self, header: &SealedHeader) -> Result<SealedHeader, BlockchainError> {
        self.header(&header.parent_hash())
            .filter(|parent| parent.number() + 1 == header.number())
            .ok_or(ValidationError::UnknownAncestor { parent: header.parent_hash() }.into())
    }

    /// Verifies `header` against its parent with the consensus engine and returns the parent.
    pub fn verify_header(&self, header: &SealedHeader) -> Result<SealedHeader, BlockchainError> {
        let parent = self.parent(header)?;
        self.consensus.verify_header(header, &parent)?;
        Ok(parent)
    }

    /// Computes the total difficulty of `header` from its parent.
    ///
    /// # Errors
    ///
    /// [`ValidationError::UnknownAncestor`] if the parent has no recorded total difficulty.
    pub fn compute_td(&self, header: &Header) -> Result<U256, BlockchainError> {
        let parent_td = self
            .td(&header.parent_hash)
            .ok_or(ValidationError::UnknownAncestor { parent: header.parent_hash })?;
        Ok(parent_td + self.consensus.block_weight(header))
    }

    /// Queues `header` and its total difficulty into `batch` and caches both.
    pub fn write_header(&self, batch: &mut StoreBatch, header: &SealedHeader, td: U256) {
        batch.put_header(header.clone()).put_td(header.hash(), td);
        self.cache(header, td);
    }

    /// Caches a header that was committed by other means.
    pub fn cache(&self, header: &SealedHeader, td: U256) {
        let hash = header.hash();
        self.headers.lock().put(hash, header.clone());
        self.numbers.lock().put(hash, header.number());
        self.tds.lock().put(hash, td);
        trace!(target: "header_chain", number = header.number(), %hash, %td, "Cached header");
    }

    /// Drops every cached entry of `hash`.
    pub fn forget(&self, hash: &B256) {
        self.headers.lock().pop(hash);
        self.numbers.lock().pop(hash);
        self.tds.lock().pop(hash);
    }

    /// Drops every cached entry.
    pub fn purge(&self) {
        self.headers.lock().clear();
        self.numbers.lock().clear();
        self.tds.lock().clear();
    }
}

impl HeaderProvider for HeaderChain {
    fn header(&self, hash: &B256) -> Option<SealedHeader> {
        Self::header(self, hash)
    }

    fn ommers(&self, hash: &B256) -> Option<Vec<Header>> {
        self.store.body(hash).map(|body| body.ommers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::FakeConsensus;
    use meridian_storage::MemoryChainStore;
    use proptest::prelude::*;

    fn header_chain() -> (HeaderChain, SealedHeader) {
        let store = Arc::new(MemoryChainStore::new());
        let chain = HeaderChain::new(store, Arc::new(FakeConsensus::default()), &CacheConfig::default());
        let genesis = SealedHeader::seal_slow(Header { difficulty: U256::from(1), ..Default::default() });
        let mut batch = StoreBatch::new();
        chain.write_header(&mut batch, &genesis, genesis.difficulty);
        batch.put_canonical(0, genesis.hash());
        chain.store().commit(batch).unwrap();
        (chain, genesis)
    }

    fn child(parent: &SealedHeader, difficulty: u64, salt: u8) -> SealedHeader {
        SealedHeader::seal_slow(Header {
            parent_hash: parent.hash(),
            number: parent.number() + 1,
            timestamp: parent.timestamp + 1,
            difficulty: U256::from(difficulty),
            extra_data: vec![salt].into(),
            ..Default::default()
        })
    }

    fn insert(chain: &HeaderChain, header: &SealedHeader, canonical: bool) -> U256 {
        chain.verify_header(header).unwrap();
        let td = chain.compute_td(header).unwrap();
        let mut batch = StoreBatch::new();
        chain.write_header(&mut batch, header, td);
        if canonical {
            batch.put_canonical(header.number(), header.hash());
        }
        chain.store().commit(batch).unwrap();
        td
    }

    proptest! {
        #[test]
        fn test_td_strictly_increases(difficulties in proptest::collection::vec(1u64..1_000_000, 1..64)) {
            let (chain, genesis) = header_chain();
            let mut parent = genesis;
            let mut parent_td = chain.td(&parent.hash()).unwrap();
            for difficulty in difficulties {
                let header = child(&parent, difficulty, 0);
                let td = insert(&chain, &header, true);
                prop_assert!(td > parent_td);
                prop_assert_eq!(td, parent_td + U256::from(difficulty));
                parent_td = td;
                parent = header;
            }
        }
    }

    #[test]
    fn test_unknown_parent() {
        let (chain, genesis) = header_chain();
        let orphan = child(&child(&genesis, 1, 0), 1, 0);
        let err = chain.verify_header(&orphan).unwrap_err();
        assert_eq!(
            err,
            BlockchainError::Validation(ValidationError::UnknownAncestor {
                parent: orphan.parent_hash()
            })
        );
    }

    #[test]
    fn test_ancestor_canonical_and_side() {
        let (chain, genesis) = header_chain();
        let mut canonical = vec![genesis.clone()];
        for _ in 0..6 {
            let header = child(canonical.last().unwrap(), 1, 0);
            insert(&chain, &header, true);
            canonical.push(header);
        }
        let mut side = vec![canonical[2].clone()];
        for _ in 0..3 {
            let header = child(side.last().unwrap(), 2, 1);
            insert(&chain, &header, false);
            side.push(header);
        }

        let head = canonical.last().unwrap();
        assert_eq!(chain.ancestor(head.hash(), head.number(), 4), Some(canonical[2].num_hash()));
        let tip = side.last().unwrap();
        assert_eq!(tip.number(), 5);
        assert_eq!(chain.ancestor(tip.hash(), tip.number(), 2), Some(side[1].num_hash()));
        assert_eq!(chain.ancestor(tip.hash(), tip.number(), 4), Some(canonical[1].num_hash()));
        assert_eq!(chain.ancestor(tip.hash(), tip.number(), 6), None);
        assert_eq!(chain.header_by_number(3), Some(canonical[3].clone()));
        assert!(!chain.is_canonical(&side[1].num_hash()));
    }

    #[test]
    fn test_forget_falls_back_to_store() {
        let (chain, genesis) = header_chain();
        let header = child(&genesis, 5, 0);
        let td = insert(&chain, &header, false);
        chain.forget(&header.hash());
        assert_eq!(chain.td(&header.hash()), Some(td));
        assert_eq!(chain.number(&header.hash()), Some(1));
    }
}
