//! Chain store interfaces.

use crate::StorageError;
use alloy_primitives::{B256, BlockNumber, U256};
use meridian_primitives::{BlockBody, Receipt, SealedBlock, SealedHeader};

/// Location of a transaction in the canonical chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxLookupEntry {
    /// Hash of the including block.
    pub block_hash: B256,
    /// Number of the including block.
    pub block_number: BlockNumber,
    /// Index of the transaction in the block.
    pub index: usize,
}

/// A single write in a [`StoreBatch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOp {
    /// Stores a header and its hash to number mapping.
    Header(SealedHeader),
    /// Stores a block body.
    Body(B256, BlockBody),
    /// Stores the receipts of a block.
    Receipts(B256, Vec<Receipt>),
    /// Stores the total difficulty of a block.
    Td(B256, U256),
    /// Maps a number to a canonical hash.
    Canonical(BlockNumber, B256),
    /// Clears the canonical mapping of a number.
    DeleteCanonical(BlockNumber),
    /// Indexes the transactions of a canonical block.
    TxLookups(B256, BlockNumber, Vec<B256>),
    /// Drops transaction index entries.
    DeleteTxLookups(Vec<B256>),
    /// Removes every record of a block.
    DeleteBlock(B256),
    /// Moves the header head marker.
    HeadHeader(B256),
    /// Moves the snap head marker.
    HeadSnap(B256),
    /// Moves the block head marker.
    HeadBlock(B256),
}

/// A set of writes applied atomically.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct StoreBatch {
    ops: Vec<StoreOp>,
}

impl StoreBatch {
    /// Creates an empty batch.
    pub const fn new() -> Self {
        Self { ops: Vec::new() }
    }

    /// Returns the pending writes.
    pub fn ops(&self) -> &[StoreOp] {
        &self.ops
    }

    /// Returns true if the batch holds no writes.
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Consumes the batch.
    pub fn into_ops(self) -> Vec<StoreOp> {
        self.ops
    }

    /// Queues an arbitrary write.
    pub fn push(&mut self, op: StoreOp) -> &mut Self {
        self.ops.push(op);
        self
    }

    /// Queues a header write.
    pub fn put_header(&mut self, header: SealedHeader) -> &mut Self {
        self.push(StoreOp::Header(header))
    }

    /// Queues a header and body write.
    pub fn put_block(&mut self, block: &SealedBlock) -> &mut Self {
        self.put_header(block.header.clone()).push(StoreOp::Body(block.hash(), block.body.clone()))
    }

    /// Queues a receipts write.
    pub fn put_receipts(&mut self, hash: B256, receipts: Vec<Receipt>) -> &mut Self {
        self.push(StoreOp::Receipts(hash, receipts))
    }

    /// Queues a total difficulty write.
    pub fn put_td(&mut self, hash: B256, td: U256) -> &mut Self {
        self.push(StoreOp::Td(hash, td))
    }

    /// Queues a canonical mapping write.
    pub fn put_canonical(&mut self, number: BlockNumber, hash: B256) -> &mut Self {
        self.push(StoreOp::Canonical(number, hash))
    }

    /// Queues a canonical mapping removal.
    pub fn delete_canonical(&mut self, number: BlockNumber) -> &mut Self {
        self.push(StoreOp::DeleteCanonical(number))
    }

    /// Queues the transaction index of a canonical block.
    pub fn put_tx_lookups(&mut self, block: &SealedBlock) -> &mut Self {
        let hashes = block.body.transactions.iter().map(|tx| tx.hash()).collect();
        self.push(StoreOp::TxLookups(block.hash(), block.number(), hashes))
    }

    /// Queues the removal of the transaction index of a block.
    pub fn delete_tx_lookups(&mut self, block: &SealedBlock) -> &mut Self {
        let hashes = block.body.transactions.iter().map(|tx| tx.hash()).collect();
        self.push(StoreOp::DeleteTxLookups(hashes))
    }

    /// Queues the removal of a block.
    pub fn delete_block(&mut self, hash: B256) -> &mut Self {
        self.push(StoreOp::DeleteBlock(hash))
    }

    /// Queues a header head update.
    pub fn set_head_header(&mut self, hash: B256) -> &mut Self {
        self.push(StoreOp::HeadHeader(hash))
    }

    /// Queues a snap head update.
    pub fn set_head_snap(&mut self, hash: B256) -> &mut Self {
        self.push(StoreOp::HeadSnap(hash))
    }

    /// Queues a block head update.
    pub fn set_head_block(&mut self, hash: B256) -> &mut Self {
        self.push(StoreOp::HeadBlock(hash))
    }
}

/// Read access to the chain store.
///
/// Lookups return `None` for unknown entries. Entries moved to the ancient tier stay readable.
#[auto_impl::auto_impl(&, Arc)]
pub trait ChainReader: Send + Sync + std::fmt::Debug {
    /// Returns the header with the given hash.
    fn header(&self, hash: &B256) -> Option<SealedHeader>;

    /// Returns the number of the block with the given hash.
    fn header_number(&self, hash: &B256) -> Option<BlockNumber>;

    /// Returns the body of the block with the given hash.
    fn body(&self, hash: &B256) -> Option<BlockBody>;

    /// Returns the receipts of the block with the given hash.
    fn receipts(&self, hash: &B256) -> Option<Vec<Receipt>>;

    /// Returns the total difficulty of the block with the given hash.
    fn td(&self, hash: &B256) -> Option<U256>;

    /// Returns the canonical hash at `number`.
    fn canonical_hash(&self, number: BlockNumber) -> Option<B256>;

    /// Returns where a canonical transaction was included.
    fn tx_lookup(&self, tx_hash: &B256) -> Option<TxLookupEntry>;

    /// Returns the persisted header head marker.
    fn head_header_hash(&self) -> Option<B256>;

    /// Returns the persisted snap head marker.
    fn head_snap_hash(&self) -> Option<B256>;

    /// Returns the persisted block head marker.
    fn head_block_hash(&self) -> Option<B256>;

    /// Number of blocks in the ancient tier. Blocks `0..ancients()` are frozen.
    fn ancients(&self) -> u64;

    /// Returns the full block with the given hash.
    fn block(&self, hash: &B256) -> Option<SealedBlock> {
        let header = self.header(hash)?;
        let body = self.body(hash)?;
        Some(SealedBlock::new(header, body))
    }
}

/// Write access to the chain store.
#[auto_impl::auto_impl(&, Arc)]
pub trait ChainWriter: ChainReader {
    /// Applies every write of the batch atomically.
    fn commit(&self, batch: StoreBatch) -> Result<(), StorageError>;

    /// Moves canonical blocks below `limit` from the live tier to the ancient tier. Returns the
    /// new ancient length.
    fn freeze(&self, limit: BlockNumber) -> Result<u64, StorageError>;

    /// Drops ancient blocks at or above `items`, leaving `items` frozen blocks.
    fn truncate_ancients(&self, items: u64) -> Result<(), StorageError>;
}
