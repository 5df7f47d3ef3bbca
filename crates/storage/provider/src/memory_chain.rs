//! In-memory chain store with a live and an ancient tier.

use crate::{ChainReader, ChainWriter, StorageError, StoreBatch, StoreOp, TxLookupEntry};
use alloy_primitives::{B256, BlockNumber, U256};
use meridian_primitives::{BlockBody, Receipt, SealedHeader};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info};

#[derive(Debug, Clone)]
struct AncientEntry {
    header: SealedHeader,
    body: BlockBody,
    receipts: Vec<Receipt>,
    td: U256,
}

#[derive(Debug, Default)]
struct Tables {
    headers: HashMap<B256, SealedHeader>,
    numbers: HashMap<B256, BlockNumber>,
    bodies: HashMap<B256, BlockBody>,
    receipts: HashMap<B256, Vec<Receipt>>,
    tds: HashMap<B256, U256>,
    canonical: BTreeMap<BlockNumber, B256>,
    tx_lookups: HashMap<B256, TxLookupEntry>,
    head_header: Option<B256>,
    head_snap: Option<B256>,
    head_block: Option<B256>,
    ancients: Vec<AncientEntry>,
}

impl Tables {
    fn ancient(&self, hash: &B256) -> Option<&AncientEntry> {
        let number = *self.numbers.get(hash)?;
        self.ancients.get(number as usize).filter(|entry| entry.header.hash() == *hash)
    }

    fn frozen(&self) -> u64 {
        self.ancients.len() as u64
    }

    fn check(&self, op: &StoreOp) -> Result<(), StorageError> {
        match op {
            StoreOp::Canonical(number, _) | StoreOp::DeleteCanonical(number)
                if *number < self.frozen() =>
            {
                Err(StorageError::ConflictError(format!(
                    "canonical mapping of frozen block {number} is immutable"
                )))
            }
            _ => Ok(()),
        }
    }

    fn apply(&mut self, op: StoreOp) {
        match op {
            StoreOp::Header(header) => {
                self.numbers.insert(header.hash(), header.number());
                self.headers.insert(header.hash(), header);
            }
            StoreOp::Body(hash, body) => {
                self.bodies.insert(hash, body);
            }
            StoreOp::Receipts(hash, receipts) => {
                self.receipts.insert(hash, receipts);
            }
            StoreOp::Td(hash, td) => {
                self.tds.insert(hash, td);
            }
            StoreOp::Canonical(number, hash) => {
                self.canonical.insert(number, hash);
            }
            StoreOp::DeleteCanonical(number) => {
                self.canonical.remove(&number);
            }
            StoreOp::TxLookups(block_hash, block_number, hashes) => {
                for (index, tx_hash) in hashes.into_iter().enumerate() {
                    self.tx_lookups.insert(tx_hash, TxLookupEntry { block_hash, block_number, index });
                }
            }
            StoreOp::DeleteTxLookups(hashes) => {
                for tx_hash in hashes {
                    self.tx_lookups.remove(&tx_hash);
                }
            }
            StoreOp::DeleteBlock(hash) => {
                if self.headers.remove(&hash).is_some() {
                    self.numbers.remove(&hash);
                }
                self.bodies.remove(&hash);
                self.receipts.remove(&hash);
                self.tds.remove(&hash);
            }
            StoreOp::HeadHeader(hash) => self.head_header = Some(hash),
            StoreOp::HeadSnap(hash) => self.head_snap = Some(hash),
            StoreOp::HeadBlock(hash) => self.head_block = Some(hash),
        }
    }
}

/// A [`ChainWriter`] keeping every table in memory.
///
/// Recent blocks live in hash-keyed tables. [`ChainWriter::freeze`] moves old canonical blocks
/// into an append-only vector indexed by number and drops side blocks at frozen heights.
#[derive(Debug, Default)]
pub struct MemoryChainStore {
    tables: RwLock<Tables>,
}

impl MemoryChainStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of blocks held in the live tier.
    pub fn live_len(&self) -> usize {
        self.tables.read().headers.len()
    }
}

impl ChainReader for MemoryChainStore {
    fn header(&self, hash: &B256) -> Option<SealedHeader> {
        let tables = self.tables.read();
        tables
            .headers
            .get(hash)
            .cloned()
            .or_else(|| tables.ancient(hash).map(|entry| entry.header.clone()))
    }

    fn header_number(&self, hash: &B256) -> Option<BlockNumber> {
        self.tables.read().numbers.get(hash).copied()
    }

    fn body(&self, hash: &B256) -> Option<BlockBody> {
        let tables = self.tables.read();
        tables
            .bodies
            .get(hash)
            .cloned()
            .or_else(|| tables.ancient(hash).map(|entry| entry.body.clone()))
    }

    fn receipts(&self, hash: &B256) -> Option<Vec<Receipt>> {
        let tables = self.tables.read();
        tables
            .receipts
            .get(hash)
            .cloned()
            .or_else(|| tables.ancient(hash).map(|entry| entry.receipts.clone()))
    }

    fn td(&self, hash: &B256) -> Option<U256> {
        let tables = self.tables.read();
        tables.tds.get(hash).copied().or_else(|| tables.ancient(hash).map(|entry| entry.td))
    }

    fn canonical_hash(&self, number: BlockNumber) -> Option<B256> {
        let tables = self.tables.read();
        if let Some(entry) = tables.ancients.get(number as usize) {
            return Some(entry.header.hash());
        }
        tables.canonical.get(&number).copied()
    }

    fn tx_lookup(&self, tx_hash: &B256) -> Option<TxLookupEntry> {
        self.tables.read().tx_lookups.get(tx_hash).copied()
    }

    fn head_header_hash(&self) -> Option<B256> {
        self.tables.read().head_header
    }

    fn head_snap_hash(&self) -> Option<B256> {
        self.tables.read().head_snap
    }

    fn head_block_hash(&self) -> Option<B256> {
        self.tables.read().head_block
    }

    fn ancients(&self) -> u64 {
        self.tables.read().frozen()
    }
}

impl ChainWriter for MemoryChainStore {
    fn commit(&self, batch: StoreBatch) -> Result<(), StorageError> {
        let mut tables = self.tables.write();
        for op in batch.ops() {
            tables.check(op)?;
        }
        for op in batch.into_ops() {
            tables.apply(op);
        }
        Ok(())
    }

    fn freeze(&self, limit: BlockNumber) -> Result<u64, StorageError> {
        let mut tables = self.tables.write();
        let start = tables.frozen();
        while tables.frozen() < limit {
            let number = tables.frozen();
            let Some(hash) = tables.canonical.get(&number).copied() else { break };
            let (Some(body), Some(td)) = (tables.bodies.get(&hash), tables.tds.get(&hash)) else {
                break;
            };
            let Some(header) = tables.headers.get(&hash) else {
                return Err(StorageError::EntryNotFound(format!("header {hash}")));
            };
            let entry = AncientEntry {
                header: header.clone(),
                body: body.clone(),
                receipts: tables.receipts.get(&hash).cloned().unwrap_or_default(),
                td: *td,
            };
            tables.ancients.push(entry);
            tables.canonical.remove(&number);
            tables.headers.remove(&hash);
            tables.bodies.remove(&hash);
            tables.receipts.remove(&hash);
            tables.tds.remove(&hash);
        }

        let frozen = tables.frozen();
        if frozen > start {
            let dangling = tables
                .headers
                .values()
                .filter(|header| header.number() < frozen)
                .map(|header| header.hash())
                .collect::<Vec<_>>();
            for hash in &dangling {
                tables.apply(StoreOp::DeleteBlock(*hash));
            }
            info!(target: "storage", from = start, to = frozen, dangling = dangling.len(), "Froze canonical blocks");
        }
        Ok(frozen)
    }

    fn truncate_ancients(&self, items: u64) -> Result<(), StorageError> {
        let mut tables = self.tables.write();
        if items >= tables.frozen() {
            return Ok(());
        }
        let removed = tables.ancients.split_off(items as usize);
        for entry in &removed {
            let hash = entry.header.hash();
            tables.numbers.remove(&hash);
            for tx in &entry.body.transactions {
                tables.tx_lookups.remove(&tx.hash());
            }
        }
        debug!(target: "storage", items, removed = removed.len(), "Truncated ancient tier");
        Ok(())
    }
}
