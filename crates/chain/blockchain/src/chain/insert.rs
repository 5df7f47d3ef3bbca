//! Full block insertion.

use super::{BlockChain, ChainInner, WriteStatus};
use crate::{
    BadHashes, BlockchainError, InsertChainError, StateAnchor, ValidationError, metrics::Metrics,
};
use alloy_primitives::U256;
use meridian_primitives::{BlockNumHash, SealedBlock, SealedHeader};
use meridian_storage::StoreBatch;
use std::time::Instant;
use tracing::{debug, trace};

impl BlockChain {
    /// Inserts a batch of consecutive blocks.
    ///
    /// Every block is checked against the banned hashes, the invalid block cache, its parent
    /// header and the consensus engine, then its body is validated. Blocks building on a state
    /// that is available are executed right away and become canonical if their branch outweighs
    /// the current head. Blocks whose parent state was pruned are stored and buffered, their
    /// execution is deferred until their branch wins fork choice.
    ///
    /// Returns one [`WriteStatus`] per accepted block. Re-inserting a block whose state is
    /// already known yields [`WriteStatus::Known`] and leaves the heads untouched.
    ///
    /// # Errors
    ///
    /// The first failure stops the batch. The error carries its index. Blocks before it stay
    /// committed, no block at or after it is written.
    pub fn insert_chain(&self, blocks: Vec<SealedBlock>) -> Result<Vec<WriteStatus>, InsertChainError> {
        let Some(first) = blocks.first() else { return Ok(Vec::new()) };
        let (first, parent) = (first.num_hash(), first.header.parent_num_hash());
        self.ensure_running().map_err(|err| InsertChainError::new(0, first, err))?;
        check_contiguous(blocks.iter().map(|block| &block.header))?;

        let mut inner = self.inner.lock();
        self.verify_ancestor(parent).map_err(|err| InsertChainError::new(0, first, err))?;

        let mut statuses = Vec::with_capacity(blocks.len());
        for (index, block) in blocks.into_iter().enumerate() {
            let num_hash = block.num_hash();
            let started = Instant::now();
            let status = self
                .insert_block(&mut inner, block)
                .map_err(|err| InsertChainError::new(index, num_hash, err))?;
            Metrics::record_inserted(status.metric_label());
            Metrics::record_insert(started.elapsed());
            trace!(target: "blockchain", number = num_hash.number, hash = %num_hash.hash, %status, "Inserted block");
            statuses.push(status);
        }
        Ok(statuses)
    }

    /// Rejects the batch unless its parent is attested.
    pub(super) fn verify_ancestor(
        &self,
        parent: BlockNumHash,
    ) -> Result<(), BlockchainError> {
        match &self.verifier {
            Some(verifier) if !verifier.is_attested(&parent) => {
                Err(BlockchainError::AncestorNotAttested(parent))
            }
            _ => Ok(()),
        }
    }

    fn insert_block(
        &self,
        inner: &mut ChainInner,
        block: SealedBlock,
    ) -> Result<WriteStatus, BlockchainError> {
        let hash = block.hash();
        if BadHashes::contains(&hash) {
            return Err(BlockchainError::BannedHash(hash));
        }
        if let Some(bad) = self.invalid_ancestor(hash, block.parent_hash()) {
            return Err(BlockchainError::InvalidAncestor { bad });
        }

        let parent = match self.headers.verify_header(&block.header) {
            Ok(parent) => parent,
            Err(err) => return Err(self.reject(&block, err.into())),
        };
        match self.validator.validate_body(&block) {
            Ok(()) => self.insert_executable(inner, block, &parent),
            Err(ValidationError::KnownBlock(_)) => self.insert_known(inner, &block),
            Err(ValidationError::PrunedAncestor { .. }) => self.insert_buffered(inner, block),
            Err(err) => Err(self.reject(&block, BlockchainError::from(err).into())),
        }
    }

    /// Executes a block whose parent state is available and stores it with its receipts.
    fn insert_executable(
        &self,
        inner: &mut ChainInner,
        block: SealedBlock,
        parent: &SealedHeader,
    ) -> Result<WriteStatus, BlockchainError> {
        let td = self.headers.compute_td(&block.header)?;
        let (outcome, root) =
            self.execute(&block, parent.state_root).map_err(|failure| self.reject(&block, failure))?;

        let hash = block.hash();
        let mut batch = StoreBatch::new();
        batch.put_block(&block).put_td(hash, td).put_receipts(hash, outcome.receipts);
        self.store.commit(batch)?;
        self.headers.cache(&block.header, td);
        inner.retention.track(block.number(), hash, root)?;

        if self.forkchoice.reorg_needed(self.head_td(), td) {
            self.set_chain_head(inner, &block.header)?;
            return Ok(WriteStatus::Canonical);
        }
        debug!(target: "blockchain", number = block.number(), %hash, %td, "Inserted side block");
        self.notifications.side(block);
        Ok(WriteStatus::Side)
    }

    /// Handles a block whose body and state are already stored.
    fn insert_known(
        &self,
        inner: &mut ChainInner,
        block: &SealedBlock,
    ) -> Result<WriteStatus, BlockchainError> {
        let td = self.headers.td(&block.hash()).ok_or(BlockchainError::MissingHeader(block.hash()))?;
        if self.forkchoice.reorg_needed(self.head_td(), td) {
            self.set_chain_head(inner, &block.header)?;
            return Ok(WriteStatus::Canonical);
        }
        trace!(target: "blockchain", number = block.number(), hash = %block.hash(), "Skipped known block");
        Ok(WriteStatus::Known)
    }

    /// Stores a block whose parent state is missing without executing it.
    fn insert_buffered(
        &self,
        inner: &mut ChainInner,
        block: SealedBlock,
    ) -> Result<WriteStatus, BlockchainError> {
        let td = self.headers.compute_td(&block.header)?;
        let hash = block.hash();
        let mut batch = StoreBatch::new();
        batch.put_block(&block).put_td(hash, td);
        self.store.commit(batch)?;
        self.headers.cache(&block.header, td);

        if self.forkchoice.reorg_needed(self.head_td(), td) {
            self.set_chain_head(inner, &block.header)?;
            return Ok(WriteStatus::Canonical);
        }

        let anchor = match inner.buffer.anchor(&block.parent_hash()) {
            Some(anchor) => anchor,
            None => self.state_anchor(&block.header)?,
        };
        debug!(
            target: "blockchain",
            number = block.number(),
            %hash,
            anchor = anchor.block.number,
            "Buffered side block with pruned ancestor"
        );
        self.notifications.side(block.clone());
        if let Some(evicted) = inner.buffer.insert_block(block, anchor) {
            debug!(target: "blockchain", number = evicted.number(), hash = %evicted.hash(), "Evicted buffered block");
        }
        Metrics::record_buffered(inner.buffer.len());
        Ok(WriteStatus::Buffered)
    }

    /// Finds the nearest ancestor of `header` whose state is available.
    fn state_anchor(&self, header: &SealedHeader) -> Result<StateAnchor, BlockchainError> {
        let mut current = self.headers.parent(header)?;
        while !self.has_executed(&current) && current.number() > 0 {
            current = self.headers.parent(&current)?;
        }
        Ok(StateAnchor { block: current.num_hash(), state_root: current.state_root })
    }

    /// Total difficulty of the block head.
    pub(super) fn head_td(&self) -> U256 {
        self.headers.td(&self.heads.read().block().hash()).unwrap_or_default()
    }
}

/// Checks that every header builds on the one before it.
pub(super) fn check_contiguous<'a>(
    headers: impl IntoIterator<Item = &'a SealedHeader>,
) -> Result<(), InsertChainError> {
    let headers = headers.into_iter().collect::<Vec<_>>();
    for (index, pair) in headers.windows(2).enumerate() {
        let (prev, next) = (pair[0], pair[1]);
        if next.number() != prev.number() + 1 || next.parent_hash() != prev.hash() {
            return Err(InsertChainError::new(
                index + 1,
                next.num_hash(),
                BlockchainError::NonContiguous { prev: prev.num_hash(), next: next.num_hash() },
            ));
        }
    }
    Ok(())
}
