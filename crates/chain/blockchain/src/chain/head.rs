//! Explicit head control.

use super::{BlockChain, ChainInner};
use crate::{BadHashes, BlockBuffer, BlockchainError, ChainHeads, HeadsUpdate};
use alloy_primitives::{B256, BlockNumber};
use meridian_storage::StoreBatch;
use tracing::{debug, info};

impl BlockChain {
    /// Makes the stored block `hash` the canonical head, regardless of total difficulty.
    ///
    /// Missing states along the chosen branch are rebuilt by replaying blocks. Returns the
    /// hash of the new head.
    ///
    /// # Errors
    ///
    /// Fails if the block is unknown, banned, descends from an invalid block or cannot be
    /// executed.
    pub fn set_canonical(&self, hash: B256) -> Result<B256, BlockchainError> {
        self.ensure_running()?;
        let mut inner = self.inner.lock();
        let header = self.headers.header(&hash).ok_or(BlockchainError::MissingHeader(hash))?;
        if BadHashes::contains(&hash) {
            return Err(BlockchainError::BannedHash(hash));
        }
        if let Some(bad) = self.invalid_ancestor(hash, header.parent_hash()) {
            return Err(BlockchainError::InvalidAncestor { bad });
        }
        if self.current_block().hash() == hash {
            return Ok(hash);
        }
        self.set_chain_head(&mut inner, &header)?;
        info!(target: "blockchain", number = header.number(), %hash, "Chain head set");
        Ok(hash)
    }

    /// Rewinds every head to at most `number`.
    ///
    /// Canonical blocks above `number` are deleted together with their transaction index and,
    /// if they were frozen, truncated from the ancient tier. The block head lands on the highest
    /// remaining block whose state is available.
    pub fn set_head(&self, number: BlockNumber) -> Result<(), BlockchainError> {
        let mut inner = self.inner.lock();
        self.rewind(&mut inner, number)
    }

    pub(super) fn rewind(
        &self,
        inner: &mut ChainInner,
        number: BlockNumber,
    ) -> Result<(), BlockchainError> {
        let current = self.heads.read().clone();
        let stored = self
            .store
            .head_header_hash()
            .and_then(|hash| self.headers.number(&hash))
            .unwrap_or_default();
        let upper = stored.max(current.header().number());

        if number + 1 < self.store.ancients() {
            self.store.truncate_ancients(number + 1)?;
            debug!(target: "blockchain", items = number + 1, "Truncated ancient blocks");
        }

        let mut batch = StoreBatch::new();
        let mut deleted = 0;
        for stale in number + 1..=upper {
            let Some(hash) = self.store.canonical_hash(stale) else { continue };
            if let Some(block) = self.store.block(&hash) {
                batch.delete_tx_lookups(&block);
            }
            batch.delete_canonical(stale).delete_block(hash);
            self.headers.forget(&hash);
            deleted += 1;
        }

        let target = self
            .headers
            .header_by_number(number.min(upper))
            .unwrap_or_else(|| self.genesis.header.clone());
        let mut block_head = target.clone();
        while !self.has_executed(&block_head) && block_head.number() > 0 {
            block_head = self.headers.parent(&block_head)?;
        }
        let snap_head = if self.store.receipts(&target.hash()).is_some() {
            target.clone()
        } else {
            block_head.clone()
        };
        batch
            .set_head_header(target.hash())
            .set_head_snap(snap_head.hash())
            .set_head_block(block_head.hash());
        self.store.commit(batch)?;

        let heads = ChainHeads::genesis(self.genesis.header.clone()).apply_update(HeadsUpdate {
            header: Some(target),
            snap: Some(snap_head),
            block: Some(block_head),
        })?;
        inner.retention.forget_above(number);
        inner.buffer = BlockBuffer::new(self.config.buffer_limit);
        self.headers.purge();
        self.bodies.lock().clear();
        self.receipts.lock().clear();

        info!(
            target: "blockchain",
            header = heads.header().number(),
            snap = heads.snap().number(),
            block = heads.block().number(),
            deleted,
            "Rewound chain"
        );
        *self.heads.write() = heads;
        Ok(())
    }

    /// Wipes the chain back to its genesis block.
    pub fn reset_with_genesis(&self) -> Result<(), BlockchainError> {
        let mut inner = self.inner.lock();
        self.write_genesis()?;
        self.rewind(&mut inner, 0)?;
        inner.retention.clear();
        Ok(())
    }

    /// Hands fork choice over to [`Self::set_canonical`]. Total difficulty no longer moves the
    /// head once set.
    pub fn set_merged(&self) {
        self.forkchoice.set_merged();
    }
}
