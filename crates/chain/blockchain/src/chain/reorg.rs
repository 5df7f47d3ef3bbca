//! Moving the canonical head.

use super::{BlockChain, ChainInner};
use crate::{
    BlockchainError, HeadsUpdate,
    metrics::Metrics,
    notifications::{block_logs, reorg_logs},
};
use meridian_primitives::{Receipt, SealedBlock, SealedHeader};
use meridian_storage::StoreBatch;
use tracing::{debug, info, warn};

/// Depth from which a reorg is logged as a warning.
const DEEP_REORG_DEPTH: usize = 63;

impl BlockChain {
    /// Makes `head` the canonical block head.
    ///
    /// Walks back from the current head and from `head` to their common ancestor. Blocks of
    /// the new branch missing their state are replayed first, which also covers branches whose
    /// fork point is behind the retention window. The canonical mapping and the transaction
    /// index are then rewritten in a single batch, and the removed and added logs published.
    ///
    /// `head` may be an ancestor of the current head, in which case the chain is shortened.
    pub(super) fn set_chain_head(
        &self,
        inner: &mut ChainInner,
        head: &SealedHeader,
    ) -> Result<(), BlockchainError> {
        let current = self.heads.read().clone();
        let (old_chain, new_chain) = self.diverging_branches(current.block(), head)?;
        self.recover_state(inner, head)?;

        let old_chain = old_chain
            .iter()
            .map(|header| self.load_block(inner, header))
            .collect::<Result<Vec<_>, _>>()?;
        let new_chain = new_chain
            .iter()
            .map(|header| self.load_block(inner, header))
            .collect::<Result<Vec<_>, _>>()?;

        // Headers imported past the new head stay canonical if they extend it.
        let keep_headers = old_chain.is_empty() &&
            current.header().number() > head.number() &&
            self.headers.is_canonical(&head.num_hash());

        let mut batch = StoreBatch::new();
        for block in old_chain.iter().rev() {
            batch.delete_tx_lookups(block);
        }
        let header_head = if keep_headers {
            current.header().clone()
        } else {
            let upper = current.header().number().max(current.snap().number());
            for number in head.number() + 1..=upper {
                let Some(hash) = self.headers.canonical_hash(number) else { continue };
                // Blocks above the block head were indexed by receipt import.
                let imported =
                    (number > current.block().number()).then(|| self.block_by_hash(&hash)).flatten();
                if let Some(block) = imported {
                    batch.delete_tx_lookups(&block);
                }
                batch.delete_canonical(number);
            }
            head.clone()
        };
        for block in &new_chain {
            batch.put_canonical(block.number(), block.hash()).put_tx_lookups(block);
        }

        let snap_head = if keep_headers &&
            current.snap().number() > head.number() &&
            self.headers.is_canonical(&current.snap().num_hash())
        {
            current.snap().clone()
        } else {
            head.clone()
        };
        batch
            .set_head_header(header_head.hash())
            .set_head_snap(snap_head.hash())
            .set_head_block(head.hash());
        self.store.commit(batch)?;

        let heads = current.apply_update(HeadsUpdate {
            header: Some(header_head),
            snap: Some(snap_head),
            block: Some(head.clone()),
        })?;
        *self.heads.write() = heads;
        for block in &new_chain {
            inner.buffer.remove_block(&block.hash());
        }
        Metrics::record_buffered(inner.buffer.len());

        self.publish_head_change(&old_chain, &new_chain, head);
        self.after_head_advance(inner, head)?;
        Ok(())
    }

    /// Returns the blocks only on the branch of `old` and only on the branch of `new`, both
    /// ascending.
    fn diverging_branches(
        &self,
        old: &SealedHeader,
        new: &SealedHeader,
    ) -> Result<(Vec<SealedHeader>, Vec<SealedHeader>), BlockchainError> {
        let (mut old, mut new) = (old.clone(), new.clone());
        let (mut old_chain, mut new_chain) = (Vec::new(), Vec::new());
        while old.number() > new.number() {
            let parent = self.headers.parent(&old)?;
            old_chain.push(std::mem::replace(&mut old, parent));
        }
        while new.number() > old.number() {
            let parent = self.headers.parent(&new)?;
            new_chain.push(std::mem::replace(&mut new, parent));
        }
        while old.hash() != new.hash() {
            let (old_parent, new_parent) = (self.headers.parent(&old)?, self.headers.parent(&new)?);
            old_chain.push(std::mem::replace(&mut old, old_parent));
            new_chain.push(std::mem::replace(&mut new, new_parent));
        }
        old_chain.reverse();
        new_chain.reverse();
        Ok((old_chain, new_chain))
    }

    /// Publishes the events of a head change from `old_chain` to `new_chain`.
    fn publish_head_change(
        &self,
        old_chain: &[SealedBlock],
        new_chain: &[SealedBlock],
        head: &SealedHeader,
    ) {
        let with_receipts = |chain: &[SealedBlock]| {
            chain
                .iter()
                .map(|block| (block.clone(), self.receipts_by_hash(&block.hash()).unwrap_or_default()))
                .collect::<Vec<(SealedBlock, Vec<Receipt>)>>()
        };
        let new_chain = with_receipts(new_chain);

        if old_chain.is_empty() {
            let added = new_chain
                .iter()
                .flat_map(|(block, receipts)| block_logs(block, receipts, false))
                .collect();
            self.notifications.logs(added);
        } else {
            let old_chain = with_receipts(old_chain);
            let (removed, added) = reorg_logs(&old_chain, &new_chain);
            let depth = old_chain.len();
            let (drop_from, add_from) = (
                old_chain.first().map(|(block, _)| block.number()),
                new_chain.first().map(|(block, _)| block.number()),
            );
            if depth > DEEP_REORG_DEPTH {
                warn!(
                    target: "blockchain::reorg",
                    number = head.number(),
                    hash = %head.hash(),
                    drop = depth,
                    ?drop_from,
                    add = new_chain.len(),
                    ?add_from,
                    "Large chain reorg detected"
                );
            } else {
                info!(
                    target: "blockchain::reorg",
                    number = head.number(),
                    hash = %head.hash(),
                    drop = depth,
                    ?drop_from,
                    add = new_chain.len(),
                    ?add_from,
                    "Chain reorg detected"
                );
            }
            Metrics::record_reorg(depth, new_chain.len());

            self.notifications.removed_logs(removed);
            for (block, _) in &old_chain {
                self.notifications.side(block.clone());
            }
            self.notifications.logs(added);
            self.notifications.reorg(
                old_chain.into_iter().map(|(block, _)| block).collect(),
                new_chain.iter().map(|(block, _)| block.clone()).collect(),
            );
        }

        if let Some((block, receipts)) = new_chain.last() {
            debug!(target: "blockchain", number = block.number(), hash = %block.hash(), "New chain head");
            self.notifications.chain(block.clone(), block_logs(block, receipts, false));
            self.notifications.head(block.clone());
        }
    }
}
