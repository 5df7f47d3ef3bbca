//! Header-only and receipt chain import.

use super::{BlockChain, insert::check_contiguous};
use crate::{
    BadHashes, BlockchainError, HeadsUpdate, InsertChainError, ValidationError, metrics::Metrics,
};
use meridian_primitives::{Receipt, SealedBlock, SealedHeader, proofs};
use meridian_storage::StoreBatch;
use tracing::{debug, info};

impl BlockChain {
    /// Imports a batch of consecutive headers without their bodies.
    ///
    /// Every header is verified against its parent and weighed. If the last header outweighs
    /// the header head, the header chain is reorganised onto it. Block and snap heads above the
    /// fork point are rewound to it.
    ///
    /// Returns the number of headers written. Already known headers are skipped.
    ///
    /// # Errors
    ///
    /// The first failing header stops the batch. The headers before it stay imported.
    pub fn insert_headers(&self, headers: Vec<SealedHeader>) -> Result<usize, InsertChainError> {
        let Some(first) = headers.first() else { return Ok(0) };
        let (first, parent) = (first.num_hash(), first.parent_num_hash());
        self.ensure_running().map_err(|err| InsertChainError::new(0, first, err))?;
        check_contiguous(&headers)?;

        let _inner = self.inner.lock();
        self.verify_ancestor(parent).map_err(|err| InsertChainError::new(0, first, err))?;

        let mut batch = StoreBatch::new();
        let mut written = 0;
        let mut last = None;
        let mut result = Ok(());
        for (index, header) in headers.iter().enumerate() {
            match self.import_header(&mut batch, header) {
                Ok(fresh) => {
                    written += usize::from(fresh);
                    last = Some(header);
                }
                Err(err) => {
                    result = Err(InsertChainError::new(index, header.num_hash(), err));
                    break;
                }
            }
        }

        // Headers before a failure are kept.
        let committed = self
            .store
            .commit(batch)
            .map_err(BlockchainError::from)
            .and_then(|()| last.map_or(Ok(()), |last| self.update_header_head(last)));
        if let Err(err) = committed {
            let index = result.as_ref().err().map_or(headers.len() - 1, |failed| failed.index);
            return Err(InsertChainError::new(index, headers[index].num_hash(), err));
        }
        result?;
        debug!(target: "blockchain", count = headers.len(), written, "Imported headers");
        Ok(written)
    }

    /// Verifies and queues a single header. Returns false if the header was already known.
    fn import_header(
        &self,
        batch: &mut StoreBatch,
        header: &SealedHeader,
    ) -> Result<bool, BlockchainError> {
        let hash = header.hash();
        if BadHashes::contains(&hash) {
            return Err(BlockchainError::BannedHash(hash));
        }
        if let Some(bad) = self.invalid_ancestor(hash, header.parent_hash()) {
            return Err(BlockchainError::InvalidAncestor { bad });
        }
        if self.headers.has_header(&hash) {
            return Ok(false);
        }
        if let Err(err) = self.headers.verify_header(header) {
            if err.is_invalid_block() {
                self.invalid.lock().put(hash, hash);
                Metrics::record_invalid();
            }
            return Err(err);
        }
        let td = self.headers.compute_td(header)?;
        self.headers.write_header(batch, header, td);
        Ok(true)
    }

    /// Makes `last` the header head if it outweighs the current one.
    fn update_header_head(&self, last: &SealedHeader) -> Result<(), BlockchainError> {
        let current = self.heads.read().clone();
        let header_td = self.headers.td(&current.header().hash()).unwrap_or_default();
        let td = self.headers.td(&last.hash()).ok_or(BlockchainError::MissingHeader(last.hash()))?;
        if !self.forkchoice.reorg_needed(header_td, td) {
            return Ok(());
        }

        let mut batch = StoreBatch::new();
        let mut fork = last.clone();
        while self.headers.canonical_hash(fork.number()) != Some(fork.hash()) {
            batch.put_canonical(fork.number(), fork.hash());
            fork = self.headers.parent(&fork)?;
        }

        let upper = current.header().number().max(current.snap().number());
        for number in last.number() + 1..=upper {
            if self.headers.canonical_hash(number).is_some() {
                batch.delete_canonical(number);
            }
        }
        for number in fork.number() + 1..=current.snap().number() {
            let block = self.headers.canonical_hash(number).and_then(|hash| self.store.block(&hash));
            if let Some(block) = block {
                batch.delete_tx_lookups(&block);
            }
        }

        let mut block_head = current.block().clone();
        if block_head.number() > fork.number() {
            block_head = fork.clone();
            while !self.has_executed(&block_head) && block_head.number() > 0 {
                block_head = self.headers.parent(&block_head)?;
            }
        }
        let snap_head = if current.snap().number() <= fork.number() {
            current.snap().clone()
        } else if self.store.receipts(&fork.hash()).is_some() {
            fork.clone()
        } else {
            block_head.clone()
        };
        batch
            .set_head_header(last.hash())
            .set_head_snap(snap_head.hash())
            .set_head_block(block_head.hash());
        self.store.commit(batch)?;

        let rewound = block_head != *current.block();
        let heads = current.apply_update(HeadsUpdate {
            header: Some(last.clone()),
            snap: Some(snap_head),
            block: Some(block_head),
        })?;
        if rewound {
            info!(
                target: "blockchain",
                fork = fork.number(),
                block = heads.block().number(),
                "Header reorg rewound block head"
            );
        }
        *self.heads.write() = heads;
        Ok(())
    }

    /// Imports bodies and receipts for canonical blocks above the snap head without executing
    /// them.
    ///
    /// Every block must be on the canonical header chain, and the batch must continue the snap
    /// head. Blocks at or below the snap head are skipped. Returns the number of blocks written.
    ///
    /// # Errors
    ///
    /// The first failing block stops the batch. The blocks before it stay imported.
    pub fn insert_receipt_chain(
        &self,
        blocks: Vec<SealedBlock>,
        receipts: Vec<Vec<Receipt>>,
    ) -> Result<usize, InsertChainError> {
        let Some(first) = blocks.first().map(SealedBlock::num_hash) else { return Ok(0) };
        if blocks.len() != receipts.len() {
            return Err(InsertChainError::new(
                0,
                first,
                BlockchainError::ReceiptCountMismatch { blocks: blocks.len(), receipts: receipts.len() },
            ));
        }
        self.ensure_running().map_err(|err| InsertChainError::new(0, first, err))?;
        check_contiguous(blocks.iter().map(|block| &block.header))?;

        let _inner = self.inner.lock();
        let mut written = 0;
        for (index, (block, receipts)) in blocks.into_iter().zip(receipts).enumerate() {
            let num_hash = block.num_hash();
            let imported = self
                .import_receipts(block, receipts)
                .map_err(|err| InsertChainError::new(index, num_hash, err))?;
            written += usize::from(imported);
        }
        debug!(target: "blockchain", written, snap = self.current_snap_block().number(), "Imported receipts");
        Ok(written)
    }

    fn import_receipts(&self, block: SealedBlock, receipts: Vec<Receipt>) -> Result<bool, BlockchainError> {
        let num_hash = block.num_hash();
        if !self.headers.is_canonical(&num_hash) {
            return Err(BlockchainError::NotCanonical(num_hash));
        }
        let current = self.heads.read().clone();
        let snap = current.snap().number();
        if block.number() <= snap {
            return Ok(false);
        }
        if block.number() != snap + 1 {
            return Err(BlockchainError::ReceiptGap { expected: snap + 1, got: block.number() });
        }

        let header = block.header.header();
        let tx_root = proofs::calculate_transaction_root(&block.body.transactions);
        if tx_root != header.transactions_root {
            return Err(ValidationError::TransactionsRootMismatch {
                expected: header.transactions_root,
                got: tx_root,
            }
            .into());
        }
        let receipts_root = proofs::calculate_receipt_root(&receipts);
        if receipts_root != header.receipts_root {
            return Err(ValidationError::ReceiptsRootMismatch {
                expected: header.receipts_root,
                got: receipts_root,
            }
            .into());
        }

        let mut batch = StoreBatch::new();
        batch
            .put_block(&block)
            .put_receipts(block.hash(), receipts)
            .put_tx_lookups(&block)
            .set_head_snap(block.hash());
        self.store.commit(batch)?;

        let heads =
            current.apply_update(HeadsUpdate { snap: Some(block.header), ..Default::default() })?;
        *self.heads.write() = heads;
        Ok(true)
    }
}
