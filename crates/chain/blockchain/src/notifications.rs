//! Chain event streams.

use alloy_primitives::{B256, BlockNumber, Log};
use meridian_primitives::{Receipt, SealedBlock};
use std::collections::HashMap;
use tokio::sync::broadcast;

/// Capacity of every event channel. Subscribers lagging further behind miss events.
pub const NOTIFICATION_CAPACITY: usize = 256;

/// A log together with its position in the chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainLog {
    /// The log.
    pub log: Log,
    /// Number of the including block.
    pub block_number: BlockNumber,
    /// Hash of the including block.
    pub block_hash: B256,
    /// Hash of the emitting transaction.
    pub tx_hash: B256,
    /// Index of the emitting transaction in the block.
    pub tx_index: usize,
    /// Index of the log in the block.
    pub log_index: usize,
    /// True if the log was removed from the canonical chain by a reorg.
    pub removed: bool,
}

/// A new canonical head.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainHeadEvent {
    /// The head block.
    pub block: SealedBlock,
}

/// A block was added as a side block, or left the canonical chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainSideEvent {
    /// The side block.
    pub block: SealedBlock,
}

/// A block was added to the canonical chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainEvent {
    /// The block.
    pub block: SealedBlock,
    /// Logs of the block.
    pub logs: Vec<ChainLog>,
}

/// The canonical chain was reorganised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainReorgEvent {
    /// Blocks that left the canonical chain, ascending.
    pub old_chain: Vec<SealedBlock>,
    /// Blocks that joined the canonical chain, ascending.
    pub new_chain: Vec<SealedBlock>,
}

/// Publishers of every chain event stream.
///
/// Publishing never blocks and never fails: events without subscribers are dropped.
#[derive(Debug)]
pub struct ChainNotifications {
    head: broadcast::Sender<ChainHeadEvent>,
    side: broadcast::Sender<ChainSideEvent>,
    chain: broadcast::Sender<ChainEvent>,
    logs: broadcast::Sender<Vec<ChainLog>>,
    removed_logs: broadcast::Sender<Vec<ChainLog>>,
    reorg: broadcast::Sender<ChainReorgEvent>,
}

impl Default for ChainNotifications {
    fn default() -> Self {
        Self::new(NOTIFICATION_CAPACITY)
    }
}

impl ChainNotifications {
    /// Creates channels buffering `capacity` events each.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            head: broadcast::channel(capacity).0,
            side: broadcast::channel(capacity).0,
            chain: broadcast::channel(capacity).0,
            logs: broadcast::channel(capacity).0,
            removed_logs: broadcast::channel(capacity).0,
            reorg: broadcast::channel(capacity).0,
        }
    }

    /// Subscribes to new canonical heads.
    pub fn subscribe_head(&self) -> broadcast::Receiver<ChainHeadEvent> {
        self.head.subscribe()
    }

    /// Subscribes to side blocks.
    pub fn subscribe_side(&self) -> broadcast::Receiver<ChainSideEvent> {
        self.side.subscribe()
    }

    /// Subscribes to blocks joining the canonical chain.
    pub fn subscribe_chain(&self) -> broadcast::Receiver<ChainEvent> {
        self.chain.subscribe()
    }

    /// Subscribes to logs added to the canonical chain.
    pub fn subscribe_logs(&self) -> broadcast::Receiver<Vec<ChainLog>> {
        self.logs.subscribe()
    }

    /// Subscribes to logs removed from the canonical chain.
    pub fn subscribe_removed_logs(&self) -> broadcast::Receiver<Vec<ChainLog>> {
        self.removed_logs.subscribe()
    }

    /// Subscribes to reorgs.
    pub fn subscribe_reorg(&self) -> broadcast::Receiver<ChainReorgEvent> {
        self.reorg.subscribe()
    }

    pub(crate) fn head(&self, block: SealedBlock) {
        let _ = self.head.send(ChainHeadEvent { block });
    }

    pub(crate) fn side(&self, block: SealedBlock) {
        let _ = self.side.send(ChainSideEvent { block });
    }

    /// Publishes a canonical block. Its logs go out separately through [`Self::logs`].
    pub(crate) fn chain(&self, block: SealedBlock, logs: Vec<ChainLog>) {
        let _ = self.chain.send(ChainEvent { block, logs });
    }

    pub(crate) fn logs(&self, logs: Vec<ChainLog>) {
        if !logs.is_empty() {
            let _ = self.logs.send(logs);
        }
    }

    pub(crate) fn removed_logs(&self, logs: Vec<ChainLog>) {
        if !logs.is_empty() {
            let _ = self.removed_logs.send(logs);
        }
    }

    pub(crate) fn reorg(&self, old_chain: Vec<SealedBlock>, new_chain: Vec<SealedBlock>) {
        let _ = self.reorg.send(ChainReorgEvent { old_chain, new_chain });
    }
}

/// Collects the logs of `block` in transaction then log order.
pub fn block_logs(block: &SealedBlock, receipts: &[Receipt], removed: bool) -> Vec<ChainLog> {
    let mut log_index = 0;
    let mut logs = Vec::new();
    for (tx_index, (tx, receipt)) in block.body.transactions.iter().zip(receipts).enumerate() {
        for log in &receipt.logs {
            logs.push(ChainLog {
                log: log.clone(),
                block_number: block.number(),
                block_hash: block.hash(),
                tx_hash: tx.hash(),
                tx_index,
                log_index,
                removed,
            });
            log_index += 1;
        }
    }
    logs
}

/// Computes the logs a reorg removes and adds.
///
/// Both chains are given ascending together with their receipts. A transaction included at the
/// same block number and index on both sides keeps its position and contributes to neither
/// list. A transaction that moved contributes to both. Both lists are ascending by block, then
/// transaction index.
pub fn reorg_logs(
    old_chain: &[(SealedBlock, Vec<Receipt>)],
    new_chain: &[(SealedBlock, Vec<Receipt>)],
) -> (Vec<ChainLog>, Vec<ChainLog>) {
    let positions = |chain: &[(SealedBlock, Vec<Receipt>)]| {
        chain
            .iter()
            .flat_map(|(block, _)| {
                block
                    .body
                    .transactions
                    .iter()
                    .enumerate()
                    .map(|(index, tx)| (tx.hash(), (block.number(), index)))
            })
            .collect::<HashMap<_, _>>()
    };
    let old_positions = positions(old_chain);
    let new_positions = positions(new_chain);

    let removed = old_chain
        .iter()
        .flat_map(|(block, receipts)| block_logs(block, receipts, true))
        .filter(|log| new_positions.get(&log.tx_hash) != Some(&(log.block_number, log.tx_index)))
        .collect();
    let added = new_chain
        .iter()
        .flat_map(|(block, receipts)| block_logs(block, receipts, false))
        .filter(|log| old_positions.get(&log.tx_hash) != Some(&(log.block_number, log.tx_index)))
        .collect();
    (removed, added)
}
