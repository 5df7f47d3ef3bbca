//! Diagnostics for rejected blocks.

use crate::BlockchainError;
use meridian_primitives::{ChainSpec, Receipt, SealedBlock};
use parking_lot::Mutex;
use std::{collections::VecDeque, fmt};

/// Number of rejected blocks kept for inspection.
pub const MAX_BAD_BLOCKS: usize = 10;

/// A block that failed validation, with whatever execution produced before it was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BadBlock {
    /// The rejected block.
    pub block: SealedBlock,
    /// Receipts produced by execution, empty if the block was rejected before executing.
    pub receipts: Vec<Receipt>,
    /// Why the block was rejected.
    pub error: BlockchainError,
}

/// Renders a [`BadBlock`] as the multi-line dump logged on rejection.
#[derive(Debug)]
pub struct BadBlockReport<'a> {
    spec: &'a ChainSpec,
    bad: &'a BadBlock,
}

impl<'a> BadBlockReport<'a> {
    /// Creates a report of `bad` under `spec`.
    pub const fn new(spec: &'a ChainSpec, bad: &'a BadBlock) -> Self {
        Self { spec, bad }
    }
}

impl fmt::Display for BadBlockReport<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let block = &self.bad.block;
        let header = block.header.header();
        writeln!(f, "########## BAD BLOCK #########")?;
        writeln!(f, "Chain id: {}", self.spec.chain_id)?;
        writeln!(f, "Number: {}", block.number())?;
        writeln!(f, "Hash: {}", block.hash())?;
        writeln!(f, "Parent: {}", block.parent_hash())?;
        writeln!(f, "Gas used: {} / {}", header.gas_used, header.gas_limit)?;
        writeln!(f, "Transactions: {}", block.body.transactions.len())?;
        for (index, receipt) in self.bad.receipts.iter().enumerate() {
            let hash = block.body.transactions.get(index).map(|tx| tx.hash()).unwrap_or_default();
            writeln!(
                f,
                " {index}: cumulative: {} status: {} logs: {} tx: {hash}",
                receipt.cumulative_gas_used,
                u8::from(receipt.success),
                receipt.logs.len(),
            )?;
        }
        writeln!(f, "Error: {}", self.bad.error)?;
        write!(f, "##############################")
    }
}

/// The most recently rejected blocks, newest first.
#[derive(Debug, Default)]
pub struct BadBlocks {
    blocks: Mutex<VecDeque<BadBlock>>,
}

impl BadBlocks {
    /// Records `bad`, dropping the oldest entry once [`MAX_BAD_BLOCKS`] are held.
    ///
    /// A block already recorded is not recorded twice.
    pub fn record(&self, bad: BadBlock) {
        let mut blocks = self.blocks.lock();
        if blocks.iter().any(|known| known.block.hash() == bad.block.hash()) {
            return;
        }
        blocks.push_front(bad);
        blocks.truncate(MAX_BAD_BLOCKS);
    }

    /// Returns the recorded blocks, newest first.
    pub fn list(&self) -> Vec<BadBlock> {
        self.blocks.lock().iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ValidationError, test_utils::ChainGenerator};
    use alloy_primitives::B256;

    fn bad_block(generator: &ChainGenerator, extra: u8) -> BadBlock {
        let genesis = generator.genesis();
        let block = generator.build(
            &genesis.header,
            crate::test_utils::BlockBuilder::default().extra(vec![extra]),
        );
        BadBlock {
            error: ValidationError::StateRootMismatch {
                expected: block.header.state_root,
                got: B256::ZERO,
            }
            .into(),
            block,
            receipts: Vec::new(),
        }
    }

    #[test]
    fn test_bad_blocks_bounded_newest_first() {
        let generator = ChainGenerator::default();
        let bad_blocks = BadBlocks::default();
        let recorded = (0..=MAX_BAD_BLOCKS as u8)
            .map(|extra| {
                let bad = bad_block(&generator, extra);
                bad_blocks.record(bad.clone());
                bad_blocks.record(bad.clone());
                bad
            })
            .collect::<Vec<_>>();

        let list = bad_blocks.list();
        assert_eq!(list.len(), MAX_BAD_BLOCKS);
        assert_eq!(list[0], recorded[MAX_BAD_BLOCKS]);
        assert!(!list.contains(&recorded[0]));
    }

    #[test]
    fn test_report_names_block_and_error() {
        let generator = ChainGenerator::default();
        let bad = bad_block(&generator, 0);
        let report = BadBlockReport::new(&generator.spec(), &bad).to_string();
        assert!(report.contains(&format!("Hash: {}", bad.block.hash())));
        assert!(report.contains("Number: 1"));
        assert!(report.contains("invalid merkle root"));
    }
}
