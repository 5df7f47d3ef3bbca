//! Block body and post-state validation.

use crate::{HeaderChain, ValidationError, metrics::Metrics};
use alloy_primitives::B256;
use meridian_executor::ExecutionOutcome;
use meridian_primitives::{SealedBlock, logs_bloom, proofs};
use meridian_storage::StateStore;
use std::{sync::Arc, time::Instant};

/// Validates block bodies before execution and block post-states after it.
#[derive(Debug, Clone)]
pub struct BlockValidator {
    chain: Arc<HeaderChain>,
    state: Arc<dyn StateStore>,
}

impl BlockValidator {
    /// Creates a validator reading ancestry from `chain` and state availability from `state`.
    pub const fn new(chain: Arc<HeaderChain>, state: Arc<dyn StateStore>) -> Self {
        Self { chain, state }
    }

    /// Returns true if the body of `hash` is stored and the state of `root` is available.
    pub fn has_block_and_state(&self, hash: &B256, root: &B256) -> bool {
        self.state.has_state(root) && self.chain.store().body(hash).is_some()
    }

    /// Validates the body of `block` against its header.
    ///
    /// The checks run in order: already known, uncles, the transaction, ommer and withdrawal
    /// roots, blob sidecars and blob gas, then availability of the parent and its state.
    pub fn validate_body(&self, block: &SealedBlock) -> Result<(), ValidationError> {
        if self.has_block_and_state(&block.hash(), &block.header.state_root) {
            return Err(ValidationError::KnownBlock(block.num_hash()));
        }
        self.chain.consensus().verify_uncles(self.chain.as_ref(), block)?;

        let header = block.header.header();
        let body = &block.body;
        let (transactions_root, (ommers_hash, withdrawals_root)) = rayon::join(
            || proofs::calculate_transaction_root(&body.transactions),
            || {
                (
                    proofs::calculate_ommers_root(&body.ommers),
                    body.withdrawals.as_deref().map(proofs::calculate_withdrawals_root),
                )
            },
        );
        if transactions_root != header.transactions_root {
            return Err(ValidationError::TransactionsRootMismatch {
                expected: header.transactions_root,
                got: transactions_root,
            });
        }
        if ommers_hash != header.ommers_hash {
            return Err(ValidationError::OmmersHashMismatch {
                expected: header.ommers_hash,
                got: ommers_hash,
            });
        }
        if withdrawals_root != header.withdrawals_root {
            return Err(ValidationError::WithdrawalsRootMismatch {
                expected: header.withdrawals_root,
                got: withdrawals_root,
            });
        }

        if let Some(tx) = body.transactions.iter().find(|tx| tx.sidecar.is_some()) {
            return Err(ValidationError::BlobSidecarPresent(tx.hash()));
        }
        let blob_gas_used = body.blob_gas_used();
        if blob_gas_used != header.blob_gas_used.unwrap_or_default() {
            return Err(ValidationError::BlobGasUsedMismatch {
                expected: header.blob_gas_used,
                got: blob_gas_used,
            });
        }

        let parent_hash = block.parent_hash();
        let Some(parent) = self.chain.header(&parent_hash) else {
            return Err(ValidationError::UnknownAncestor { parent: parent_hash });
        };
        if !self.has_block_and_state(&parent_hash, &parent.state_root) {
            return Err(ValidationError::PrunedAncestor { parent: parent_hash });
        }
        Ok(())
    }

    /// Validates the result of executing `block`: gas used, bloom, receipts root and the
    /// post-state root `state_root`.
    ///
    /// The bloom and the receipts root are computed concurrently.
    pub fn validate_state(
        &self,
        block: &SealedBlock,
        state_root: B256,
        outcome: &ExecutionOutcome,
    ) -> Result<(), ValidationError> {
        let started = Instant::now();
        let header = block.header.header();
        let (bloom, receipts_root) = rayon::join(
            || logs_bloom(outcome.receipts.iter().flat_map(|receipt| &receipt.logs)),
            || proofs::calculate_receipt_root(&outcome.receipts),
        );
        Metrics::record_validation(started.elapsed());

        if header.gas_used != outcome.gas_used {
            return Err(ValidationError::GasUsedMismatch {
                expected: header.gas_used,
                got: outcome.gas_used,
            });
        }
        if bloom != header.logs_bloom {
            return Err(ValidationError::BloomMismatch {
                expected: Box::new(header.logs_bloom),
                got: Box::new(bloom),
            });
        }
        if receipts_root != header.receipts_root {
            return Err(ValidationError::ReceiptsRootMismatch {
                expected: header.receipts_root,
                got: receipts_root,
            });
        }
        if state_root != header.state_root {
            return Err(ValidationError::StateRootMismatch {
                expected: header.state_root,
                got: state_root,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        CacheConfig,
        test_utils::{BlockBuilder, ChainGenerator},
    };
    use alloy_primitives::{Address, Bloom, U256};
    use meridian_primitives::{BlobSidecar, Receipt};
    use meridian_storage::{ChainWriter, MemoryChainStore, MemoryStateStore, StoreBatch};
    use rstest::rstest;

    struct Setup {
        generator: ChainGenerator,
        chain: Arc<HeaderChain>,
        blocks: Vec<SealedBlock>,
    }

    impl Setup {
        fn new() -> Self {
            let generator = ChainGenerator::default();
            let chain = Arc::new(HeaderChain::new(
                Arc::new(MemoryChainStore::new()),
                generator.consensus(),
                &CacheConfig::default(),
            ));
            let genesis = generator.genesis();
            let mut batch = StoreBatch::new();
            batch.put_block(&genesis).put_td(genesis.hash(), genesis.header.difficulty);
            chain.store().commit(batch).unwrap();
            let blocks = generator.chain(&genesis.header, 3, |_, builder| {
                builder.transfer(Address::with_last_byte(0xaa), U256::from(1))
            });
            Self { generator, chain, blocks }
        }

        fn validator(&self, state: Arc<dyn StateStore>) -> BlockValidator {
            BlockValidator::new(self.chain.clone(), state)
        }

        fn write(&self, block: &SealedBlock) {
            let mut batch = StoreBatch::new();
            batch.put_block(block);
            self.chain.store().commit(batch).unwrap();
        }
    }

    #[test]
    fn test_valid_body() {
        let setup = Setup::new();
        let validator = setup.validator(setup.generator.state_store());
        validator.validate_body(&setup.blocks[0]).unwrap();
    }

    #[test]
    fn test_known_block() {
        let setup = Setup::new();
        let validator = setup.validator(setup.generator.state_store());
        setup.write(&setup.blocks[0]);
        assert_eq!(
            validator.validate_body(&setup.blocks[0]),
            Err(ValidationError::KnownBlock(setup.blocks[0].num_hash()))
        );
    }

    #[test]
    fn test_unknown_and_pruned_ancestor() {
        let setup = Setup::new();
        let parent = setup.blocks[0].hash();
        let fresh = setup.generator.genesis_state_store();
        let validator = setup.validator(fresh);
        assert_eq!(
            validator.validate_body(&setup.blocks[1]),
            Err(ValidationError::UnknownAncestor { parent })
        );

        setup.write(&setup.blocks[0]);
        assert_eq!(
            validator.validate_body(&setup.blocks[1]),
            Err(ValidationError::PrunedAncestor { parent })
        );
    }

    #[test]
    fn test_transaction_root_mismatch() {
        let setup = Setup::new();
        let validator = setup.validator(setup.generator.state_store());
        let mut block = setup.blocks[0].clone();
        block.body.transactions.clear();
        assert!(matches!(
            validator.validate_body(&block),
            Err(ValidationError::TransactionsRootMismatch { .. })
        ));
    }

    #[test]
    fn test_sidecar_rejected() {
        let setup = Setup::new();
        let validator = setup.validator(setup.generator.state_store());
        let mut block = setup.blocks[0].clone();
        let tx = block.body.transactions.remove(0).with_sidecar(BlobSidecar::default());
        let hash = tx.hash();
        block.body.transactions.insert(0, tx);
        assert_eq!(validator.validate_body(&block), Err(ValidationError::BlobSidecarPresent(hash)));
    }

    #[test]
    fn test_uncle_hash_mismatch() {
        let setup = Setup::new();
        let validator = setup.validator(setup.generator.state_store());
        let mut block = setup.blocks[0].clone();
        block.body.ommers.push(setup.blocks[1].header.header().clone());
        assert!(matches!(
            validator.validate_body(&block),
            Err(ValidationError::OmmersHashMismatch { .. })
        ));
    }

    fn outcome_for(block: &SealedBlock, generator: &ChainGenerator) -> (B256, ExecutionOutcome) {
        let outcome = generator.execute(block).unwrap();
        (block.header.state_root, outcome)
    }

    #[rstest]
    #[case::gas_used("gas")]
    #[case::bloom("bloom")]
    #[case::receipts_root("receipts")]
    #[case::state_root("state")]
    fn test_validate_state_mismatch(#[case] field: &str) {
        let setup = Setup::new();
        let validator = setup.validator(Arc::new(MemoryStateStore::new()));
        let block = &setup.blocks[0];
        let (mut root, mut outcome) = outcome_for(block, &setup.generator);
        validator.validate_state(block, root, &outcome).unwrap();

        match field {
            "gas" => outcome.gas_used += 1,
            "bloom" => outcome.receipts[0].logs.push(alloy_primitives::Log::new_unchecked(
                Address::with_last_byte(1),
                vec![B256::with_last_byte(1)],
                Default::default(),
            )),
            "receipts" => outcome.receipts.push(Receipt::default()),
            _ => root = B256::with_last_byte(1),
        }
        let err = validator.validate_state(block, root, &outcome).unwrap_err();
        let matched = match field {
            "gas" => matches!(err, ValidationError::GasUsedMismatch { .. }),
            "bloom" => matches!(err, ValidationError::BloomMismatch { .. }),
            "receipts" => matches!(err, ValidationError::ReceiptsRootMismatch { .. }),
            _ => matches!(err, ValidationError::StateRootMismatch { .. }),
        };
        assert!(matched, "unexpected error {err:?}");
    }

    #[test]
    fn test_tampered_receipts_root() {
        let generator = ChainGenerator::default();
        let genesis = generator.genesis();
        let block = generator.build(
            &genesis.header,
            BlockBuilder::default()
                .transfer(Address::with_last_byte(0xbb), U256::from(5))
                .tamper(|header| header.receipts_root = B256::ZERO),
        );
        let outcome = generator.execute(&block).unwrap();
        let validator = BlockValidator::new(
            Arc::new(HeaderChain::new(
                Arc::new(MemoryChainStore::new()),
                generator.consensus(),
                &CacheConfig::default(),
            )),
            generator.state_store(),
        );
        assert_eq!(block.header.logs_bloom, Bloom::ZERO);
        assert!(matches!(
            validator.validate_state(&block, block.header.state_root, &outcome),
            Err(ValidationError::ReceiptsRootMismatch { .. })
        ));
    }
}
