use super::*;
use crate::{
    InsertChainError, MockAncestorVerifier, ValidationError,
    test_utils::{BlockBuilder, ChainGenerator, FakeConsensus},
};
use alloy_primitives::Address;
use meridian_consensus::ConsensusError;
use meridian_executor::test_utils::{TestEvm, log_call};
use meridian_prefetch::PrefetchConfig;
use meridian_storage::{ChainReader, MemoryChainStore, MemoryStateStore};
use rstest::rstest;

struct Harness {
    generator: ChainGenerator,
    store: Arc<MemoryChainStore>,
    state: Arc<MemoryStateStore>,
    chain: BlockChain,
}

impl Harness {
    fn new(config: BlockchainConfig) -> Self {
        Self::with_consensus(config, Arc::new(FakeConsensus::default()))
    }

    fn with_consensus(config: BlockchainConfig, consensus: Arc<dyn Consensus>) -> Self {
        let generator = ChainGenerator::default();
        let store = Arc::new(MemoryChainStore::new());
        let state = Arc::new(MemoryStateStore::new());
        let chain = BlockChain::new(
            store.clone(),
            state.clone(),
            generator.spec(),
            consensus,
            Arc::new(TestEvm),
            config,
        )
        .unwrap();
        Self { generator, store, state, chain }
    }

    /// Opens a second chain over the same stores, as a restarted process would.
    fn reopen(&self, config: BlockchainConfig) -> BlockChain {
        BlockChain::new(
            self.store.clone(),
            self.state.clone(),
            self.generator.spec(),
            self.generator.consensus(),
            Arc::new(TestEvm),
            config,
        )
        .unwrap()
    }

    fn genesis(&self) -> SealedHeader {
        self.chain.genesis().header.clone()
    }

    /// `len` blocks of difficulty one on genesis.
    fn main_chain(&self, len: usize) -> Vec<SealedBlock> {
        self.generator.chain(&self.genesis(), len, |_, builder| builder)
    }

    /// `len` blocks of difficulty `difficulty` on `parent`, distinguished by their beneficiary.
    fn fork(&self, parent: &SealedHeader, len: usize, difficulty: u64) -> Vec<SealedBlock> {
        self.generator.chain(parent, len, |_, builder| {
            builder.difficulty(difficulty).coinbase(Address::with_last_byte(0xf0))
        })
    }

    /// Asserts that the canonical mapping walks back from the block head through parent links.
    fn assert_canonical_consistent(&self) {
        let head = self.chain.current_block();
        let mut header = head.clone();
        loop {
            assert_eq!(self.chain.canonical_hash(header.number()), Some(header.hash()));
            if header.number() == 0 {
                break;
            }
            header = self.chain.header_by_hash(&header.parent_hash()).unwrap();
        }
        assert_eq!(self.chain.canonical_hash(self.chain.current_header().number() + 1), None);
    }
}

fn no_prefetch() -> BlockchainConfig {
    BlockchainConfig::default().with_prefetch(PrefetchConfig::default().with_enabled(false))
}

#[test]
fn test_new_writes_genesis() {
    let harness = Harness::new(BlockchainConfig::default());
    let genesis = harness.chain.genesis().clone();
    assert_eq!(harness.chain.current_block(), genesis.header);
    assert_eq!(harness.chain.current_header(), genesis.header);
    assert_eq!(harness.chain.current_snap_block(), genesis.header);
    assert_eq!(harness.chain.canonical_hash(0), Some(genesis.hash()));
    assert_eq!(harness.chain.td(&genesis.hash()), Some(genesis.header.difficulty));
    assert!(harness.chain.has_block_and_state(&genesis.hash()));
    assert!(harness.state.is_persisted(&genesis.header.state_root));
}

#[test]
fn test_genesis_mismatch() {
    let harness = Harness::new(BlockchainConfig::default());
    let mut spec = (*harness.generator.spec()).clone();
    spec.genesis.timestamp += 1;
    let err = BlockChain::new(
        harness.store.clone(),
        harness.state.clone(),
        Arc::new(spec),
        harness.generator.consensus(),
        Arc::new(TestEvm),
        BlockchainConfig::default(),
    )
    .unwrap_err();
    assert!(matches!(err, BlockchainError::GenesisMismatch { .. }));
}

#[test]
fn test_insert_extends_head() {
    let harness = Harness::new(BlockchainConfig::default());
    let blocks = harness.generator.chain(&harness.genesis(), 3, |index, builder| {
        builder.transfer(Address::with_last_byte(index as u8 + 1), U256::from(1))
    });

    let statuses = harness.chain.insert_chain(blocks.clone()).unwrap();
    assert_eq!(statuses, vec![WriteStatus::Canonical; 3]);
    assert_eq!(harness.chain.current_block(), blocks[2].header);
    assert_eq!(harness.chain.current_header(), blocks[2].header);
    assert_eq!(harness.chain.block_by_number(2), Some(blocks[1].clone()));
    assert_eq!(harness.chain.td(&blocks[2].hash()), Some(U256::from(4)));
    assert_eq!(harness.chain.receipts_by_hash(&blocks[0].hash()).unwrap().len(), 1);

    let tx = blocks[1].body.transactions[0].hash();
    let location = harness.chain.transaction_location(&tx).unwrap();
    assert_eq!((location.block_number, location.block_hash, location.index), (2, blocks[1].hash(), 0));
    harness.assert_canonical_consistent();
}

#[test]
fn test_insert_empty_and_non_contiguous() {
    let harness = Harness::new(BlockchainConfig::default());
    assert_eq!(harness.chain.insert_chain(Vec::new()).unwrap(), Vec::new());

    let blocks = harness.main_chain(3);
    let err = harness.chain.insert_chain(vec![blocks[0].clone(), blocks[2].clone()]).unwrap_err();
    assert_eq!(err.index, 1);
    assert!(matches!(err.kind, BlockchainError::NonContiguous { .. }));
    assert_eq!(harness.chain.current_block().number(), 0);
}

#[rstest]
#[case::main_first(false)]
#[case::fork_first(true)]
fn test_heaviest_branch_wins_in_any_order(#[case] fork_first: bool) {
    let harness = Harness::new(BlockchainConfig::default());
    let main = harness.main_chain(5);
    let fork = harness.fork(&harness.genesis(), 3, 3);

    if fork_first {
        harness.chain.insert_chain(fork.clone()).unwrap();
        let statuses = harness.chain.insert_chain(main.clone()).unwrap();
        assert_eq!(statuses, vec![WriteStatus::Side; 5]);
    } else {
        harness.chain.insert_chain(main.clone()).unwrap();
        let statuses = harness.chain.insert_chain(fork.clone()).unwrap();
        assert_eq!(
            statuses,
            vec![WriteStatus::Side, WriteStatus::Canonical, WriteStatus::Canonical]
        );
    }

    assert_eq!(harness.chain.current_block(), fork[2].header);
    assert_eq!(harness.chain.td(&fork[2].hash()), Some(U256::from(10)));
    assert_eq!(harness.chain.canonical_hash(4), None);
    assert_eq!(harness.chain.canonical_hash(5), None);
    assert!(harness.chain.block_by_hash(&main[4].hash()).is_some());
    harness.assert_canonical_consistent();
}

#[tokio::test]
async fn test_reorg_events() {
    let harness = Harness::new(BlockchainConfig::default());
    let main = harness.generator.chain(&harness.genesis(), 2, |index, builder| {
        builder.call(Address::with_last_byte(index as u8 + 1), log_call(1))
    });
    harness.chain.insert_chain(main.clone()).unwrap();

    let mut removed_logs = harness.chain.subscribe_removed_logs();
    let mut reorgs = harness.chain.subscribe_chain_reorg();
    let mut sides = harness.chain.subscribe_chain_side();
    let mut heads = harness.chain.subscribe_chain_head();

    // Same transaction at the same position, heavier block.
    let fork = harness.generator.build(
        &harness.genesis(),
        BlockBuilder::default()
            .difficulty(3)
            .coinbase(Address::with_last_byte(0xf0))
            .call(Address::with_last_byte(1), log_call(1)),
    );
    let statuses = harness.chain.insert_chain(vec![fork.clone()]).unwrap();
    assert_eq!(statuses, vec![WriteStatus::Canonical]);

    let removed = removed_logs.recv().await.unwrap();
    assert_eq!(removed.len(), 1);
    assert!(removed[0].removed);
    assert_eq!(removed[0].log.address, Address::with_last_byte(2));
    assert_eq!(removed[0].block_hash, main[1].hash());

    let reorg = reorgs.recv().await.unwrap();
    assert_eq!(reorg.old_chain, main);
    assert_eq!(reorg.new_chain, vec![fork.clone()]);
    assert_eq!(sides.recv().await.unwrap().block, main[0]);
    assert_eq!(sides.recv().await.unwrap().block, main[1]);
    assert_eq!(heads.recv().await.unwrap().block, fork);

    let moved = harness.chain.transaction_location(&main[0].body.transactions[0].hash()).unwrap();
    assert_eq!(moved.block_hash, fork.hash());
    assert_eq!(harness.chain.transaction_location(&main[1].body.transactions[0].hash()), None);
    assert!(harness.chain.canonical_hash(2).is_none());
}

#[test]
fn test_reinsert_is_known() {
    let harness = Harness::new(BlockchainConfig::default());
    let blocks = harness.main_chain(3);
    harness.chain.insert_chain(blocks.clone()).unwrap();
    let mut heads = harness.chain.subscribe_chain_head();

    let statuses = harness.chain.insert_chain(blocks.clone()).unwrap();
    assert_eq!(statuses, vec![WriteStatus::Known; 3]);
    assert_eq!(harness.chain.current_block(), blocks[2].header);
    assert!(heads.try_recv().is_err());
}

#[test]
fn test_state_retention_window() {
    let harness = Harness::new(BlockchainConfig::default().with_state_history(4));
    let blocks = harness.main_chain(10);
    harness.chain.insert_chain(blocks.clone()).unwrap();

    for block in &blocks[..6] {
        assert!(!harness.chain.has_state(&block.header.state_root), "block {}", block.number());
        assert!(harness.chain.has_block(&block.hash()));
    }
    for block in &blocks[6..] {
        assert!(harness.chain.has_state(&block.header.state_root), "block {}", block.number());
    }
    assert!(harness.chain.has_state(&harness.genesis().state_root));
}

#[test]
fn test_archive_keeps_every_state() {
    let harness = Harness::new(BlockchainConfig::default().with_state_history(4).with_archive(true));
    let blocks = harness.main_chain(10);
    harness.chain.insert_chain(blocks.clone()).unwrap();
    assert!(blocks.iter().all(|block| harness.chain.has_state(&block.header.state_root)));
}

#[test]
fn test_banned_hash_rejected() {
    let harness = Harness::new(BlockchainConfig::default());
    let blocks = harness.generator.chain(&harness.genesis(), 2, |index, builder| {
        builder.extra(format!("banned-insert-{index}").into_bytes())
    });
    BadHashes::insert(blocks[1].hash());

    let result = harness.chain.insert_chain(blocks.clone());
    BadHashes::remove(&blocks[1].hash());

    let err = result.unwrap_err();
    assert_eq!(err.index, 1);
    assert_eq!(err.kind, BlockchainError::BannedHash(blocks[1].hash()));
    assert_eq!(harness.chain.current_block(), blocks[0].header);
    assert!(harness.chain.has_block(&blocks[0].hash()));
    assert!(!harness.chain.has_block(&blocks[1].hash()));
    assert_eq!(harness.chain.header_by_hash(&blocks[1].hash()), None);
}

#[test]
fn test_consensus_failure_stops_batch() {
    let harness =
        Harness::with_consensus(BlockchainConfig::default(), Arc::new(FakeConsensus::failing_at(3)));
    let blocks = harness.main_chain(5);

    let err = harness.chain.insert_chain(blocks.clone()).unwrap_err();
    assert_eq!(err.index, 2);
    assert_eq!(err.block, blocks[2].num_hash());
    assert!(matches!(err.kind, BlockchainError::Consensus(ConsensusError::InvalidDifficulty { .. })));
    assert_eq!(harness.chain.current_block(), blocks[1].header);
    assert!(!harness.chain.has_block(&blocks[2].hash()));

    // Descendants of the rejected block are refused without verification.
    let err = harness.chain.insert_chain(blocks[3..].to_vec()).unwrap_err();
    assert_eq!(err.index, 0);
    assert_eq!(err.kind, BlockchainError::InvalidAncestor { bad: blocks[2].hash() });

    let bad_blocks = harness.chain.bad_blocks();
    assert_eq!(bad_blocks.len(), 1);
    assert_eq!(bad_blocks[0].block, blocks[2]);
}

#[rstest]
#[case::first(0)]
#[case::middle(12)]
#[case::last(24)]
fn test_header_consensus_failure_stops_batch(#[case] failing: usize) {
    let harness = Harness::with_consensus(
        BlockchainConfig::default(),
        Arc::new(FakeConsensus::failing_at(failing as u64 + 1)),
    );
    let headers =
        harness.main_chain(25).into_iter().map(|block| block.header).collect::<Vec<_>>();

    let err = harness.chain.insert_headers(headers.clone()).unwrap_err();
    assert_eq!(err.index, failing);
    assert_eq!(err.block, headers[failing].num_hash());
    assert!(matches!(err.kind, BlockchainError::Consensus(ConsensusError::InvalidDifficulty { .. })));

    for header in &headers[..failing] {
        assert_eq!(harness.chain.header_by_hash(&header.hash()).as_ref(), Some(header));
    }
    for header in &headers[failing..] {
        assert_eq!(harness.chain.header_by_hash(&header.hash()), None);
        assert_eq!(harness.chain.header_by_number(header.number()), None);
    }
    let head = failing.checked_sub(1).map_or_else(|| harness.genesis(), |last| headers[last].clone());
    assert_eq!(harness.chain.current_header(), head);
    assert_eq!(harness.chain.current_block(), harness.genesis());
}

#[test]
fn test_tampered_receipts_root_deep_in_batch() {
    let harness = Harness::new(no_prefetch());
    // Two of every three blocks carry a value transfer.
    let blocks = harness.generator.chain(&harness.genesis(), 1024, |index, builder| {
        let builder = if index % 3 == 2 {
            builder
        } else {
            builder.transfer(Address::with_last_byte(0x42), U256::from(1))
        };
        if index == 499 {
            builder.tamper(|header| header.receipts_root = B256::repeat_byte(0x11))
        } else {
            builder
        }
    });
    assert_eq!(blocks.iter().filter(|block| !block.body.transactions.is_empty()).count(), 683);

    let err = harness.chain.insert_chain(blocks.clone()).unwrap_err();
    assert_eq!(err.index, 499);
    assert!(matches!(
        err.kind,
        BlockchainError::Validation(ValidationError::ReceiptsRootMismatch { .. })
    ));
    assert_eq!(harness.chain.current_block().number(), 499);
    assert_eq!(harness.chain.current_block(), blocks[498].header);
    assert!(!harness.chain.has_block(&blocks[499].hash()));
    assert!(blocks[500..].iter().all(|block| !harness.chain.has_block(&block.hash())));
    let rejected_tx = blocks[499].body.transactions[0].hash();
    assert_eq!(harness.chain.transaction_location(&rejected_tx), None);
    assert_eq!(harness.chain.bad_blocks()[0].block, blocks[499]);
    harness.assert_canonical_consistent();
}

#[test]
fn test_buffered_side_chain_executes_on_reorg() {
    let harness = Harness::new(BlockchainConfig::default().with_state_history(4));
    let main = harness.main_chain(10);
    harness.chain.insert_chain(main.clone()).unwrap();
    assert!(!harness.chain.has_state(&main[1].header.state_root));

    let side = harness.fork(&main[1].header, 2, 5);
    let statuses = harness.chain.insert_chain(side[..1].to_vec()).unwrap();
    assert_eq!(statuses, vec![WriteStatus::Buffered]);
    assert_eq!(harness.chain.buffered_blocks(), 1);
    assert!(!harness.chain.has_state(&side[0].header.state_root));
    assert_eq!(harness.chain.current_block(), main[9].header);

    let mut reorgs = harness.chain.subscribe_chain_reorg();
    let statuses = harness.chain.insert_chain(side[1..].to_vec()).unwrap();
    assert_eq!(statuses, vec![WriteStatus::Canonical]);
    assert_eq!(harness.chain.current_block(), side[1].header);
    assert_eq!(harness.chain.buffered_blocks(), 0);
    assert!(harness.chain.has_block_and_state(&side[0].hash()));
    assert!(harness.chain.has_block_and_state(&side[1].hash()));

    let reorg = reorgs.try_recv().unwrap();
    assert_eq!(reorg.old_chain, main[2..].to_vec());
    assert_eq!(reorg.new_chain, side);
    harness.assert_canonical_consistent();
}

#[test]
fn test_restart_after_stop_keeps_head() {
    let harness = Harness::new(BlockchainConfig::default());
    let blocks = harness.main_chain(5);
    harness.chain.insert_chain(blocks.clone()).unwrap();
    harness.chain.stop().unwrap();

    let err = harness.chain.insert_chain(harness.fork(&blocks[4].header, 1, 1)).unwrap_err();
    assert_eq!(err.kind, BlockchainError::Stopped);
    assert!(harness.state.is_persisted(&blocks[4].header.state_root));

    harness.state.drop_dirty();
    let restarted = harness.reopen(BlockchainConfig::default());
    assert_eq!(restarted.current_block(), blocks[4].header);
    assert_eq!(restarted.current_header(), blocks[4].header);
}

#[rstest]
#[case::nothing_flushed(None, 0)]
#[case::flushed_every_four(Some(4), 8)]
fn test_restart_repairs_missing_head_state(#[case] flush_interval: Option<u64>, #[case] head: u64) {
    let config = BlockchainConfig { flush_interval, ..Default::default() };
    let harness = Harness::new(config.clone());
    let blocks = harness.main_chain(10);
    harness.chain.insert_chain(blocks.clone()).unwrap();

    harness.state.drop_dirty();
    let restarted = harness.reopen(config);
    assert_eq!(restarted.current_block().number(), head);
    assert_eq!(restarted.current_header(), blocks[9].header);
    assert_eq!(harness.store.head_block_hash(), Some(restarted.current_block().hash()));

    let statuses = restarted.insert_chain(blocks[head as usize..].to_vec()).unwrap();
    assert!(statuses.iter().all(|status| *status == WriteStatus::Canonical));
    assert_eq!(restarted.current_block(), blocks[9].header);
}

#[test]
fn test_restart_rolls_back_banned_head() {
    let harness = Harness::new(BlockchainConfig::default());
    let blocks = harness.generator.chain(&harness.genesis(), 4, |index, builder| {
        builder.extra(format!("banned-head-{index}").into_bytes())
    });
    harness.chain.insert_chain(blocks.clone()).unwrap();

    let config = BlockchainConfig::default().with_bad_hashes([blocks[2].hash()]);
    BadHashes::insert(blocks[3].hash());
    let restarted = harness.reopen(config);
    BadHashes::remove(&blocks[2].hash());
    BadHashes::remove(&blocks[3].hash());

    assert_eq!(restarted.current_header(), blocks[1].header);
    assert_eq!(restarted.current_block(), blocks[1].header);
    assert_eq!(restarted.canonical_hash(3), None);
}

#[test]
fn test_set_head_rewinds() {
    let harness = Harness::new(BlockchainConfig::default());
    let blocks = harness.generator.chain(&harness.genesis(), 10, |index, builder| {
        builder.transfer(Address::with_last_byte(index as u8 + 1), U256::from(1))
    });
    harness.chain.insert_chain(blocks.clone()).unwrap();

    harness.chain.set_head(5).unwrap();
    assert_eq!(harness.chain.current_block(), blocks[4].header);
    assert_eq!(harness.chain.current_header(), blocks[4].header);
    assert_eq!(harness.chain.current_snap_block(), blocks[4].header);
    assert_eq!(harness.chain.canonical_hash(6), None);
    assert!(harness.chain.block_by_hash(&blocks[7].hash()).is_none());
    assert_eq!(harness.chain.transaction_location(&blocks[7].body.transactions[0].hash()), None);
    assert!(harness.chain.transaction_location(&blocks[3].body.transactions[0].hash()).is_some());

    let statuses = harness.chain.insert_chain(blocks[5..].to_vec()).unwrap();
    assert_eq!(statuses, vec![WriteStatus::Canonical; 5]);
    harness.assert_canonical_consistent();
}

#[test]
fn test_freeze_and_truncate() {
    let harness = Harness::new(BlockchainConfig::default().with_freezer_threshold(Some(4)));
    let blocks = harness.main_chain(10);
    harness.chain.insert_chain(blocks.clone()).unwrap();
    assert_eq!(harness.store.ancients(), 6);
    assert_eq!(harness.chain.block_by_number(2), Some(blocks[1].clone()));
    assert_eq!(harness.chain.receipts_by_hash(&blocks[1].hash()), Some(Vec::new()));

    harness.chain.set_head(3).unwrap();
    assert_eq!(harness.store.ancients(), 4);
    assert_eq!(harness.chain.current_block(), blocks[2].header);
    assert_eq!(harness.chain.canonical_hash(4), None);
    assert_eq!(harness.chain.canonical_hash(7), None);

    harness.chain.insert_chain(blocks[3..].to_vec()).unwrap();
    assert_eq!(harness.chain.current_block(), blocks[9].header);
    harness.assert_canonical_consistent();
}

#[test]
fn test_reset_with_genesis() {
    let harness = Harness::new(BlockchainConfig::default());
    let blocks = harness.main_chain(3);
    harness.chain.insert_chain(blocks.clone()).unwrap();

    harness.chain.reset_with_genesis().unwrap();
    assert_eq!(harness.chain.current_block(), harness.genesis());
    assert_eq!(harness.chain.current_header(), harness.genesis());
    assert_eq!(harness.chain.canonical_hash(1), None);
    assert!(!harness.chain.has_block(&blocks[0].hash()));
}

#[test]
fn test_insert_headers_then_receipts() {
    let harness = Harness::new(BlockchainConfig::default());
    let blocks = harness.generator.chain(&harness.genesis(), 6, |index, builder| {
        builder.transfer(Address::with_last_byte(index as u8 + 1), U256::from(1))
    });
    let headers = blocks.iter().map(|block| block.header.clone()).collect::<Vec<_>>();
    let receipts = blocks
        .iter()
        .map(|block| harness.generator.execute(block).unwrap().receipts)
        .collect::<Vec<_>>();

    assert_eq!(harness.chain.insert_headers(headers.clone()).unwrap(), 6);
    assert_eq!(harness.chain.insert_headers(headers).unwrap(), 0);
    assert_eq!(harness.chain.current_header(), blocks[5].header);
    assert_eq!(harness.chain.current_block().number(), 0);
    assert_eq!(harness.chain.canonical_hash(6), Some(blocks[5].hash()));

    let written =
        harness.chain.insert_receipt_chain(blocks[..3].to_vec(), receipts[..3].to_vec()).unwrap();
    assert_eq!(written, 3);
    assert_eq!(harness.chain.current_snap_block(), blocks[2].header);
    assert!(harness.chain.transaction_location(&blocks[1].body.transactions[0].hash()).is_some());

    let err = harness
        .chain
        .insert_receipt_chain(vec![blocks[4].clone()], vec![receipts[4].clone()])
        .unwrap_err();
    assert_eq!(err.kind, BlockchainError::ReceiptGap { expected: 4, got: 5 });

    let err = harness
        .chain
        .insert_receipt_chain(vec![blocks[3].clone()], vec![Vec::new()])
        .unwrap_err();
    assert!(matches!(
        err.kind,
        BlockchainError::Validation(ValidationError::ReceiptsRootMismatch { .. })
    ));

    let statuses = harness.chain.insert_chain(blocks.clone()).unwrap();
    assert_eq!(statuses, vec![WriteStatus::Canonical; 6]);
    assert_eq!(harness.chain.current_block(), blocks[5].header);
    assert_eq!(harness.chain.current_snap_block(), blocks[5].header);
    harness.assert_canonical_consistent();
}

#[test]
fn test_receipts_for_side_block_rejected() {
    let harness = Harness::new(BlockchainConfig::default());
    let block = harness.main_chain(1).remove(0);
    let err = harness.chain.insert_receipt_chain(vec![block.clone()], Vec::new()).unwrap_err();
    assert_eq!(err.kind, BlockchainError::ReceiptCountMismatch { blocks: 1, receipts: 0 });

    let err = harness.chain.insert_receipt_chain(vec![block.clone()], vec![Vec::new()]).unwrap_err();
    assert_eq!(err.kind, BlockchainError::NotCanonical(block.num_hash()));
}

#[test]
fn test_heavier_headers_rewind_block_head() {
    let harness = Harness::new(BlockchainConfig::default());
    let main = harness.main_chain(4);
    harness.chain.insert_chain(main.clone()).unwrap();

    let fork = harness.fork(&main[0].header, 3, 3);
    let headers = fork.iter().map(|block| block.header.clone()).collect();
    assert_eq!(harness.chain.insert_headers(headers).unwrap(), 3);

    assert_eq!(harness.chain.current_header(), fork[2].header);
    assert_eq!(harness.chain.current_block(), main[0].header);
    assert_eq!(harness.chain.canonical_hash(2), Some(fork[0].hash()));

    let statuses = harness.chain.insert_chain(fork.clone()).unwrap();
    assert_eq!(statuses, vec![WriteStatus::Canonical; 3]);
    assert_eq!(harness.chain.current_block(), fork[2].header);
    harness.assert_canonical_consistent();
}

#[test]
fn test_set_canonical_after_merge() {
    let harness = Harness::new(BlockchainConfig::default());
    let main = harness.main_chain(5);
    harness.chain.insert_chain(main.clone()).unwrap();
    harness.chain.set_merged();
    assert!(harness.chain.is_merged());

    let fork = harness.fork(&harness.genesis(), 3, 3);
    let statuses = harness.chain.insert_chain(fork.clone()).unwrap();
    assert_eq!(statuses, vec![WriteStatus::Side; 3]);
    assert_eq!(harness.chain.current_block(), main[4].header);

    assert_eq!(harness.chain.set_canonical(fork[2].hash()).unwrap(), fork[2].hash());
    assert_eq!(harness.chain.current_block(), fork[2].header);
    harness.assert_canonical_consistent();

    // Moving back to an ancestor of the other branch shortens the chain.
    assert_eq!(harness.chain.set_canonical(main[2].hash()).unwrap(), main[2].hash());
    assert_eq!(harness.chain.current_block(), main[2].header);
    assert_eq!(harness.chain.current_header(), main[2].header);
    assert_eq!(harness.chain.canonical_hash(4), None);
    harness.assert_canonical_consistent();

    let err = harness.chain.set_canonical(B256::repeat_byte(0x42)).unwrap_err();
    assert_eq!(err, BlockchainError::MissingHeader(B256::repeat_byte(0x42)));
}

#[test]
fn test_ancestor_must_be_attested() {
    let mut verifier = MockAncestorVerifier::new();
    let genesis = ChainGenerator::default().genesis();
    let unattested = genesis.num_hash();
    verifier.expect_is_attested().returning(move |ancestor| *ancestor != unattested);

    let harness = Harness::new(BlockchainConfig::default());
    let blocks = harness.main_chain(3);
    let Harness { chain, .. } = harness;
    let chain = chain.with_ancestor_verifier(Arc::new(verifier));

    let err: InsertChainError = chain.insert_chain(blocks[..1].to_vec()).unwrap_err();
    assert_eq!(err.kind, BlockchainError::AncestorNotAttested(genesis.num_hash()));
    assert_eq!(chain.current_block().number(), 0);
}

#[test]
fn test_ancestor_attested() {
    let mut verifier = MockAncestorVerifier::new();
    verifier.expect_is_attested().times(1).returning(|_| true);

    let harness = Harness::new(BlockchainConfig::default());
    let blocks = harness.main_chain(3);
    let Harness { chain, .. } = harness;
    let chain = chain.with_ancestor_verifier(Arc::new(verifier));

    chain.insert_chain(blocks.clone()).unwrap();
    assert_eq!(chain.current_block(), blocks[2].header);
}
