//! Test utilities: a configurable consensus engine and a generator of valid blocks.

use crate::{genesis_block, genesis_state};
use alloy_primitives::{Address, B256, Bytes, TxKind, U256};
use alloy_signer_local::PrivateKeySigner;
use meridian_consensus::{Consensus, ConsensusError, HeaderProvider, validation};
use meridian_executor::{
    ExecutionError, ExecutionOutcome, StateDb, StateProcessor, test_utils::TestEvm,
};
use meridian_primitives::{
    BlockBody, ChainSpec, EMPTY_OMMER_ROOT_HASH, EMPTY_ROOT_HASH, GWEI_TO_WEI, GenesisAccount,
    Header, SealedBlock, SealedHeader, Transaction, TxType, Withdrawal, logs_bloom, proofs,
};
use meridian_storage::{MemoryStateStore, StateStore};
use parking_lot::Mutex;
use std::{collections::HashMap, sync::Arc};

/// Reward credited to the beneficiary of every block by [`FakeConsensus`].
pub const BLOCK_REWARD: U256 = U256::from_limbs([2_000_000_000_000_000_000, 0, 0, 0]);

/// Gas price of every transaction built by [`ChainGenerator`].
pub const GAS_PRICE: u128 = GWEI_TO_WEI as u128;

/// Beneficiary of generated blocks unless overridden.
pub const DEFAULT_COINBASE: Address = Address::repeat_byte(0xc0);

/// The key signing every generated transaction.
pub fn test_signer() -> PrivateKeySigner {
    PrivateKeySigner::from_bytes(&B256::with_last_byte(1)).expect("valid key")
}

/// A chain spec funding [`test_signer`].
pub fn test_spec() -> ChainSpec {
    let mut spec = ChainSpec::default();
    spec.genesis.alloc.insert(
        test_signer().address(),
        GenesisAccount {
            balance: U256::from(1_000_000u64) * U256::from(GWEI_TO_WEI) * U256::from(GWEI_TO_WEI),
            ..Default::default()
        },
    );
    spec
}

/// A consensus engine checking only linkage and timestamps.
///
/// The weight of a block is its difficulty. Every block pays [`BLOCK_REWARD`] to its
/// beneficiary so consecutive blocks never share a state root.
#[derive(Debug, Clone, Default)]
pub struct FakeConsensus {
    fail_at: Option<u64>,
}

impl FakeConsensus {
    /// Rejects every header at height `number`.
    pub const fn failing_at(number: u64) -> Self {
        Self { fail_at: Some(number) }
    }
}

impl Consensus for FakeConsensus {
    fn verify_header(
        &self,
        header: &SealedHeader,
        parent: &SealedHeader,
    ) -> Result<(), ConsensusError> {
        if self.fail_at == Some(header.number()) {
            return Err(ConsensusError::InvalidDifficulty {
                expected: U256::ZERO,
                got: header.difficulty,
            });
        }
        validation::validate_against_parent(header, parent)
    }

    fn verify_uncles(
        &self,
        _chain: &dyn HeaderProvider,
        _block: &SealedBlock,
    ) -> Result<(), ConsensusError> {
        Ok(())
    }

    fn calc_difficulty(&self, parent: &Header, _timestamp: u64) -> U256 {
        parent.difficulty
    }

    fn block_weight(&self, header: &Header) -> U256 {
        header.difficulty
    }

    fn finalize(
        &self,
        header: &Header,
        _ommers: &[Header],
        withdrawals: Option<&[Withdrawal]>,
    ) -> Vec<(Address, U256)> {
        let mut increments = vec![(header.beneficiary, BLOCK_REWARD)];
        increments.extend(withdrawals.unwrap_or_default().iter().map(|w| {
            (w.address, U256::from(w.amount) * U256::from(GWEI_TO_WEI))
        }));
        increments
    }
}

/// Describes the block [`ChainGenerator::build`] produces.
#[derive(Default)]
pub struct BlockBuilder {
    difficulty: Option<U256>,
    coinbase: Option<Address>,
    extra: Bytes,
    calls: Vec<(Address, U256, Bytes)>,
    tamper: Option<Box<dyn FnOnce(&mut Header)>>,
}

impl std::fmt::Debug for BlockBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockBuilder")
            .field("difficulty", &self.difficulty)
            .field("coinbase", &self.coinbase)
            .field("extra", &self.extra)
            .field("calls", &self.calls)
            .field("tampered", &self.tamper.is_some())
            .finish()
    }
}

impl BlockBuilder {
    /// Sets the block difficulty. Defaults to one.
    pub fn difficulty(mut self, difficulty: u64) -> Self {
        self.difficulty = Some(U256::from(difficulty));
        self
    }

    /// Sets the beneficiary. Defaults to [`DEFAULT_COINBASE`].
    pub const fn coinbase(mut self, coinbase: Address) -> Self {
        self.coinbase = Some(coinbase);
        self
    }

    /// Sets the extra data, distinguishing otherwise identical blocks.
    pub fn extra(mut self, extra: impl Into<Bytes>) -> Self {
        self.extra = extra.into();
        self
    }

    /// Adds a value transfer from [`test_signer`].
    pub fn transfer(mut self, to: Address, value: U256) -> Self {
        self.calls.push((to, value, Bytes::new()));
        self
    }

    /// Adds a call from [`test_signer`] interpreted by [`TestEvm`].
    pub fn call(mut self, to: Address, input: Bytes) -> Self {
        self.calls.push((to, U256::ZERO, input));
        self
    }

    /// Mutates the finished header before it is sealed.
    pub fn tamper(mut self, f: impl FnOnce(&mut Header) + 'static) -> Self {
        self.tamper = Some(Box::new(f));
        self
    }
}

/// Builds valid blocks by executing them on a private state store.
#[derive(Debug)]
pub struct ChainGenerator {
    spec: Arc<ChainSpec>,
    consensus: Arc<dyn Consensus>,
    processor: StateProcessor,
    state: Arc<MemoryStateStore>,
    roots: Mutex<HashMap<B256, B256>>,
}

impl Default for ChainGenerator {
    fn default() -> Self {
        Self::new(test_spec(), Arc::new(FakeConsensus::default()))
    }
}

impl ChainGenerator {
    /// Creates a generator for `spec` rewarding blocks through `consensus`.
    pub fn new(spec: ChainSpec, consensus: Arc<dyn Consensus>) -> Self {
        let spec = Arc::new(spec);
        let state = Arc::new(MemoryStateStore::new());
        state.commit(genesis_state(&spec)).expect("genesis state commits");
        let genesis = genesis_block(&spec);
        let processor = StateProcessor::new(spec.clone(), Arc::new(TestEvm), consensus.clone());
        Self {
            spec,
            consensus,
            processor,
            state,
            roots: Mutex::new(HashMap::from([(genesis.hash(), genesis.header.state_root)])),
        }
    }

    /// The chain spec.
    pub fn spec(&self) -> Arc<ChainSpec> {
        self.spec.clone()
    }

    /// The consensus engine.
    pub fn consensus(&self) -> Arc<dyn Consensus> {
        self.consensus.clone()
    }

    /// The store holding the post-state of every generated block.
    pub fn state_store(&self) -> Arc<dyn StateStore> {
        self.state.clone()
    }

    /// A fresh store holding only the genesis state.
    pub fn genesis_state_store(&self) -> Arc<dyn StateStore> {
        let store = MemoryStateStore::new();
        store.commit(genesis_state(&self.spec)).expect("genesis state commits");
        Arc::new(store)
    }

    /// The genesis block.
    pub fn genesis(&self) -> SealedBlock {
        genesis_block(&self.spec)
    }

    /// Builds and executes a child of `parent`.
    pub fn build(&self, parent: &SealedHeader, builder: BlockBuilder) -> SealedBlock {
        let signer = test_signer();
        let mut state =
            StateDb::new(self.state.clone(), parent.state_root).expect("parent state is known");
        let nonce = state.nonce(signer.address());
        let transactions = builder
            .calls
            .into_iter()
            .enumerate()
            .map(|(index, (to, value, input))| {
                Transaction {
                    tx_type: TxType::Legacy,
                    chain_id: self.spec.chain_id,
                    nonce: nonce + index as u64,
                    gas_limit: if input.is_empty() { 21_000 } else { 100_000 },
                    max_fee_per_gas: GAS_PRICE,
                    max_priority_fee_per_gas: GAS_PRICE,
                    to: TxKind::Call(to),
                    value,
                    input,
                    ..Default::default()
                }
                .sign(&signer)
            })
            .collect::<Vec<_>>();

        let number = parent.number() + 1;
        let timestamp = parent.timestamp + 10;
        let shanghai = self.spec.is_shanghai(timestamp);
        let body = BlockBody {
            transactions,
            ommers: Vec::new(),
            withdrawals: shanghai.then(Vec::new),
        };
        let mut header = Header {
            parent_hash: parent.hash(),
            ommers_hash: EMPTY_OMMER_ROOT_HASH,
            beneficiary: builder.coinbase.unwrap_or(DEFAULT_COINBASE),
            transactions_root: proofs::calculate_transaction_root(&body.transactions),
            withdrawals_root: shanghai.then_some(EMPTY_ROOT_HASH),
            difficulty: builder.difficulty.unwrap_or(U256::from(1)),
            number,
            gas_limit: parent.gas_limit,
            timestamp,
            extra_data: builder.extra,
            base_fee_per_gas: validation::expected_base_fee(&self.spec, parent),
            ..Default::default()
        };

        let unsealed = SealedBlock::new(SealedHeader::seal_slow(header.clone()), body.clone());
        let outcome = self.processor.apply_block(&unsealed, &mut state).expect("block executes");
        let root = self.state.commit(state.commit().expect("state commits")).expect("store commits");
        header.state_root = root;
        header.gas_used = outcome.gas_used;
        header.receipts_root = proofs::calculate_receipt_root(&outcome.receipts);
        header.logs_bloom = logs_bloom(outcome.receipts.iter().flat_map(|receipt| &receipt.logs));
        if let Some(tamper) = builder.tamper {
            tamper(&mut header);
        }

        let block = SealedBlock::new(SealedHeader::seal_slow(header), body);
        self.roots.lock().insert(block.hash(), block.header.state_root);
        block
    }

    /// Builds `len` consecutive blocks on `parent`, configuring block `i` with `f(i, ..)`.
    pub fn chain(
        &self,
        parent: &SealedHeader,
        len: usize,
        mut f: impl FnMut(usize, BlockBuilder) -> BlockBuilder,
    ) -> Vec<SealedBlock> {
        let mut blocks: Vec<SealedBlock> = Vec::with_capacity(len);
        for index in 0..len {
            let parent = blocks.last().map_or(parent, |block| &block.header);
            let block = self.build(parent, f(index, BlockBuilder::default()));
            blocks.push(block);
        }
        blocks
    }

    /// Executes `block` on the state of its parent without committing the result.
    pub fn execute(&self, block: &SealedBlock) -> Result<ExecutionOutcome, ExecutionError> {
        let parent_root = self
            .roots
            .lock()
            .get(&block.parent_hash())
            .copied()
            .expect("parent was generated");
        let mut state = StateDb::new(self.state.clone(), parent_root)?;
        self.processor.apply_block(block, &mut state)
    }
}
