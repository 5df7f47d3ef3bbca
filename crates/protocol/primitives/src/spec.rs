use crate::{
    Account, EMPTY_OMMER_ROOT_HASH, EMPTY_ROOT_HASH, Header, KECCAK_EMPTY, SealedHeader, proofs,
};
use alloy_primitives::{Address, B256, BlockNumber, Bytes, U256, keccak256};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// An allocation in the genesis state.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenesisAccount {
    /// Starting balance.
    pub balance: U256,
    /// Starting nonce.
    #[serde(default)]
    pub nonce: u64,
    /// Contract code.
    #[serde(default)]
    pub code: Option<Bytes>,
    /// Storage slots.
    #[serde(default)]
    pub storage: BTreeMap<B256, U256>,
}

impl GenesisAccount {
    /// Computes the account record committed to the genesis state.
    pub fn account(&self) -> Account {
        Account {
            nonce: self.nonce,
            balance: self.balance,
            code_hash: self.code.as_ref().map_or(KECCAK_EMPTY, keccak256),
            storage_root: if self.storage.is_empty() {
                EMPTY_ROOT_HASH
            } else {
                proofs::storage_root(self.storage.iter())
            },
        }
    }
}

/// The initial block and allocation of a chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Genesis {
    /// Genesis timestamp.
    pub timestamp: u64,
    /// Genesis gas limit.
    pub gas_limit: u64,
    /// Genesis difficulty.
    pub difficulty: U256,
    /// Extra data carried in the genesis header.
    #[serde(default)]
    pub extra_data: Bytes,
    /// Fee recipient of the genesis header.
    #[serde(default)]
    pub coinbase: Address,
    /// Base fee of the genesis block when London is active from genesis.
    #[serde(default)]
    pub base_fee_per_gas: Option<u64>,
    /// Initial world state.
    #[serde(default)]
    pub alloc: BTreeMap<Address, GenesisAccount>,
}

impl Default for Genesis {
    fn default() -> Self {
        Self {
            timestamp: 0,
            gas_limit: 30_000_000,
            difficulty: U256::from(1),
            extra_data: Bytes::new(),
            coinbase: Address::ZERO,
            base_fee_per_gas: None,
            alloc: BTreeMap::new(),
        }
    }
}

impl Genesis {
    /// Root of the genesis allocation.
    pub fn state_root(&self) -> B256 {
        let accounts =
            self.alloc.iter().map(|(address, alloc)| (*address, alloc.account())).collect::<Vec<_>>();
        proofs::state_root(accounts.iter().map(|(address, account)| (address, account)))
    }
}

/// Fork activation and chain parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainSpec {
    /// Replay protection chain id.
    pub chain_id: u64,
    /// Block at which the EIP-1559 fee market activates.
    pub london_block: Option<BlockNumber>,
    /// Timestamp at which withdrawals activate.
    pub shanghai_time: Option<u64>,
    /// Timestamp at which blob transactions activate.
    pub cancun_time: Option<u64>,
    /// Total difficulty at which the chain hands block production to an external driver.
    pub terminal_total_difficulty: Option<U256>,
    /// Genesis definition.
    pub genesis: Genesis,
}

impl Default for ChainSpec {
    fn default() -> Self {
        Self {
            chain_id: 1337,
            london_block: None,
            shanghai_time: None,
            cancun_time: None,
            terminal_total_difficulty: None,
            genesis: Genesis::default(),
        }
    }
}

impl ChainSpec {
    /// Returns true if the fee market is active at `number`.
    pub fn is_london(&self, number: BlockNumber) -> bool {
        self.london_block.is_some_and(|block| number >= block)
    }

    /// Returns true if withdrawals are active at `timestamp`.
    pub fn is_shanghai(&self, timestamp: u64) -> bool {
        self.shanghai_time.is_some_and(|time| timestamp >= time)
    }

    /// Returns true if blob transactions are active at `timestamp`.
    pub fn is_cancun(&self, timestamp: u64) -> bool {
        self.cancun_time.is_some_and(|time| timestamp >= time)
    }

    /// Builds and seals the genesis header.
    pub fn genesis_header(&self) -> SealedHeader {
        let genesis = &self.genesis;
        let london = self.is_london(0);
        let shanghai = self.is_shanghai(genesis.timestamp);
        let cancun = self.is_cancun(genesis.timestamp);
        SealedHeader::seal_slow(Header {
            parent_hash: B256::ZERO,
            ommers_hash: EMPTY_OMMER_ROOT_HASH,
            beneficiary: genesis.coinbase,
            state_root: genesis.state_root(),
            transactions_root: EMPTY_ROOT_HASH,
            receipts_root: EMPTY_ROOT_HASH,
            difficulty: genesis.difficulty,
            number: 0,
            gas_limit: genesis.gas_limit,
            timestamp: genesis.timestamp,
            extra_data: genesis.extra_data.clone(),
            base_fee_per_gas: london.then(|| genesis.base_fee_per_gas.unwrap_or(1_000_000_000)),
            withdrawals_root: shanghai.then_some(EMPTY_ROOT_HASH),
            blob_gas_used: cancun.then_some(0),
            excess_blob_gas: cancun.then_some(0),
            ..Default::default()
        })
    }

    /// Account records of the genesis allocation, with code and storage.
    pub fn genesis_accounts(&self) -> impl Iterator<Item = (Address, Account, &GenesisAccount)> {
        self.genesis.alloc.iter().map(|(address, alloc)| (*address, alloc.account(), alloc))
    }
}
