//! Proof-of-work engine.

use crate::{
    Consensus, ConsensusError, HeaderProvider,
    validation::{MAXIMUM_EXTRA_DATA_SIZE, validate_header_standalone},
};
use alloy_primitives::{Address, U256};
use meridian_primitives::{
    ChainSpec, EMPTY_OMMER_ROOT_HASH, Header, SealedBlock, SealedHeader, Withdrawal,
};
use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

/// Tunables of the proof-of-work engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EthashConfig {
    /// Reward credited to the block's fee recipient.
    pub block_reward: U256,
    /// Difficulty never drops below this value.
    pub minimum_difficulty: U256,
    /// Divisor bounding the per-block difficulty adjustment.
    pub difficulty_bound_divisor: u64,
    /// Maximum number of uncles per block.
    pub max_uncles: usize,
    /// How many generations back an uncle's parent may be.
    pub max_uncle_depth: u64,
}

impl Default for EthashConfig {
    fn default() -> Self {
        Self {
            block_reward: U256::from(2_000_000_000_000_000_000u128),
            minimum_difficulty: U256::from(131_072),
            difficulty_bound_divisor: 2048,
            max_uncles: 2,
            max_uncle_depth: 7,
        }
    }
}

/// Proof-of-work consensus: difficulty adjustment, block and uncle rewards.
#[derive(Debug, Clone)]
pub struct EthashConsensus {
    spec: Arc<ChainSpec>,
    config: EthashConfig,
}

impl EthashConsensus {
    /// Creates a new engine.
    pub const fn new(spec: Arc<ChainSpec>, config: EthashConfig) -> Self {
        Self { spec, config }
    }

    /// Returns the engine configuration.
    pub const fn config(&self) -> &EthashConfig {
        &self.config
    }
}

impl Consensus for EthashConsensus {
    fn verify_header(
        &self,
        header: &SealedHeader,
        parent: &SealedHeader,
    ) -> Result<(), ConsensusError> {
        validate_header_standalone(&self.spec, header, parent, MAXIMUM_EXTRA_DATA_SIZE)?;
        let expected = self.calc_difficulty(parent, header.timestamp);
        if header.difficulty != expected {
            return Err(ConsensusError::InvalidDifficulty { expected, got: header.difficulty });
        }
        Ok(())
    }

    fn verify_uncles(
        &self,
        chain: &dyn HeaderProvider,
        block: &SealedBlock,
    ) -> Result<(), ConsensusError> {
        let ommers = &block.body.ommers;
        if ommers.len() > self.config.max_uncles {
            return Err(ConsensusError::TooManyUncles(ommers.len()));
        }
        if ommers.is_empty() {
            return Ok(());
        }

        let mut ancestors = HashMap::new();
        let mut seen = HashSet::new();
        let mut cursor = block.parent_hash();
        for _ in 0..=self.config.max_uncle_depth {
            let Some(ancestor) = chain.header(&cursor) else { break };
            for uncle in chain.ommers(&cursor).unwrap_or_default() {
                seen.insert(uncle.hash_slow());
            }
            cursor = ancestor.parent_hash();
            ancestors.insert(ancestor.hash(), ancestor);
        }
        seen.insert(block.hash());

        for uncle in ommers {
            let uncle = SealedHeader::seal_slow(uncle.clone());
            let hash = uncle.hash();
            if !seen.insert(hash) {
                return Err(ConsensusError::DuplicateUncle(hash));
            }
            if ancestors.contains_key(&hash) {
                return Err(ConsensusError::UncleIsAncestor(hash));
            }
            let Some(parent) = ancestors.get(&uncle.parent_hash()) else {
                return Err(ConsensusError::DanglingUncle(hash));
            };
            if uncle.parent_hash() == block.parent_hash() {
                return Err(ConsensusError::DanglingUncle(hash));
            }
            self.verify_header(&uncle, parent)
                .map_err(|err| ConsensusError::InvalidUncle { hash, reason: Box::new(err) })?;
        }
        Ok(())
    }

    fn calc_difficulty(&self, parent: &Header, timestamp: u64) -> U256 {
        let uncles = if parent.ommers_hash == EMPTY_OMMER_ROOT_HASH { 1 } else { 2 };
        let elapsed = (timestamp.saturating_sub(parent.timestamp) / 9) as i64;
        let adjustment = (uncles - elapsed).max(-99);
        let step = parent.difficulty / U256::from(self.config.difficulty_bound_divisor);
        let difficulty = if adjustment >= 0 {
            parent.difficulty.saturating_add(step * U256::from(adjustment))
        } else {
            parent.difficulty.saturating_sub(step * U256::from(-adjustment))
        };
        difficulty.max(self.config.minimum_difficulty)
    }

    fn block_weight(&self, header: &Header) -> U256 {
        header.difficulty
    }

    fn finalize(
        &self,
        header: &Header,
        ommers: &[Header],
        _withdrawals: Option<&[Withdrawal]>,
    ) -> Vec<(Address, U256)> {
        let base = self.config.block_reward;
        let mut increments = Vec::with_capacity(ommers.len() + 1);
        let mut reward = base;
        for uncle in ommers {
            let depth_factor = U256::from(uncle.number + 8 - header.number);
            increments.push((uncle.beneficiary, depth_factor * base / U256::from(8)));
            reward += base / U256::from(32);
        }
        increments.push((header.beneficiary, reward));
        increments
    }
}
