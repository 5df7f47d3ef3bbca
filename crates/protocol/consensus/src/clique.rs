//! Proof-of-authority engine with a fixed signer set.

use crate::{
    Consensus, ConsensusError, HeaderProvider,
    validation::{MAXIMUM_EXTRA_DATA_SIZE, validate_header_standalone},
};
use alloy_primitives::{Address, B256, Bytes, Signature, U256};
use meridian_primitives::{
    ChainSpec, EMPTY_OMMER_ROOT_HASH, Header, SealedBlock, SealedHeader, Withdrawal,
};
use std::sync::Arc;

/// Length of the vanity prefix in the extra-data field.
pub const EXTRA_VANITY: usize = 32;

/// Length of the signer seal suffix in the extra-data field.
pub const EXTRA_SEAL: usize = 65;

/// Difficulty of a block sealed by the in-turn signer.
pub const DIFF_IN_TURN: U256 = U256::from_limbs([2, 0, 0, 0]);

/// Difficulty of a block sealed out of turn.
pub const DIFF_NO_TURN: U256 = U256::from_limbs([1, 0, 0, 0]);

/// Proof-of-authority consensus.
///
/// Blocks are sealed by a signature in the trailing bytes of the extra-data field. The signer
/// whose index equals `number % signers.len()` is in turn and seals with difficulty 2.
#[derive(Debug, Clone)]
pub struct CliqueConsensus {
    spec: Arc<ChainSpec>,
    signers: Vec<Address>,
    period: u64,
}

impl CliqueConsensus {
    /// Creates a new engine. `signers` is sorted so the turn order is deterministic.
    pub fn new(spec: Arc<ChainSpec>, mut signers: Vec<Address>, period: u64) -> Self {
        signers.sort();
        signers.dedup();
        Self { spec, signers, period }
    }

    /// Returns true if `signer` is in turn for block `number`.
    pub fn in_turn(&self, number: u64, signer: Address) -> bool {
        if self.signers.is_empty() {
            return false;
        }
        let index = (number % self.signers.len() as u64) as usize;
        self.signers[index] == signer
    }

    /// Hash covered by the signer seal: the header with the seal stripped from the extra data.
    pub fn seal_hash(header: &Header) -> B256 {
        let mut header = header.clone();
        let len = header.extra_data.len().saturating_sub(EXTRA_SEAL);
        header.extra_data = Bytes::copy_from_slice(&header.extra_data[..len]);
        header.hash_slow()
    }

    /// Recovers the signer from the header seal.
    pub fn recover_signer(header: &Header) -> Result<Address, ConsensusError> {
        let extra = &header.extra_data;
        if extra.len() < EXTRA_VANITY + EXTRA_SEAL {
            return Err(ConsensusError::MissingSeal);
        }
        let seal = &extra[extra.len() - EXTRA_SEAL..];
        let signature = Signature::from_raw(seal).map_err(|_| ConsensusError::InvalidSeal)?;
        signature
            .recover_address_from_prehash(&Self::seal_hash(header))
            .map_err(|_| ConsensusError::InvalidSeal)
    }
}

impl Consensus for CliqueConsensus {
    fn verify_header(
        &self,
        header: &SealedHeader,
        parent: &SealedHeader,
    ) -> Result<(), ConsensusError> {
        validate_header_standalone(
            &self.spec,
            header,
            parent,
            MAXIMUM_EXTRA_DATA_SIZE + EXTRA_SEAL,
        )?;
        if header.ommers_hash != EMPTY_OMMER_ROOT_HASH {
            return Err(ConsensusError::UnclesNotAllowed);
        }
        if header.timestamp < parent.timestamp + self.period {
            return Err(ConsensusError::TimestampNotAfterParent {
                timestamp: header.timestamp,
                parent_timestamp: parent.timestamp + self.period,
            });
        }
        let signer = Self::recover_signer(header)?;
        if !self.signers.contains(&signer) {
            return Err(ConsensusError::UnauthorizedSigner(signer));
        }
        let expected = if self.in_turn(header.number, signer) { DIFF_IN_TURN } else { DIFF_NO_TURN };
        if header.difficulty != expected {
            return Err(ConsensusError::InvalidDifficulty { expected, got: header.difficulty });
        }
        Ok(())
    }

    fn verify_uncles(
        &self,
        _chain: &dyn HeaderProvider,
        block: &SealedBlock,
    ) -> Result<(), ConsensusError> {
        if !block.body.ommers.is_empty() {
            return Err(ConsensusError::UnclesNotAllowed);
        }
        Ok(())
    }

    /// The in-turn signer is not known from the parent alone, so this reports the out-of-turn
    /// difficulty. Block producers pick [`DIFF_IN_TURN`] when sealing in turn.
    fn calc_difficulty(&self, _parent: &Header, _timestamp: u64) -> U256 {
        DIFF_NO_TURN
    }

    fn block_weight(&self, header: &Header) -> U256 {
        header.difficulty
    }

    fn finalize(
        &self,
        _header: &Header,
        _ommers: &[Header],
        _withdrawals: Option<&[Withdrawal]>,
    ) -> Vec<(Address, U256)> {
        Vec::new()
    }
}
