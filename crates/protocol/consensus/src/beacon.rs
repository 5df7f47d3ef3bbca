//! Proof-of-stake wrapper around a pre-merge engine.

use crate::{
    Consensus, ConsensusError, HeaderProvider,
    validation::{MAXIMUM_EXTRA_DATA_SIZE, validate_header_standalone},
};
use alloy_primitives::{Address, B64, U256};
use meridian_primitives::{
    ChainSpec, EMPTY_OMMER_ROOT_HASH, GWEI_TO_WEI, Header, SealedBlock, SealedHeader, Withdrawal,
};
use std::sync::Arc;

/// Proof-of-stake consensus.
///
/// Headers with zero difficulty follow the proof-of-stake rules: zero nonce, no uncles, no block
/// reward and no contribution to the total chain weight. Any other header is handed to the
/// wrapped engine.
#[derive(Debug, Clone)]
pub struct BeaconConsensus<C> {
    spec: Arc<ChainSpec>,
    inner: C,
}

impl<C> BeaconConsensus<C> {
    /// Wraps `inner`, which handles headers before the merge.
    pub const fn new(spec: Arc<ChainSpec>, inner: C) -> Self {
        Self { spec, inner }
    }

    /// Returns the wrapped engine.
    pub const fn inner(&self) -> &C {
        &self.inner
    }

    /// Returns true if the header follows the proof-of-stake rules.
    pub fn is_pos_header(header: &Header) -> bool {
        header.difficulty.is_zero()
    }
}

impl<C: Consensus> Consensus for BeaconConsensus<C> {
    fn verify_header(
        &self,
        header: &SealedHeader,
        parent: &SealedHeader,
    ) -> Result<(), ConsensusError> {
        if !Self::is_pos_header(header) {
            if Self::is_pos_header(parent) && parent.number() > 0 {
                return Err(ConsensusError::PowAfterMerge);
            }
            return self.inner.verify_header(header, parent);
        }
        validate_header_standalone(&self.spec, header, parent, MAXIMUM_EXTRA_DATA_SIZE)?;
        if header.nonce != B64::ZERO {
            return Err(ConsensusError::InvalidPosHeader("nonce must be zero"));
        }
        if header.ommers_hash != EMPTY_OMMER_ROOT_HASH {
            return Err(ConsensusError::InvalidPosHeader("ommers must be empty"));
        }
        Ok(())
    }

    fn verify_uncles(
        &self,
        chain: &dyn HeaderProvider,
        block: &SealedBlock,
    ) -> Result<(), ConsensusError> {
        if Self::is_pos_header(&block.header) {
            if !block.body.ommers.is_empty() {
                return Err(ConsensusError::InvalidPosHeader("ommers must be empty"));
            }
            return Ok(());
        }
        self.inner.verify_uncles(chain, block)
    }

    fn calc_difficulty(&self, parent: &Header, timestamp: u64) -> U256 {
        if Self::is_pos_header(parent) && parent.number > 0 {
            return U256::ZERO;
        }
        self.inner.calc_difficulty(parent, timestamp)
    }

    fn block_weight(&self, header: &Header) -> U256 {
        if Self::is_pos_header(header) {
            return U256::ZERO;
        }
        self.inner.block_weight(header)
    }

    fn finalize(
        &self,
        header: &Header,
        ommers: &[Header],
        withdrawals: Option<&[Withdrawal]>,
    ) -> Vec<(Address, U256)> {
        if !Self::is_pos_header(header) {
            return self.inner.finalize(header, ommers, withdrawals);
        }
        withdrawals
            .unwrap_or_default()
            .iter()
            .filter(|w| w.amount > 0)
            .map(|w| (w.address, U256::from(w.amount) * U256::from(GWEI_TO_WEI)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{EthashConfig, EthashConsensus};

    fn engine() -> BeaconConsensus<EthashConsensus> {
        let spec = Arc::new(ChainSpec::default());
        BeaconConsensus::new(spec.clone(), EthashConsensus::new(spec, EthashConfig::default()))
    }

    fn pow_parent() -> SealedHeader {
        SealedHeader::seal_slow(Header {
            number: 10,
            timestamp: 100,
            gas_limit: 8_000_000,
            difficulty: U256::from(131_072),
            ..Default::default()
        })
    }

    #[test]
    fn test_pos_header_after_pow_parent() {
        let header = SealedHeader::seal_slow(Header {
            number: 11,
            timestamp: 112,
            gas_limit: 8_000_000,
            ..Default::default()
        });
        assert_eq!(engine().verify_header(&header, &pow_parent()), Ok(()));
        assert_eq!(engine().block_weight(&header), U256::ZERO);
    }

    #[test]
    fn test_pos_header_rejects_nonce() {
        let header = SealedHeader::seal_slow(Header {
            number: 11,
            timestamp: 112,
            gas_limit: 8_000_000,
            nonce: B64::with_last_byte(1),
            ..Default::default()
        });
        assert_eq!(
            engine().verify_header(&header, &pow_parent()),
            Err(ConsensusError::InvalidPosHeader("nonce must be zero"))
        );
    }

    #[test]
    fn test_pow_after_merge() {
        let pos_parent = SealedHeader::seal_slow(Header {
            number: 11,
            timestamp: 112,
            gas_limit: 8_000_000,
            ..Default::default()
        });
        let header = SealedHeader::seal_slow(Header {
            number: 12,
            timestamp: 124,
            gas_limit: 8_000_000,
            difficulty: U256::from(131_072),
            ..Default::default()
        });
        assert_eq!(engine().verify_header(&header, &pos_parent), Err(ConsensusError::PowAfterMerge));
    }

    #[test]
    fn test_withdrawals_credited_in_wei() {
        let header = Header { number: 11, ..Default::default() };
        let withdrawals = vec![
            Withdrawal { index: 0, validator_index: 1, address: Address::with_last_byte(1), amount: 2 },
            Withdrawal { index: 1, validator_index: 2, address: Address::with_last_byte(2), amount: 0 },
        ];
        let increments = engine().finalize(&header, &[], Some(&withdrawals));
        assert_eq!(increments, vec![(Address::with_last_byte(1), U256::from(2_000_000_000u64))]);
    }
}
