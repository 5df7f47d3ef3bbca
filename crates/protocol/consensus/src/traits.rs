use crate::ConsensusError;
use alloy_primitives::{Address, B256, U256};
use meridian_primitives::{Header, SealedBlock, SealedHeader, Withdrawal};

/// Read access to already-known headers and uncles, used for uncle verification.
#[auto_impl::auto_impl(&, Arc)]
pub trait HeaderProvider {
    /// Returns the header with the given hash.
    fn header(&self, hash: &B256) -> Option<SealedHeader>;

    /// Returns the uncles included by the block with the given hash.
    fn ommers(&self, hash: &B256) -> Option<Vec<Header>>;
}

/// A consensus engine.
///
/// The chain manager only depends on this capability. Each consensus family supplies one
/// implementation.
#[auto_impl::auto_impl(&, Arc, Box)]
pub trait Consensus: core::fmt::Debug + Send + Sync {
    /// Checks a header against its parent.
    fn verify_header(
        &self,
        header: &SealedHeader,
        parent: &SealedHeader,
    ) -> Result<(), ConsensusError>;

    /// Checks the uncles of a block against its recent ancestry.
    fn verify_uncles(
        &self,
        chain: &dyn HeaderProvider,
        block: &SealedBlock,
    ) -> Result<(), ConsensusError>;

    /// Computes the difficulty a child of `parent` must carry at `timestamp`.
    fn calc_difficulty(&self, parent: &Header, timestamp: u64) -> U256;

    /// Contribution of the header to the total chain weight.
    fn block_weight(&self, header: &Header) -> U256;

    /// Returns the balance increments applied after the block's transactions: block rewards,
    /// uncle rewards and withdrawals.
    fn finalize(
        &self,
        header: &Header,
        ommers: &[Header],
        withdrawals: Option<&[Withdrawal]>,
    ) -> Vec<(Address, U256)>;
}
