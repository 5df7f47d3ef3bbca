use meridian_primitives::BlockNumHash;
use std::fmt::Debug;

/// Remote attestation of chain ancestors.
///
/// When a verifier is installed, a batch of blocks is only inserted once the block it builds on
/// is attested.
#[auto_impl::auto_impl(&, Arc, Box)]
#[cfg_attr(test, mockall::automock)]
pub trait AncestorVerifier: Debug + Send + Sync {
    /// Returns true if `ancestor` has been attested.
    fn is_attested(&self, ancestor: &BlockNumHash) -> bool;
}
