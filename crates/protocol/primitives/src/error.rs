use alloy_primitives::B256;
use thiserror::Error;

/// Errors raised while recovering the sender of a [`crate::TransactionSigned`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecoveryError {
    /// The signature does not recover to a valid public key.
    #[error("invalid signature for transaction {0}")]
    InvalidSignature(B256),
}
