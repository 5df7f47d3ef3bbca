use alloy_primitives::{Address, B256, U256};
use meridian_primitives::{RecoveryError, TxType};
use meridian_storage::StorageError;
use thiserror::Error;

/// Reasons a transaction cannot be included in a block.
///
/// Any of these rejects the whole block: transaction validity is part of the committed block.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidTransaction {
    /// The sender could not be recovered.
    #[error(transparent)]
    Recovery(#[from] RecoveryError),
    /// The transaction nonce is below the sender's nonce.
    #[error("nonce too low: account {expected}, tx {got}")]
    NonceTooLow {
        /// Sender nonce.
        expected: u64,
        /// Transaction nonce.
        got: u64,
    },
    /// The transaction nonce is above the sender's nonce.
    #[error("nonce too high: account {expected}, tx {got}")]
    NonceTooHigh {
        /// Sender nonce.
        expected: u64,
        /// Transaction nonce.
        got: u64,
    },
    /// The sender nonce cannot be incremented.
    #[error("nonce has max value")]
    NonceMax,
    /// The sender cannot cover the maximum cost of the transaction.
    #[error("insufficient funds: have {have}, want {want}")]
    InsufficientFunds {
        /// Sender balance.
        have: U256,
        /// Maximum cost.
        want: U256,
    },
    /// The block gas pool cannot cover the transaction gas limit.
    #[error("gas limit exceeded: pool has {available}, tx wants {wanted}")]
    GasLimitExceeded {
        /// Gas left in the block.
        available: u64,
        /// Transaction gas limit.
        wanted: u64,
    },
    /// The gas limit does not cover the intrinsic gas.
    #[error("intrinsic gas too low: have {have}, want {want}")]
    IntrinsicGasTooLow {
        /// Transaction gas limit.
        have: u64,
        /// Intrinsic gas.
        want: u64,
    },
    /// The fee cap is below the block base fee.
    #[error("max fee per gas {fee_cap} below base fee {base_fee}")]
    FeeCapTooLow {
        /// Transaction fee cap.
        fee_cap: u128,
        /// Block base fee.
        base_fee: u64,
    },
    /// The priority fee exceeds the fee cap.
    #[error("max priority fee per gas higher than max fee per gas")]
    TipAboveFeeCap,
    /// The sender has code deployed.
    #[error("sender {0} is not an externally owned account")]
    SenderNotEoa(Address),
    /// The chain id does not match the chain.
    #[error("invalid chain id: expected {expected}, got {got}")]
    InvalidChainId {
        /// Chain id of the chain.
        expected: u64,
        /// Chain id of the transaction.
        got: u64,
    },
    /// Creation init code is larger than allowed.
    #[error("max initcode size exceeded: {size} > {max}")]
    MaxInitCodeSizeExceeded {
        /// Init code size.
        size: usize,
        /// Maximum size.
        max: usize,
    },
    /// The transaction type is not active at this block.
    #[error("transaction type {0:?} not supported")]
    UnsupportedType(TxType),
    /// A blob transaction references no blobs.
    #[error("blob transaction without blobs")]
    EmptyBlobs,
    /// A blob transaction tries to create a contract.
    #[error("blob transaction cannot create a contract")]
    BlobCreate,
    /// The blob fee cap is below the blob gas price.
    #[error("max fee per blob gas {fee_cap} below blob gas price {price}")]
    BlobFeeCapTooLow {
        /// Transaction blob fee cap.
        fee_cap: u128,
        /// Block blob gas price.
        price: u128,
    },
    /// The block blob gas limit is exhausted.
    #[error("blob gas limit exceeded: pool has {available}, tx wants {wanted}")]
    BlobGasLimitExceeded {
        /// Blob gas left in the block.
        available: u64,
        /// Blob gas of the transaction.
        wanted: u64,
    },
}

/// Errors raised while executing a block.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecutionError {
    /// A transaction of the block is invalid.
    #[error("transaction {index} ({hash}) invalid: {kind}")]
    InvalidTransaction {
        /// Index of the transaction in the block.
        index: usize,
        /// Transaction hash.
        hash: B256,
        /// Validation failure.
        kind: InvalidTransaction,
    },
    /// State could not be read or committed.
    #[error(transparent)]
    Storage(#[from] StorageError),
}
