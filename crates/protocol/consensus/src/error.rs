use alloy_primitives::{Address, B256, U256};
use thiserror::Error;

/// Errors raised by a [`crate::Consensus`] engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConsensusError {
    /// The header does not follow its parent by number.
    #[error("invalid block number: expected {expected}, got {got}")]
    InvalidNumber {
        /// Parent number plus one.
        expected: u64,
        /// Number found in the header.
        got: u64,
    },
    /// The header's timestamp does not advance past its parent's.
    #[error("timestamp {timestamp} is not after parent timestamp {parent_timestamp}")]
    TimestampNotAfterParent {
        /// Header timestamp.
        timestamp: u64,
        /// Parent timestamp.
        parent_timestamp: u64,
    },
    /// The extra-data field is longer than allowed.
    #[error("extra data too long: {len} > {max}")]
    ExtraDataTooLong {
        /// Actual length.
        len: usize,
        /// Maximum length.
        max: usize,
    },
    /// The gas limit moved further than the protocol allows in one block.
    #[error("invalid gas limit {got}, parent {parent}")]
    InvalidGasLimit {
        /// Parent gas limit.
        parent: u64,
        /// Header gas limit.
        got: u64,
    },
    /// The header reports more gas used than its limit.
    #[error("gas used {used} exceeds gas limit {limit}")]
    GasUsedExceedsLimit {
        /// Gas used.
        used: u64,
        /// Gas limit.
        limit: u64,
    },
    /// The difficulty does not match the engine's computation.
    #[error("invalid difficulty: expected {expected}, got {got}")]
    InvalidDifficulty {
        /// Computed difficulty.
        expected: U256,
        /// Difficulty found in the header.
        got: U256,
    },
    /// A fee-market header has no base fee.
    #[error("base fee missing")]
    BaseFeeMissing,
    /// The base fee does not match the value computed from the parent.
    #[error("invalid base fee: expected {expected}, got {got}")]
    BaseFeeMismatch {
        /// Computed base fee.
        expected: u64,
        /// Base fee found in the header.
        got: u64,
    },
    /// A header before the fee-market fork carries a base fee.
    #[error("unexpected base fee before london")]
    UnexpectedBaseFee,
    /// A header after Cancun lacks the blob gas fields.
    #[error("blob gas fields missing")]
    BlobGasFieldsMissing,
    /// The excess blob gas does not match the value computed from the parent.
    #[error("invalid excess blob gas: expected {expected}, got {got}")]
    ExcessBlobGasMismatch {
        /// Computed excess blob gas.
        expected: u64,
        /// Excess blob gas found in the header.
        got: u64,
    },
    /// A header before Cancun carries blob gas fields.
    #[error("unexpected blob gas fields before cancun")]
    UnexpectedBlobGasFields,
    /// A header after Shanghai lacks the withdrawals root.
    #[error("withdrawals root missing")]
    WithdrawalsRootMissing,
    /// A header before Shanghai carries a withdrawals root.
    #[error("unexpected withdrawals root before shanghai")]
    UnexpectedWithdrawalsRoot,
    /// The block carries more uncles than allowed.
    #[error("too many uncles: {0}")]
    TooManyUncles(usize),
    /// The same uncle appears twice, or was already included by an ancestor.
    #[error("duplicate uncle {0}")]
    DuplicateUncle(B256),
    /// The uncle is an ancestor of the including block.
    #[error("uncle {0} is an ancestor")]
    UncleIsAncestor(B256),
    /// The uncle's parent is not a recent ancestor of the including block.
    #[error("uncle {0} has no recent ancestor")]
    DanglingUncle(B256),
    /// The uncle header itself is invalid.
    #[error("invalid uncle {hash}: {reason}")]
    InvalidUncle {
        /// Uncle hash.
        hash: B256,
        /// Validation failure of the uncle header.
        reason: Box<ConsensusError>,
    },
    /// The engine does not allow uncles.
    #[error("uncles not allowed")]
    UnclesNotAllowed,
    /// The header is missing its signer seal.
    #[error("missing signer seal")]
    MissingSeal,
    /// The signer seal does not recover to a public key.
    #[error("invalid signer seal")]
    InvalidSeal,
    /// The recovered signer is not authorized.
    #[error("unauthorized signer {0}")]
    UnauthorizedSigner(Address),
    /// A proof-of-stake header violates its fixed-field rules.
    #[error("invalid proof-of-stake header: {0}")]
    InvalidPosHeader(&'static str),
    /// A proof-of-work header follows a proof-of-stake parent.
    #[error("proof-of-work header after the merge")]
    PowAfterMerge,
}
