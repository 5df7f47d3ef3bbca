use crate::InvalidHeadsError;
use alloy_primitives::{B256, Bloom};
use meridian_consensus::ConsensusError;
use meridian_executor::ExecutionError;
use meridian_primitives::BlockNumHash;
use meridian_storage::StorageError;
use thiserror::Error;

/// A block failed body or state validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// The block and its state are already known.
    #[error("block {0:?} already known")]
    KnownBlock(BlockNumHash),
    /// The parent of the block is unknown.
    #[error("unknown ancestor {parent}")]
    UnknownAncestor {
        /// Parent hash of the block.
        parent: B256,
    },
    /// The parent is known but its state is not available.
    #[error("pruned ancestor {parent}")]
    PrunedAncestor {
        /// Parent hash of the block.
        parent: B256,
    },
    /// The transactions do not hash to the header's transactions root.
    #[error("transaction root mismatch: header {expected}, body {got}")]
    TransactionsRootMismatch {
        /// Root in the header.
        expected: B256,
        /// Root of the body.
        got: B256,
    },
    /// The uncles do not hash to the header's ommers hash.
    #[error("uncle root mismatch: header {expected}, body {got}")]
    OmmersHashMismatch {
        /// Hash in the header.
        expected: B256,
        /// Hash of the body.
        got: B256,
    },
    /// The withdrawals do not hash to the header's withdrawals root.
    #[error("withdrawals root mismatch: header {expected:?}, body {got:?}")]
    WithdrawalsRootMismatch {
        /// Root in the header.
        expected: Option<B256>,
        /// Root of the body.
        got: Option<B256>,
    },
    /// A transaction carries its blob sidecar inside the block body.
    #[error("unexpected blob sidecar in transaction {0}")]
    BlobSidecarPresent(B256),
    /// The blobs of the body do not add up to the header's blob gas.
    #[error("blob gas used mismatch: header {expected:?}, body {got}")]
    BlobGasUsedMismatch {
        /// Blob gas in the header.
        expected: Option<u64>,
        /// Blob gas of the body.
        got: u64,
    },
    /// Execution used a different amount of gas than the header declares.
    #[error("invalid gas used: header {expected}, remote {got}")]
    GasUsedMismatch {
        /// Gas in the header.
        expected: u64,
        /// Gas used by execution.
        got: u64,
    },
    /// The bloom of the receipts differs from the header.
    #[error("invalid bloom: header {expected}, receipts {got}")]
    BloomMismatch {
        /// Bloom in the header.
        expected: Box<Bloom>,
        /// Bloom of the receipts.
        got: Box<Bloom>,
    },
    /// The receipts do not hash to the header's receipts root.
    #[error("invalid receipt root hash: header {expected}, receipts {got}")]
    ReceiptsRootMismatch {
        /// Root in the header.
        expected: B256,
        /// Root of the receipts.
        got: B256,
    },
    /// Execution produced a different state root.
    #[error("invalid merkle root: header {expected}, local {got}")]
    StateRootMismatch {
        /// Root in the header.
        expected: B256,
        /// Root produced by execution.
        got: B256,
    },
    /// The header or uncles violate consensus rules.
    #[error(transparent)]
    Consensus(#[from] ConsensusError),
}

/// Errors raised by the chain manager.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BlockchainError {
    /// The block hash is banned.
    #[error("banned hash {0}")]
    BannedHash(B256),
    /// The block descends from a block that failed validation.
    #[error("invalid ancestor {bad}")]
    InvalidAncestor {
        /// The invalid ancestor.
        bad: B256,
    },
    /// The ancestor of the batch has not been attested yet.
    #[error("ancestor {0:?} not attested")]
    AncestorNotAttested(BlockNumHash),
    /// A batch item does not build on the previous one.
    #[error("non contiguous insert: item {prev:?} followed by {next:?}")]
    NonContiguous {
        /// The previous item.
        prev: BlockNumHash,
        /// The item that does not link to it.
        next: BlockNumHash,
    },
    /// A referenced header is missing.
    #[error("missing header {0}")]
    MissingHeader(B256),
    /// A referenced body is missing.
    #[error("missing body {0}")]
    MissingBody(B256),
    /// A block handed in with receipts is not on the canonical header chain.
    #[error("block {0:?} is not canonical")]
    NotCanonical(BlockNumHash),
    /// Receipts do not continue the snap head.
    #[error("receipt chain gap: expected block {expected}, got {got}")]
    ReceiptGap {
        /// Next expected block number.
        expected: u64,
        /// Number handed in.
        got: u64,
    },
    /// The number of receipt lists does not match the number of blocks.
    #[error("receipt batch mismatch: {blocks} blocks, {receipts} receipt lists")]
    ReceiptCountMismatch {
        /// Number of blocks.
        blocks: usize,
        /// Number of receipt lists.
        receipts: usize,
    },
    /// The stored genesis differs from the configured one.
    #[error("genesis mismatch: stored {stored}, configured {configured}")]
    GenesisMismatch {
        /// Genesis hash found in the store.
        stored: B256,
        /// Genesis hash of the chain spec.
        configured: B256,
    },
    /// The chain manager was stopped.
    #[error("blockchain is stopped")]
    Stopped,
    /// A head update would break the watermark ordering.
    #[error(transparent)]
    Heads(#[from] Box<InvalidHeadsError>),
    /// Body or state validation failed.
    #[error(transparent)]
    Validation(#[from] ValidationError),
    /// A header violates consensus rules.
    #[error(transparent)]
    Consensus(#[from] ConsensusError),
    /// Execution failed.
    #[error(transparent)]
    Execution(#[from] ExecutionError),
    /// The store failed.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl BlockchainError {
    /// Returns true if the error proves the block invalid, so it and its descendants must be
    /// rejected forever.
    pub const fn is_invalid_block(&self) -> bool {
        match self {
            Self::Validation(err) => !matches!(
                err,
                ValidationError::KnownBlock(_) |
                    ValidationError::UnknownAncestor { .. } |
                    ValidationError::PrunedAncestor { .. }
            ),
            Self::Consensus(_) | Self::Execution(ExecutionError::InvalidTransaction { .. }) => true,
            _ => false,
        }
    }
}

/// A batch insertion failed.
///
/// Items before `index` were accepted and stay committed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("insert failed at index {index} (block {block:?}): {kind}")]
pub struct InsertChainError {
    /// Index of the failing item in the batch.
    pub index: usize,
    /// The failing item.
    pub block: BlockNumHash,
    /// Why it failed.
    pub kind: BlockchainError,
}

impl InsertChainError {
    /// Creates a new error.
    pub const fn new(index: usize, block: BlockNumHash, kind: BlockchainError) -> Self {
        Self { index, block, kind }
    }
}
