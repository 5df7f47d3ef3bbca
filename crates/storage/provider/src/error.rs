use alloy_primitives::{Address, B256, BlockNumber};
use thiserror::Error;

/// Errors raised by the chain and state stores.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    /// The expected entry was not found.
    #[error("entry not found: {0}")]
    EntryNotFound(String),

    /// A write conflicts with data already in the store.
    #[error("conflict error: {0}")]
    ConflictError(String),

    /// Freezing must move blocks in order, starting at the current ancient length.
    #[error("ancient gap: expected block {expected}, got {got}")]
    AncientGap {
        /// Next ancient number.
        expected: BlockNumber,
        /// Number that was offered.
        got: BlockNumber,
    },

    /// The state for the given root is not available.
    #[error("missing trie node for root {0}")]
    MissingTrieNode(B256),

    /// The storage trie of an account does not match the requested root.
    #[error("storage root mismatch for {owner}: expected {expected}, found {found}")]
    StorageRootMismatch {
        /// Owner of the storage trie.
        owner: Address,
        /// Root that was requested.
        expected: B256,
        /// Root the state holds.
        found: B256,
    },
}
