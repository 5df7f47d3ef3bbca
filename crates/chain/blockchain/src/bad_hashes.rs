//! The process-wide set of banned block hashes.

use alloy_primitives::B256;
use parking_lot::RwLock;
use std::{collections::HashSet, sync::LazyLock};

static BAD_HASHES: LazyLock<RwLock<HashSet<B256>>> = LazyLock::new(Default::default);

/// Block hashes rejected before any other validation.
///
/// The set is shared by every chain in the process. It is loaded from configuration when a
/// [`BlockChain`](crate::BlockChain) is created and is never persisted.
#[derive(Debug, Clone, Copy)]
pub struct BadHashes;

impl BadHashes {
    /// Adds every hash of `hashes`.
    pub fn extend(hashes: impl IntoIterator<Item = B256>) {
        BAD_HASHES.write().extend(hashes);
    }

    /// Bans a single hash.
    pub fn insert(hash: B256) {
        BAD_HASHES.write().insert(hash);
    }

    /// Lifts the ban of `hash`.
    pub fn remove(hash: &B256) {
        BAD_HASHES.write().remove(hash);
    }

    /// Returns true if `hash` is banned.
    pub fn contains(hash: &B256) -> bool {
        BAD_HASHES.read().contains(hash)
    }
}
