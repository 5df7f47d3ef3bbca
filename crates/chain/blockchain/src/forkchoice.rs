//! Fork choice between competing branches.

use alloy_primitives::U256;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::info;

/// Decides whether a branch replaces the canonical chain.
///
/// Before the merge a branch becomes canonical only if its total difficulty is strictly greater
/// than the one of the current head. Once merged, total difficulty is ignored and the chain head
/// only moves through explicit [`BlockChain::set_canonical`](crate::BlockChain::set_canonical)
/// directives.
#[derive(Debug, Default)]
pub struct ForkChoice {
    merged: AtomicBool,
}

impl ForkChoice {
    /// Creates a fork choice, already merged if `merged` is set.
    pub const fn new(merged: bool) -> Self {
        Self { merged: AtomicBool::new(merged) }
    }

    /// Returns true once fork choice is driven externally.
    pub fn is_merged(&self) -> bool {
        self.merged.load(Ordering::Acquire)
    }

    /// Hands fork choice over to the consensus layer. Irreversible.
    pub fn set_merged(&self) {
        if !self.merged.swap(true, Ordering::AcqRel) {
            info!(target: "blockchain", "Switched to external fork choice");
        }
    }

    /// Returns true if a branch with total difficulty `extern_td` replaces a head with
    /// total difficulty `local_td`.
    pub fn reorg_needed(&self, local_td: U256, extern_td: U256) -> bool {
        !self.is_merged() && extern_td > local_td
    }
}
