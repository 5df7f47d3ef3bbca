//! The three chain head watermarks.

use crate::metrics::Metrics;
use meridian_primitives::SealedHeader;
use thiserror::Error;

/// An update would leave the heads out of order.
///
/// The heads must satisfy `block <= snap <= header` by number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid chain heads: expected block ({block}) <= snap ({snap}) <= header ({header})")]
pub struct InvalidHeadsError {
    /// Resulting header head number.
    pub header: u64,
    /// Resulting snap head number.
    pub snap: u64,
    /// Resulting block head number.
    pub block: u64,
}

/// The head watermarks of the chain.
///
/// 1. **Header** - the latest validated header of the canonical chain.
/// 2. **Snap** - the latest canonical block whose body and receipts are stored.
/// 3. **Block** - the latest canonical block whose state is fully computed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainHeads {
    header: SealedHeader,
    snap: SealedHeader,
    block: SealedHeader,
}

impl ChainHeads {
    /// All heads at `genesis`.
    pub fn genesis(genesis: SealedHeader) -> Self {
        Self { header: genesis.clone(), snap: genesis.clone(), block: genesis }
    }

    /// The header head.
    pub const fn header(&self) -> &SealedHeader {
        &self.header
    }

    /// The snap head.
    pub const fn snap(&self) -> &SealedHeader {
        &self.snap
    }

    /// The block head.
    pub const fn block(&self) -> &SealedHeader {
        &self.block
    }

    /// Applies `update`, keeping the current value of every head it leaves unset.
    ///
    /// # Errors
    ///
    /// Returns an error if the resulting heads would violate `block <= snap <= header`.
    pub fn apply_update(&self, update: HeadsUpdate) -> Result<Self, Box<InvalidHeadsError>> {
        let next = Self {
            header: update.header.clone().unwrap_or_else(|| self.header.clone()),
            snap: update.snap.clone().unwrap_or_else(|| self.snap.clone()),
            block: update.block.clone().unwrap_or_else(|| self.block.clone()),
        };

        let (header, snap, block) = (next.header.number(), next.snap.number(), next.block.number());
        if block > snap || snap > header {
            return Err(Box::new(InvalidHeadsError { header, snap, block }));
        }

        if let Some(head) = &update.header {
            Metrics::record_head(Metrics::HEADER_HEAD_LABEL, head.number());
        }
        if let Some(head) = &update.snap {
            Metrics::record_head(Metrics::SNAP_HEAD_LABEL, head.number());
        }
        if let Some(head) = &update.block {
            Metrics::record_head(Metrics::BLOCK_HEAD_LABEL, head.number());
        }
        Ok(next)
    }
}

/// Specifies which heads to move.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct HeadsUpdate {
    /// New header head.
    pub header: Option<SealedHeader>,
    /// New snap head.
    pub snap: Option<SealedHeader>,
    /// New block head.
    pub block: Option<SealedHeader>,
}

impl HeadsUpdate {
    /// Moves every head to `head`.
    pub fn all(head: SealedHeader) -> Self {
        Self { header: Some(head.clone()), snap: Some(head.clone()), block: Some(head) }
    }
}
