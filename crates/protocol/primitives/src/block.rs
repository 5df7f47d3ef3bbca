use crate::{Header, TransactionSigned, Withdrawal};
use alloy_eips::BlockNumHash;
use alloy_primitives::{B256, BlockNumber};
use serde::{Deserialize, Serialize};

/// A header with its hash computed once.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SealedHeader {
    header: Header,
    hash: B256,
}

impl SealedHeader {
    /// Hashes the header and seals it.
    pub fn seal_slow(header: Header) -> Self {
        let hash = header.hash_slow();
        Self { header, hash }
    }

    /// Creates a sealed header from a precomputed hash. The caller guarantees the hash matches.
    pub const fn new_unchecked(header: Header, hash: B256) -> Self {
        Self { header, hash }
    }

    /// Returns the header hash.
    pub const fn hash(&self) -> B256 {
        self.hash
    }

    /// Returns the header.
    pub const fn header(&self) -> &Header {
        &self.header
    }

    /// Returns the block number.
    pub const fn number(&self) -> BlockNumber {
        self.header.number
    }

    /// Returns the parent hash.
    pub const fn parent_hash(&self) -> B256 {
        self.header.parent_hash
    }

    /// Returns the number and hash pair.
    pub const fn num_hash(&self) -> BlockNumHash {
        BlockNumHash { number: self.header.number, hash: self.hash }
    }

    /// Returns the parent's number and hash pair. Genesis reports itself.
    pub fn parent_num_hash(&self) -> BlockNumHash {
        BlockNumHash {
            number: self.header.number.saturating_sub(1),
            hash: self.header.parent_hash,
        }
    }

    /// Unseals the header.
    pub fn into_header(self) -> Header {
        self.header
    }
}

impl core::ops::Deref for SealedHeader {
    type Target = Header;

    fn deref(&self) -> &Self::Target {
        &self.header
    }
}

/// The transactions, uncles and withdrawals of a block.
#[derive(Debug, Default, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockBody {
    /// Ordered transactions.
    pub transactions: Vec<TransactionSigned>,
    /// Uncle headers.
    pub ommers: Vec<Header>,
    /// Withdrawals, present from Shanghai on.
    pub withdrawals: Option<Vec<Withdrawal>>,
}

impl BlockBody {
    /// Returns true if the body carries nothing.
    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty() &&
            self.ommers.is_empty() &&
            self.withdrawals.as_ref().is_none_or(|w| w.is_empty())
    }

    /// Total blob gas referenced by the body's transactions.
    pub fn blob_gas_used(&self) -> u64 {
        self.transactions.iter().map(|tx| tx.transaction.blob_gas()).sum()
    }
}

/// An unsealed block.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    /// Block header.
    pub header: Header,
    /// Block body.
    pub body: BlockBody,
}

impl Block {
    /// Hashes the header and seals the block.
    pub fn seal_slow(self) -> SealedBlock {
        SealedBlock { header: SealedHeader::seal_slow(self.header), body: self.body }
    }
}

/// A block with its header hash computed once.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SealedBlock {
    /// Sealed header.
    pub header: SealedHeader,
    /// Block body.
    pub body: BlockBody,
}

impl SealedBlock {
    /// Creates a block from a sealed header and a body.
    pub const fn new(header: SealedHeader, body: BlockBody) -> Self {
        Self { header, body }
    }

    /// Returns the block hash.
    pub const fn hash(&self) -> B256 {
        self.header.hash()
    }

    /// Returns the block number.
    pub const fn number(&self) -> BlockNumber {
        self.header.number()
    }

    /// Returns the parent hash.
    pub const fn parent_hash(&self) -> B256 {
        self.header.parent_hash()
    }

    /// Returns the number and hash pair.
    pub const fn num_hash(&self) -> BlockNumHash {
        self.header.num_hash()
    }

    /// Splits into header and body.
    pub fn split(self) -> (SealedHeader, BlockBody) {
        (self.header, self.body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seal_matches_hash_slow() {
        let header = Header { number: 3, gas_limit: 30_000_000, ..Default::default() };
        let block = Block { header: header.clone(), body: BlockBody::default() }.seal_slow();
        assert_eq!(block.hash(), header.hash_slow());
        assert_eq!(block.num_hash(), BlockNumHash { number: 3, hash: header.hash_slow() });
        assert!(block.body.is_empty());
    }

    #[test]
    fn test_parent_num_hash() {
        let header = SealedHeader::seal_slow(Header {
            number: 10,
            parent_hash: B256::with_last_byte(9),
            ..Default::default()
        });
        assert_eq!(header.parent_num_hash(), BlockNumHash::new(9, B256::with_last_byte(9)));
    }
}
