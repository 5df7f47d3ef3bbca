//! # meridian-primitives
//!
//! Core data types shared by every component of the meridian chain core:
//!
//! - [`SealedHeader`], [`BlockBody`] and [`SealedBlock`]: headers and blocks with a cached hash.
//! - [`Transaction`] and [`TransactionSigned`]: the transaction envelope, its signing hash and
//!   sender recovery.
//! - [`Receipt`]: execution receipts, their bloom and trie encoding.
//! - [`Account`]: the world-state account record.
//! - [`ChainSpec`] and [`Genesis`]: fork activation and the initial allocation.
//!
//! Root computations (transactions, receipts, withdrawals, ommers and state) live in [`proofs`].

#![cfg_attr(not(test), warn(unused_crate_dependencies))]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

pub use alloy_consensus::Header;
pub use alloy_eips::{BlockNumHash, eip4895::Withdrawal};
pub use alloy_primitives::{Log, LogData};

mod constants;
pub use constants::{
    BLOB_BASE_FEE_UPDATE_FRACTION, DATA_GAS_PER_BLOB, EMPTY_OMMER_ROOT_HASH, EMPTY_ROOT_HASH,
    GWEI_TO_WEI, KECCAK_EMPTY, MAX_BLOBS_PER_BLOCK, MIN_BLOB_GASPRICE, blob_gas_price,
};

mod account;
pub use account::Account;

mod block;
pub use block::{Block, BlockBody, SealedBlock, SealedHeader};

mod transaction;
pub use transaction::{BlobSidecar, Transaction, TransactionSigned, TxType};

mod receipt;
pub use receipt::{Receipt, logs_bloom};

mod spec;
pub use spec::{ChainSpec, Genesis, GenesisAccount};

pub mod proofs;

mod error;
pub use error::RecoveryError;
