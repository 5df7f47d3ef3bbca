//! # meridian-blockchain
//!
//! Maintains the canonical chain on top of a [`ChainWriter`](meridian_storage::ChainWriter) and a
//! [`StateStore`](meridian_storage::StateStore).
//!
//! [`BlockChain`] is the entry point. It verifies and executes inserted blocks, picks the heaviest
//! branch by total difficulty, reorganises the canonical mapping and publishes the resulting
//! events. Supporting components:
//!
//! - [`HeaderChain`]: header index and total difficulty ledger.
//! - [`BlockValidator`]: body and post-state checks.
//! - [`StateRetention`]: releases states that fall behind the retention window.
//! - [`BlockBuffer`]: side blocks whose execution is deferred until their branch wins.
//! - [`ChainNotifications`]: broadcast streams of head, side, reorg and log events.

#![cfg_attr(not(test), warn(unused_crate_dependencies))]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

mod config;
pub use config::{
    BlockchainConfig, CacheConfig, DEFAULT_FREEZER_THRESHOLD, DEFAULT_STATE_HISTORY, StateScheme,
};

mod bad_hashes;
pub use bad_hashes::BadHashes;

mod error;
pub use error::{BlockchainError, InsertChainError, ValidationError};

mod heads;
pub use heads::{ChainHeads, HeadsUpdate, InvalidHeadsError};

mod header_chain;
pub use header_chain::HeaderChain;

mod validator;
pub use validator::BlockValidator;

mod genesis;
pub use genesis::{genesis_block, genesis_state};

mod buffer;
pub use buffer::{BlockBuffer, StateAnchor};

mod retention;
pub use retention::StateRetention;

mod forkchoice;
pub use forkchoice::ForkChoice;

mod verifier;
#[cfg(test)]
pub use verifier::MockAncestorVerifier;
pub use verifier::AncestorVerifier;

mod notifications;
pub use notifications::{
    ChainEvent, ChainHeadEvent, ChainLog, ChainNotifications, ChainReorgEvent, ChainSideEvent,
    NOTIFICATION_CAPACITY, block_logs, reorg_logs,
};

mod report;
pub use report::{BadBlock, BadBlockReport, BadBlocks, MAX_BAD_BLOCKS};

mod chain;
pub use chain::{BlockChain, WriteStatus};

mod metrics;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

/// Describes and zeroes the chain manager metrics. Call once at startup.
pub fn init_metrics() {
    metrics::Metrics::init();
}
