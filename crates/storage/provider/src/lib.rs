//! # meridian-storage
//!
//! Storage interfaces consumed by the chain core, with in-memory implementations:
//!
//! - [`ChainReader`]/[`ChainWriter`]: headers, bodies, receipts, total difficulty, the canonical
//!   mapping and the head markers, split into a live and an ancient tier.
//! - [`StateStore`]: reference-counted world states addressed by state root.

#![cfg_attr(not(test), warn(unused_crate_dependencies))]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

mod error;
pub use error::StorageError;

mod chain;
pub use chain::{ChainReader, ChainWriter, StoreBatch, StoreOp, TxLookupEntry};

mod state;
pub use state::{AccountTrie, StateCommit, StateSnapshot, StateStore, StorageSlots, StorageTrie};

mod memory_chain;
pub use memory_chain::MemoryChainStore;

mod memory_state;
pub use memory_state::MemoryStateStore;
