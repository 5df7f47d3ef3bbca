//! # meridian-consensus
//!
//! The [`Consensus`] capability and one engine per consensus family:
//!
//! - [`EthashConsensus`]: proof-of-work difficulty, uncles and rewards.
//! - [`CliqueConsensus`]: proof-of-authority sealing with a fixed signer set.
//! - [`BeaconConsensus`]: proof-of-stake rules layered over a pre-merge engine.

#![cfg_attr(not(test), warn(unused_crate_dependencies))]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

mod traits;
pub use traits::{Consensus, HeaderProvider};

mod error;
pub use error::ConsensusError;

pub mod validation;

mod ethash;
pub use ethash::{EthashConfig, EthashConsensus};

mod clique;
pub use clique::{CliqueConsensus, DIFF_IN_TURN, DIFF_NO_TURN, EXTRA_SEAL, EXTRA_VANITY};

mod beacon;
pub use beacon::BeaconConsensus;
