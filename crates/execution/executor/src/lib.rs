//! # meridian-executor
//!
//! The state transition engine. [`StateProcessor::apply_block`] runs the transactions of a block
//! on a [`StateDb`] opened at the parent state root, producing receipts and the post-state.
//! Bytecode is interpreted by an injected [`Evm`].

#![cfg_attr(not(test), warn(unused_crate_dependencies))]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

mod error;
pub use error::{ExecutionError, InvalidTransaction};

mod gas;
pub use gas::{
    CREATE_DATA_GAS, GasPool, MAX_INIT_CODE_SIZE, TX_GAS, TX_GAS_CONTRACT_CREATION, capped_refund,
    intrinsic_gas,
};

mod state;
pub use state::StateDb;

mod evm;
pub use evm::{BlockEnv, CallInputs, CallOutcome, CallStatus, Evm};

mod fee_distribution;
pub use fee_distribution::{
    BPS_DENOMINATOR, ContractDistribution, DistributionOutcome, DistributionRule,
    FeeDistributionConfig, GAS_PER_REWARD_CREDIT, Recipient,
};

mod processor;
pub use processor::{ExecutionOutcome, StateProcessor};

mod metrics;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

/// Describes and zeroes the executor metrics. Call once at startup.
pub fn init_metrics() {
    metrics::Metrics::init();
}
