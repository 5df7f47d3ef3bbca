//! The interface to the bytecode interpreter.

use crate::StateDb;
use alloy_primitives::{Address, B256, Bytes, U256};
use meridian_primitives::{ChainSpec, Header, blob_gas_price};

/// Block-level values visible to executing code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockEnv {
    /// Block number.
    pub number: u64,
    /// Block timestamp.
    pub timestamp: u64,
    /// Fee recipient.
    pub coinbase: Address,
    /// Block gas limit.
    pub gas_limit: u64,
    /// Base fee, from London on.
    pub base_fee: Option<u64>,
    /// Block difficulty, zero after the merge.
    pub difficulty: U256,
    /// Randomness beacon value after the merge.
    pub prev_randao: B256,
    /// Price of one unit of blob gas, from Cancun on.
    pub blob_gas_price: Option<u128>,
    /// Chain id.
    pub chain_id: u64,
}

impl BlockEnv {
    /// Derives the environment of the block with `header`.
    pub fn new(spec: &ChainSpec, header: &Header) -> Self {
        Self {
            number: header.number,
            timestamp: header.timestamp,
            coinbase: header.beneficiary,
            gas_limit: header.gas_limit,
            base_fee: header.base_fee_per_gas,
            difficulty: header.difficulty,
            prev_randao: header.mix_hash,
            blob_gas_price: header.excess_blob_gas.map(blob_gas_price),
            chain_id: spec.chain_id,
        }
    }
}

/// A message call or contract creation handed to the interpreter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallInputs {
    /// Sender of the message.
    pub caller: Address,
    /// Callee, or the address of the contract being created.
    pub target: Address,
    /// Call data or init code.
    pub input: Bytes,
    /// Gas available to the code, intrinsic gas already deducted.
    pub gas_limit: u64,
    /// Value transferred, already moved by the caller of the interpreter.
    pub value: U256,
}

/// How a call ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallStatus {
    /// Execution succeeded.
    Success,
    /// Execution reverted, returning unused gas.
    Revert,
    /// Execution halted, consuming all gas.
    Halt(String),
}

/// The result of running code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallOutcome {
    /// How the call ended.
    pub status: CallStatus,
    /// Return data, or the runtime code of a created contract.
    pub output: Bytes,
    /// Gas not consumed by the code.
    pub gas_remaining: u64,
}

impl CallOutcome {
    /// A successful call.
    pub const fn success(output: Bytes, gas_remaining: u64) -> Self {
        Self { status: CallStatus::Success, output, gas_remaining }
    }

    /// A reverted call.
    pub const fn revert(output: Bytes, gas_remaining: u64) -> Self {
        Self { status: CallStatus::Revert, output, gas_remaining }
    }

    /// A halted call.
    pub fn halt(reason: impl Into<String>) -> Self {
        Self { status: CallStatus::Halt(reason.into()), output: Bytes::new(), gas_remaining: 0 }
    }

    /// Returns true if the call succeeded.
    pub const fn is_success(&self) -> bool {
        matches!(self.status, CallStatus::Success)
    }
}

/// The bytecode interpreter.
///
/// Implementations only run code: nonce handling, value transfer, gas purchase and refunds are
/// done by the [`StateProcessor`](crate::StateProcessor). State changes made by a call that does
/// not succeed are reverted by the caller.
#[auto_impl::auto_impl(&, Arc, Box)]
#[cfg_attr(test, mockall::automock)]
pub trait Evm: std::fmt::Debug + Send + Sync {
    /// Runs the code at `inputs.target`.
    fn call(&self, state: &mut StateDb, env: &BlockEnv, inputs: &CallInputs) -> CallOutcome;

    /// Runs `inputs.input` as init code. The output of a successful run is deployed.
    fn create(&self, state: &mut StateDb, env: &BlockEnv, inputs: &CallInputs) -> CallOutcome;
}
