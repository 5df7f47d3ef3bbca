//! Splitting transaction tips with addresses named in contract logs.
//!
//! A contract listed in [`FeeDistributionConfig`] declares rules keyed by event topic. After a
//! successful contract call, every log of the transaction is matched against the rules of the
//! contract that emitted it, whichever contract the transaction called. A share of the tip the fee
//! recipient just earned is moved to the rule's recipient. Each credit costs
//! [`GAS_PER_REWARD_CREDIT`] gas taken from the block gas pool, bounded by the gas cap of the
//! emitting contract. A transaction whose credits cannot all be paid for is rolled back as a whole.

use crate::{GasPool, StateDb};
use alloy_primitives::{Address, B256, Log, U256};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, warn};

/// Gas charged to the block gas pool for every credit.
pub const GAS_PER_REWARD_CREDIT: u64 = 5_000;

/// Denominator of [`DistributionRule::share_bps`].
pub const BPS_DENOMINATOR: u64 = 10_000;

/// Who receives the share of a matching log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Recipient {
    /// A fixed address.
    Fixed(Address),
    /// The address stored in the log topic at this index.
    Topic(usize),
}

impl Recipient {
    fn resolve(&self, log: &Log) -> Option<Address> {
        match self {
            Self::Fixed(address) => Some(*address),
            Self::Topic(index) => log.topics().get(*index).map(|topic| Address::from_word(*topic)),
        }
    }
}

/// A share of the tip paid for every log with a given first topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DistributionRule {
    /// Event signature the log must carry as its first topic.
    pub topic: B256,
    /// Receiver of the share.
    pub recipient: Recipient,
    /// Share of the tip in basis points.
    pub share_bps: u16,
}

/// Distribution settings of one contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractDistribution {
    /// Maximum gas a single distribution may use.
    pub gas_cap: u64,
    /// Rules matched against every log of the contract.
    pub rules: Vec<DistributionRule>,
}

/// Per-contract fee distribution settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FeeDistributionConfig {
    /// Settings keyed by contract address.
    pub contracts: HashMap<Address, ContractDistribution>,
}

impl FeeDistributionConfig {
    /// Adds the settings of `contract`.
    pub fn with_contract(mut self, contract: Address, distribution: ContractDistribution) -> Self {
        self.contracts.insert(contract, distribution);
        self
    }

    /// Returns the settings of `contract`.
    pub fn get(&self, contract: &Address) -> Option<&ContractDistribution> {
        self.contracts.get(contract)
    }
}

/// What a distribution did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DistributionOutcome {
    /// Every credit was applied.
    Distributed {
        /// Gas taken from the block gas pool.
        gas_used: u64,
        /// Amounts moved from the fee recipient.
        credits: Vec<(Address, U256)>,
    },
    /// A gas budget ran out. No credit was applied and no gas was charged.
    RolledBack {
        /// Gas the full distribution would have needed.
        gas_wanted: u64,
        /// The budget that ran out: a contract's gas cap or the gas left in the block.
        budget: u64,
    },
}

/// Moves shares of `tip` from `coinbase` to the recipients named by `logs`.
///
/// Every log is matched against the settings of its emitting address. The tip must already be
/// credited to `coinbase`. Shares are capped so the total never exceeds `tip`. Returns `None` if
/// no log matched a rule.
pub(crate) fn distribute(
    config: &FeeDistributionConfig,
    state: &mut StateDb,
    gas_pool: &mut GasPool,
    coinbase: Address,
    tip: U256,
    logs: &[Log],
) -> Option<DistributionOutcome> {
    let credits = logs
        .iter()
        .filter_map(|log| Some((log, config.get(&log.address)?)))
        .flat_map(|(log, contract)| {
            let topic = log.topics().first().copied();
            contract
                .rules
                .iter()
                .filter(move |rule| Some(rule.topic) == topic)
                .filter_map(move |rule| {
                    Some((log.address, contract.gas_cap, rule.recipient.resolve(log)?, rule.share_bps))
                })
        })
        .collect::<Vec<_>>();
    if credits.is_empty() {
        return None;
    }

    let gas_wanted = credits.len() as u64 * GAS_PER_REWARD_CREDIT;
    let snapshot = state.snapshot();
    let mut contract_gas = HashMap::<Address, u64>::new();
    let mut gas_used = 0u64;
    let mut remaining = tip;
    let mut applied = Vec::with_capacity(credits.len());
    for (contract, gas_cap, recipient, share_bps) in credits.iter().copied() {
        let used = contract_gas.entry(contract).or_default();
        *used += GAS_PER_REWARD_CREDIT;
        gas_used += GAS_PER_REWARD_CREDIT;
        let exhausted = if *used > gas_cap {
            Some(gas_cap)
        } else {
            (gas_used > gas_pool.gas()).then_some(gas_pool.gas())
        };
        if let Some(budget) = exhausted {
            state.revert_to(snapshot);
            warn!(target: "executor", %contract, gas_wanted, budget, "Fee distribution out of gas, rolled back");
            return Some(DistributionOutcome::RolledBack { gas_wanted, budget });
        }
        let amount = (tip * U256::from(share_bps) / U256::from(BPS_DENOMINATOR)).min(remaining);
        remaining -= amount;
        state.sub_balance(coinbase, amount);
        state.add_balance(recipient, amount);
        applied.push((recipient, amount));
    }

    if let Err(err) = gas_pool.sub_gas(gas_used) {
        state.revert_to(snapshot);
        warn!(target: "executor", %err, "Fee distribution exceeds block gas, rolled back");
        return Some(DistributionOutcome::RolledBack { gas_wanted, budget: gas_pool.gas() });
    }
    debug!(target: "executor", contracts = contract_gas.len(), credits = applied.len(), gas_used, "Distributed fees");
    Some(DistributionOutcome::Distributed { gas_used, credits: applied })
}
