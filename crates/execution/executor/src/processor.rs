//! Block execution.

use crate::{
    BlockEnv, CallInputs, CallOutcome, CallStatus, DistributionOutcome, Evm, ExecutionError,
    FeeDistributionConfig, GasPool, InvalidTransaction, StateDb,
    fee_distribution::distribute,
    gas::{CREATE_DATA_GAS, MAX_INIT_CODE_SIZE, capped_refund, intrinsic_gas},
    metrics::Metrics,
};
use alloy_primitives::{Address, Log, TxKind, U256};
use meridian_consensus::Consensus;
use meridian_prefetch::{PrefetchKey, TrieId};
use meridian_primitives::{
    ChainSpec, DATA_GAS_PER_BLOB, KECCAK_EMPTY, MAX_BLOBS_PER_BLOCK, MIN_BLOB_GASPRICE, Receipt,
    SealedBlock, TransactionSigned, TxType,
};
use rayon::prelude::*;
use std::{sync::Arc, time::Instant};
use tracing::{debug, trace};

/// The result of executing every transaction of a block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionOutcome {
    /// One receipt per transaction.
    pub receipts: Vec<Receipt>,
    /// Gas used by the block, fee distributions included.
    pub gas_used: u64,
    /// Blob gas used by the block.
    pub blob_gas_used: u64,
    /// Fee distributions that ran, keyed by transaction index.
    pub distributions: Vec<(usize, DistributionOutcome)>,
}

struct TransactionOutcome {
    success: bool,
    gas_used: u64,
    distribution: Option<DistributionOutcome>,
}

/// Applies the transactions of a block on top of its parent state.
#[derive(Debug, Clone)]
pub struct StateProcessor {
    spec: Arc<ChainSpec>,
    evm: Arc<dyn Evm>,
    consensus: Arc<dyn Consensus>,
    distribution: Option<Arc<FeeDistributionConfig>>,
}

impl StateProcessor {
    /// Creates a processor running code with `evm` and rewards with `consensus`.
    pub fn new(spec: Arc<ChainSpec>, evm: Arc<dyn Evm>, consensus: Arc<dyn Consensus>) -> Self {
        Self { spec, evm, consensus, distribution: None }
    }

    /// Enables fee distribution.
    pub fn with_fee_distribution(mut self, config: Arc<FeeDistributionConfig>) -> Self {
        self.distribution = (!config.contracts.is_empty()).then_some(config);
        self
    }

    /// The chain spec.
    pub fn spec(&self) -> &ChainSpec {
        &self.spec
    }

    /// Executes `block` against `state`.
    ///
    /// Any invalid transaction rejects the whole block. On success `state` holds the
    /// post-state, ready to be committed.
    pub fn apply_block(
        &self,
        block: &SealedBlock,
        state: &mut StateDb,
    ) -> Result<ExecutionOutcome, ExecutionError> {
        let started = Instant::now();
        let header = block.header.header();
        let transactions = &block.body.transactions;

        let senders = transactions
            .par_iter()
            .map(TransactionSigned::recover_signer)
            .collect::<Vec<_>>()
            .into_iter()
            .enumerate()
            .map(|(index, sender)| {
                sender.map_err(|err| ExecutionError::InvalidTransaction {
                    index,
                    hash: transactions[index].hash(),
                    kind: err.into(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        self.prefetch_accounts(block, &senders, state);

        let env = BlockEnv::new(&self.spec, header);
        let mut gas_pool = GasPool::new(header.gas_limit);
        let mut outcome = ExecutionOutcome {
            receipts: Vec::with_capacity(transactions.len()),
            ..Default::default()
        };
        for (index, (tx, sender)) in transactions.iter().zip(senders).enumerate() {
            let result = self
                .apply_transaction(&env, state, &mut gas_pool, tx, sender, outcome.blob_gas_used)
                .map_err(|kind| ExecutionError::InvalidTransaction { index, hash: tx.hash(), kind })?;
            Metrics::record_transaction(result.success);

            outcome.gas_used += result.gas_used;
            outcome.blob_gas_used += tx.transaction.blob_gas();
            if let Some(distribution) = result.distribution {
                Metrics::record_distribution(&distribution);
                if let DistributionOutcome::Distributed { gas_used, .. } = &distribution {
                    outcome.gas_used += gas_used;
                }
                outcome.distributions.push((index, distribution));
            }
            let logs = state.finalise();
            outcome.receipts.push(Receipt {
                tx_type: tx.transaction.tx_type,
                success: result.success,
                cumulative_gas_used: outcome.gas_used,
                logs,
            });
        }

        let increments =
            self.consensus.finalize(header, &block.body.ommers, block.body.withdrawals.as_deref());
        for (address, amount) in increments {
            state.add_balance(address, amount);
        }
        state.finalise();

        let elapsed = started.elapsed();
        Metrics::record_block(outcome.gas_used, elapsed);
        debug!(
            target: "executor",
            block_number = block.number(),
            txs = transactions.len(),
            gas_used = outcome.gas_used,
            ?elapsed,
            "Executed block"
        );
        Ok(outcome)
    }

    fn prefetch_accounts(&self, block: &SealedBlock, senders: &[Address], state: &StateDb) {
        let Some(prefetcher) = state.prefetcher() else { return };
        let recipients = block.body.transactions.iter().filter_map(|tx| tx.transaction.to.to().copied());
        let withdrawals = block.body.withdrawals.iter().flatten().map(|w| w.address);
        let keys = senders
            .iter()
            .copied()
            .chain(recipients)
            .chain(withdrawals)
            .chain(std::iter::once(block.header.beneficiary))
            .map(PrefetchKey::Account);
        if let Err(err) = prefetcher.schedule(TrieId::account(state.parent_root()), keys) {
            trace!(target: "executor", %err, "Skipped account prefetch");
        }
    }

    fn apply_transaction(
        &self,
        env: &BlockEnv,
        state: &mut StateDb,
        gas_pool: &mut GasPool,
        signed: &TransactionSigned,
        sender: Address,
        blob_gas_used: u64,
    ) -> Result<TransactionOutcome, InvalidTransaction> {
        let tx = &signed.transaction;
        let london = env.base_fee.is_some();
        let shanghai = self.spec.is_shanghai(env.timestamp);

        match tx.tx_type {
            TxType::DynamicFee if !london => return Err(InvalidTransaction::UnsupportedType(tx.tx_type)),
            TxType::Blob if env.blob_gas_price.is_none() => {
                return Err(InvalidTransaction::UnsupportedType(tx.tx_type));
            }
            _ => {}
        }
        if tx.chain_id != env.chain_id {
            return Err(InvalidTransaction::InvalidChainId { expected: env.chain_id, got: tx.chain_id });
        }

        let nonce = state.nonce(sender);
        if tx.nonce < nonce {
            return Err(InvalidTransaction::NonceTooLow { expected: nonce, got: tx.nonce });
        }
        if tx.nonce > nonce {
            return Err(InvalidTransaction::NonceTooHigh { expected: nonce, got: tx.nonce });
        }
        if nonce == u64::MAX {
            return Err(InvalidTransaction::NonceMax);
        }
        if state.code_hash(sender) != KECCAK_EMPTY {
            return Err(InvalidTransaction::SenderNotEoa(sender));
        }

        if let Some(base_fee) = env.base_fee {
            if tx.tx_type.is_typed() && tx.max_priority_fee_per_gas > tx.max_fee_per_gas {
                return Err(InvalidTransaction::TipAboveFeeCap);
            }
            if tx.max_fee_per_gas < base_fee as u128 {
                return Err(InvalidTransaction::FeeCapTooLow { fee_cap: tx.max_fee_per_gas, base_fee });
            }
        }

        let blob_gas = tx.blob_gas();
        let blob_price = env.blob_gas_price.unwrap_or(MIN_BLOB_GASPRICE);
        if tx.tx_type == TxType::Blob {
            if tx.blob_versioned_hashes.is_empty() {
                return Err(InvalidTransaction::EmptyBlobs);
            }
            if tx.is_create() {
                return Err(InvalidTransaction::BlobCreate);
            }
            if tx.max_fee_per_blob_gas < blob_price {
                return Err(InvalidTransaction::BlobFeeCapTooLow {
                    fee_cap: tx.max_fee_per_blob_gas,
                    price: blob_price,
                });
            }
            let available = MAX_BLOBS_PER_BLOCK * DATA_GAS_PER_BLOB - blob_gas_used;
            if blob_gas > available {
                return Err(InvalidTransaction::BlobGasLimitExceeded { available, wanted: blob_gas });
            }
        }

        let gas_limit = U256::from(tx.gas_limit);
        let balance = state.balance(sender);
        let max_cost = gas_limit
            .checked_mul(U256::from(tx.max_fee_per_gas))
            .and_then(|cost| cost.checked_add(tx.value))
            .and_then(|cost| {
                cost.checked_add(U256::from(blob_gas).checked_mul(U256::from(tx.max_fee_per_blob_gas))?)
            })
            .ok_or(InvalidTransaction::InsufficientFunds { have: balance, want: U256::MAX })?;
        if balance < max_cost {
            return Err(InvalidTransaction::InsufficientFunds { have: balance, want: max_cost });
        }
        gas_pool.sub_gas(tx.gas_limit)?;

        let gas_price = tx.effective_gas_price(env.base_fee);
        let upfront = gas_limit * U256::from(gas_price) + U256::from(blob_gas) * U256::from(blob_price);
        state.sub_balance(sender, upfront);

        let intrinsic = intrinsic_gas(&tx.input, tx.is_create(), shanghai);
        if tx.gas_limit < intrinsic {
            return Err(InvalidTransaction::IntrinsicGasTooLow { have: tx.gas_limit, want: intrinsic });
        }
        if shanghai && tx.is_create() && tx.input.len() > MAX_INIT_CODE_SIZE {
            return Err(InvalidTransaction::MaxInitCodeSizeExceeded {
                size: tx.input.len(),
                max: MAX_INIT_CODE_SIZE,
            });
        }

        state.set_nonce(sender, nonce + 1);
        let execution = self.execute(env, state, sender, nonce, signed, tx.gas_limit - intrinsic);

        let mut gas_used = tx.gas_limit - execution.gas_remaining;
        gas_used -= capped_refund(gas_used, state.refund(), london);
        let leftover = tx.gas_limit - gas_used;
        state.add_balance(sender, U256::from(leftover) * U256::from(gas_price));
        gas_pool.add_gas(leftover);

        let tip = U256::from(tx.effective_tip_per_gas(env.base_fee).unwrap_or_default()) *
            U256::from(gas_used);
        state.add_balance(env.coinbase, tip);

        let success = execution.is_success();
        // Logs are matched by their emitting contract, not the called one.
        let distribution = match &self.distribution {
            Some(config) if success && !tx.is_create() => {
                let logs: Vec<Log> = state.logs().to_vec();
                distribute(config, state, gas_pool, env.coinbase, tip, &logs)
            }
            _ => None,
        };
        trace!(target: "executor", hash = %signed.hash(), %sender, gas_used, success, "Applied transaction");
        Ok(TransactionOutcome { success, gas_used, distribution })
    }

    /// Moves the value and runs the code of a transaction. Changes of a failed run are reverted.
    fn execute(
        &self,
        env: &BlockEnv,
        state: &mut StateDb,
        sender: Address,
        nonce: u64,
        signed: &TransactionSigned,
        gas: u64,
    ) -> CallOutcome {
        let tx = &signed.transaction;
        let snapshot = state.snapshot();
        let target = match tx.to {
            TxKind::Call(to) => to,
            TxKind::Create => sender.create(nonce),
        };
        if tx.is_create() {
            if state.nonce(target) != 0 || state.code_hash(target) != KECCAK_EMPTY {
                return CallOutcome::halt("contract address collision");
            }
            state.create_account(target);
            state.set_nonce(target, 1);
        }
        if !state.transfer(sender, target, tx.value) {
            state.revert_to(snapshot);
            return CallOutcome::halt("insufficient balance for transfer");
        }

        let inputs = CallInputs { caller: sender, target, input: tx.input.clone(), gas_limit: gas, value: tx.value };
        let mut outcome = if tx.is_create() {
            self.evm.create(state, env, &inputs)
        } else {
            self.evm.call(state, env, &inputs)
        };

        if tx.is_create() && outcome.is_success() {
            let deposit = CREATE_DATA_GAS * outcome.output.len() as u64;
            if outcome.gas_remaining < deposit {
                outcome = CallOutcome::halt("code store out of gas");
            } else {
                outcome.gas_remaining -= deposit;
                state.set_code(target, outcome.output.clone());
            }
        }
        match &outcome.status {
            CallStatus::Success => {}
            CallStatus::Revert => state.revert_to(snapshot),
            CallStatus::Halt(reason) => {
                trace!(target: "executor", %reason, "Execution halted");
                state.revert_to(snapshot);
                outcome.gas_remaining = 0;
            }
        }
        outcome
    }
}
