use crate::DistributionOutcome;
use std::time::Duration;

/// Container for executor metric names.
#[derive(Debug, Clone)]
pub(crate) struct Metrics;

impl Metrics {
    pub(crate) const BLOCKS_EXECUTED_TOTAL: &'static str = "meridian_executor_blocks_total";
    pub(crate) const TRANSACTIONS_TOTAL: &'static str = "meridian_executor_transactions_total";
    pub(crate) const GAS_USED_TOTAL: &'static str = "meridian_executor_gas_used_total";
    pub(crate) const BLOCK_EXECUTION_DURATION: &'static str =
        "meridian_executor_block_execution_duration_seconds";
    pub(crate) const FEE_DISTRIBUTIONS_TOTAL: &'static str =
        "meridian_executor_fee_distributions_total";

    /// Describes and zeroes every executor metric.
    pub(crate) fn init() {
        Self::describe();
        Self::zero();
    }

    fn describe() {
        metrics::describe_counter!(
            Self::BLOCKS_EXECUTED_TOTAL,
            metrics::Unit::Count,
            "Blocks executed by the state processor",
        );
        metrics::describe_counter!(
            Self::TRANSACTIONS_TOTAL,
            metrics::Unit::Count,
            "Transactions executed, labeled by status",
        );
        metrics::describe_counter!(
            Self::GAS_USED_TOTAL,
            metrics::Unit::Count,
            "Gas used by executed blocks",
        );
        metrics::describe_histogram!(
            Self::BLOCK_EXECUTION_DURATION,
            metrics::Unit::Seconds,
            "Time spent executing a block",
        );
        metrics::describe_counter!(
            Self::FEE_DISTRIBUTIONS_TOTAL,
            metrics::Unit::Count,
            "Fee distributions, labeled by outcome",
        );
    }

    fn zero() {
        metrics::counter!(Self::BLOCKS_EXECUTED_TOTAL).increment(0);
        metrics::counter!(Self::GAS_USED_TOTAL).increment(0);
        for status in ["success", "failed"] {
            metrics::counter!(Self::TRANSACTIONS_TOTAL, "status" => status).increment(0);
        }
        for outcome in ["distributed", "rolled_back"] {
            metrics::counter!(Self::FEE_DISTRIBUTIONS_TOTAL, "outcome" => outcome).increment(0);
        }
    }

    pub(crate) fn record_transaction(success: bool) {
        let status = if success { "success" } else { "failed" };
        metrics::counter!(Self::TRANSACTIONS_TOTAL, "status" => status).increment(1);
    }

    pub(crate) fn record_distribution(outcome: &DistributionOutcome) {
        let label = match outcome {
            DistributionOutcome::Distributed { .. } => "distributed",
            DistributionOutcome::RolledBack { .. } => "rolled_back",
        };
        metrics::counter!(Self::FEE_DISTRIBUTIONS_TOTAL, "outcome" => label).increment(1);
    }

    pub(crate) fn record_block(gas_used: u64, elapsed: Duration) {
        metrics::counter!(Self::BLOCKS_EXECUTED_TOTAL).increment(1);
        metrics::counter!(Self::GAS_USED_TOTAL).increment(gas_used);
        metrics::histogram!(Self::BLOCK_EXECUTION_DURATION).record(elapsed.as_secs_f64());
    }
}
