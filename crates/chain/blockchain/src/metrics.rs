use std::time::Duration;

/// Container for chain manager metric names.
#[derive(Debug, Clone)]
pub(crate) struct Metrics;

impl Metrics {
    /// Gauge of the three chain heads, labeled by head.
    pub(crate) const CHAIN_HEAD: &'static str = "meridian_chain_head";
    pub(crate) const HEADER_HEAD_LABEL: &'static str = "header";
    pub(crate) const SNAP_HEAD_LABEL: &'static str = "snap";
    pub(crate) const BLOCK_HEAD_LABEL: &'static str = "block";

    pub(crate) const BLOCKS_INSERTED_TOTAL: &'static str = "meridian_chain_blocks_inserted_total";
    pub(crate) const INVALID_BLOCKS_TOTAL: &'static str = "meridian_chain_invalid_blocks_total";
    pub(crate) const REORGS_TOTAL: &'static str = "meridian_chain_reorgs_total";
    pub(crate) const REORG_DROPPED_TOTAL: &'static str = "meridian_chain_reorg_dropped_blocks_total";
    pub(crate) const REORG_ADDED_TOTAL: &'static str = "meridian_chain_reorg_added_blocks_total";
    pub(crate) const REORG_DEPTH: &'static str = "meridian_chain_reorg_depth";
    pub(crate) const VALIDATION_DURATION: &'static str =
        "meridian_chain_block_validation_duration_seconds";
    pub(crate) const INSERT_DURATION: &'static str = "meridian_chain_block_insert_duration_seconds";
    pub(crate) const STATES_PRUNED_TOTAL: &'static str = "meridian_chain_states_pruned_total";
    pub(crate) const BUFFERED_BLOCKS: &'static str = "meridian_chain_buffered_blocks";

    pub(crate) const STATUS_CANONICAL: &'static str = "canonical";
    pub(crate) const STATUS_SIDE: &'static str = "side";
    pub(crate) const STATUS_BUFFERED: &'static str = "buffered";
    pub(crate) const STATUS_KNOWN: &'static str = "known";

    /// Describes and zeroes every chain manager metric.
    pub(crate) fn init() {
        Self::describe();
        Self::zero();
    }

    fn describe() {
        metrics::describe_gauge!(
            Self::CHAIN_HEAD,
            metrics::Unit::Count,
            "Block number of the header, snap and block heads",
        );
        metrics::describe_counter!(
            Self::BLOCKS_INSERTED_TOTAL,
            metrics::Unit::Count,
            "Blocks accepted by the chain manager, labeled by status",
        );
        metrics::describe_counter!(
            Self::INVALID_BLOCKS_TOTAL,
            metrics::Unit::Count,
            "Blocks rejected as invalid",
        );
        metrics::describe_counter!(Self::REORGS_TOTAL, metrics::Unit::Count, "Chain reorganisations");
        metrics::describe_counter!(
            Self::REORG_DROPPED_TOTAL,
            metrics::Unit::Count,
            "Blocks removed from the canonical chain by reorgs",
        );
        metrics::describe_counter!(
            Self::REORG_ADDED_TOTAL,
            metrics::Unit::Count,
            "Blocks added to the canonical chain by reorgs",
        );
        metrics::describe_histogram!(
            Self::REORG_DEPTH,
            metrics::Unit::Count,
            "Number of blocks dropped by a reorg",
        );
        metrics::describe_histogram!(
            Self::VALIDATION_DURATION,
            metrics::Unit::Seconds,
            "Time spent validating the post-state of a block",
        );
        metrics::describe_histogram!(
            Self::INSERT_DURATION,
            metrics::Unit::Seconds,
            "Time spent inserting a block",
        );
        metrics::describe_counter!(
            Self::STATES_PRUNED_TOTAL,
            metrics::Unit::Count,
            "States released by the retention window",
        );
        metrics::describe_gauge!(
            Self::BUFFERED_BLOCKS,
            metrics::Unit::Count,
            "Side blocks awaiting deferred execution",
        );
    }

    fn zero() {
        for label in [Self::HEADER_HEAD_LABEL, Self::SNAP_HEAD_LABEL, Self::BLOCK_HEAD_LABEL] {
            metrics::gauge!(Self::CHAIN_HEAD, "label" => label).set(0);
        }
        for status in
            [Self::STATUS_CANONICAL, Self::STATUS_SIDE, Self::STATUS_BUFFERED, Self::STATUS_KNOWN]
        {
            metrics::counter!(Self::BLOCKS_INSERTED_TOTAL, "status" => status).increment(0);
        }
        metrics::counter!(Self::INVALID_BLOCKS_TOTAL).increment(0);
        metrics::counter!(Self::REORGS_TOTAL).increment(0);
        metrics::counter!(Self::REORG_DROPPED_TOTAL).increment(0);
        metrics::counter!(Self::REORG_ADDED_TOTAL).increment(0);
        metrics::counter!(Self::STATES_PRUNED_TOTAL).increment(0);
        metrics::gauge!(Self::BUFFERED_BLOCKS).set(0);
    }

    pub(crate) fn record_head(label: &'static str, number: u64) {
        metrics::gauge!(Self::CHAIN_HEAD, "label" => label).set(number as f64);
    }

    pub(crate) fn record_inserted(status: &'static str) {
        metrics::counter!(Self::BLOCKS_INSERTED_TOTAL, "status" => status).increment(1);
    }

    pub(crate) fn record_invalid() {
        metrics::counter!(Self::INVALID_BLOCKS_TOTAL).increment(1);
    }

    pub(crate) fn record_reorg(dropped: usize, added: usize) {
        metrics::counter!(Self::REORGS_TOTAL).increment(1);
        metrics::counter!(Self::REORG_DROPPED_TOTAL).increment(dropped as u64);
        metrics::counter!(Self::REORG_ADDED_TOTAL).increment(added as u64);
        metrics::histogram!(Self::REORG_DEPTH).record(dropped as f64);
    }

    pub(crate) fn record_validation(elapsed: Duration) {
        metrics::histogram!(Self::VALIDATION_DURATION).record(elapsed.as_secs_f64());
    }

    pub(crate) fn record_insert(elapsed: Duration) {
        metrics::histogram!(Self::INSERT_DURATION).record(elapsed.as_secs_f64());
    }

    pub(crate) fn record_pruned(count: usize) {
        metrics::counter!(Self::STATES_PRUNED_TOTAL).increment(count as u64);
    }

    pub(crate) fn record_buffered(len: usize) {
        metrics::gauge!(Self::BUFFERED_BLOCKS).set(len as f64);
    }
}
