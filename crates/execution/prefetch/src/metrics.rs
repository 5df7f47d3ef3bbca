use crate::PrefetchReport;

/// Container for prefetcher metric names.
#[derive(Debug, Clone)]
pub(crate) struct Metrics;

impl Metrics {
    pub(crate) const PREFETCH_LOADS_TOTAL: &'static str = "meridian_prefetch_loads_total";
    pub(crate) const PREFETCH_DUPLICATES_TOTAL: &'static str = "meridian_prefetch_duplicates_total";
    pub(crate) const PREFETCH_USED_TOTAL: &'static str = "meridian_prefetch_used_total";
    pub(crate) const PREFETCH_WASTED_TOTAL: &'static str = "meridian_prefetch_wasted_total";
    pub(crate) const PREFETCH_CHILDREN_TOTAL: &'static str = "meridian_prefetch_children_total";

    /// Describes and zeroes every prefetcher metric.
    pub(crate) fn init() {
        Self::describe();
        Self::zero();
    }

    fn describe() {
        metrics::describe_counter!(
            Self::PREFETCH_LOADS_TOTAL,
            metrics::Unit::Count,
            "Keys loaded by the trie prefetcher",
        );
        metrics::describe_counter!(
            Self::PREFETCH_DUPLICATES_TOTAL,
            metrics::Unit::Count,
            "Keys scheduled more than once for the same trie",
        );
        metrics::describe_counter!(
            Self::PREFETCH_USED_TOTAL,
            metrics::Unit::Count,
            "Prefetched keys later read by execution",
        );
        metrics::describe_counter!(
            Self::PREFETCH_WASTED_TOTAL,
            metrics::Unit::Count,
            "Prefetched keys never read by execution",
        );
        metrics::describe_counter!(
            Self::PREFETCH_CHILDREN_TOTAL,
            metrics::Unit::Count,
            "Child workers spawned to load large batches",
        );
    }

    fn zero() {
        metrics::counter!(Self::PREFETCH_LOADS_TOTAL).increment(0);
        metrics::counter!(Self::PREFETCH_DUPLICATES_TOTAL).increment(0);
        metrics::counter!(Self::PREFETCH_USED_TOTAL).increment(0);
        metrics::counter!(Self::PREFETCH_WASTED_TOTAL).increment(0);
        metrics::counter!(Self::PREFETCH_CHILDREN_TOTAL).increment(0);
    }

    pub(crate) fn record_children(count: usize) {
        metrics::counter!(Self::PREFETCH_CHILDREN_TOTAL).increment(count as u64);
    }

    pub(crate) fn record_report(namespace: &'static str, report: &PrefetchReport) {
        metrics::counter!(Self::PREFETCH_LOADS_TOTAL, "namespace" => namespace)
            .increment(report.loaded);
        metrics::counter!(Self::PREFETCH_DUPLICATES_TOTAL, "namespace" => namespace)
            .increment(report.duplicates);
        metrics::counter!(Self::PREFETCH_USED_TOTAL, "namespace" => namespace)
            .increment(report.used);
        metrics::counter!(Self::PREFETCH_WASTED_TOTAL, "namespace" => namespace)
            .increment(report.wasted);
    }
}
