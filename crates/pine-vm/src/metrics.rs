//! Counters exposed for observability, so deployments can watch cache
//! effectiveness and argument sizes without instrumenting the evaluator
//! itself.

use std::sync::atomic::{AtomicU64, Ordering};

/// Running counters for one [`crate::PineVm`] instance's cache behaviour.
#[derive(Debug, Default)]
pub struct EvalMetrics {
    cache_lookup_count: AtomicU64,
    max_observed_arg_list_size: AtomicU64,
}

impl EvalMetrics {
    pub(crate) fn record_cache_lookup(&self) {
        self.cache_lookup_count.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn observe_arg_list_size(&self, size: usize) {
        let size = size as u64;
        self.max_observed_arg_list_size.fetch_max(size, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self, cache_size: usize) -> EvalMetricsSnapshot {
        EvalMetricsSnapshot {
            cache_lookup_count: self.cache_lookup_count.load(Ordering::Relaxed),
            cache_size,
            max_observed_arg_list_size: self.max_observed_arg_list_size.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time read of [`EvalMetrics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvalMetricsSnapshot {
    /// Total number of `DecodeAndEvaluate` cache lookups performed.
    pub cache_lookup_count: u64,
    /// Current number of entries held in the function-application cache.
    pub cache_size: usize,
    /// Largest argument list length observed in a `DecodeAndEvaluate` call.
    pub max_observed_arg_list_size: u64,
}
