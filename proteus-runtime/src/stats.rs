//! Per-model inference statistics
//!
//! Counters are cumulative from model load. Timestamps are monotonic
//! nanoseconds from the process epoch (see `proteus::time`); only the
//! durations derived from them are recorded.

use std::sync::atomic::{AtomicU64, Ordering};

/// Aggregates statistics across all instances of one model.
#[derive(Debug, Default)]
pub struct StatsAggregator {
    success_count: AtomicU64,
    failure_count: AtomicU64,
    /// Total inferences: the sum of request batch sizes (a batch-3
    /// request counts as 3).
    inference_count: AtomicU64,
    /// Number of backend executions (batches dispatched).
    execution_count: AtomicU64,
    queue_duration_ns: AtomicU64,
    compute_duration_ns: AtomicU64,
    exec_duration_ns: AtomicU64,
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub success_count: u64,
    pub failure_count: u64,
    pub inference_count: u64,
    pub execution_count: u64,
    pub queue_duration_ns: u64,
    pub compute_duration_ns: u64,
    pub exec_duration_ns: u64,
}

impl StatsAggregator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one request's outcome.
    ///
    /// `batch_size` of zero (non-batching models) counts as one
    /// inference. Durations are computed from the caller's monotonic
    /// timestamps; a failure records only the failure itself.
    pub fn update_inference(
        &self,
        success: bool,
        batch_size: u32,
        queue_start_ns: u64,
        exec_start_ns: u64,
        compute_start_ns: u64,
        compute_end_ns: u64,
        exec_end_ns: u64,
    ) {
        if !success {
            self.failure_count.fetch_add(1, Ordering::Relaxed);
            return;
        }
        self.success_count.fetch_add(1, Ordering::Relaxed);
        self.inference_count
            .fetch_add(u64::from(batch_size.max(1)), Ordering::Relaxed);
        if queue_start_ns != 0 && exec_start_ns >= queue_start_ns {
            self.queue_duration_ns
                .fetch_add(exec_start_ns - queue_start_ns, Ordering::Relaxed);
        }
        self.compute_duration_ns
            .fetch_add(compute_end_ns.saturating_sub(compute_start_ns), Ordering::Relaxed);
        self.exec_duration_ns
            .fetch_add(exec_end_ns.saturating_sub(exec_start_ns), Ordering::Relaxed);
    }

    /// Record one backend execution of a whole batch.
    pub fn update_batch(
        &self,
        batch_size: u64,
        exec_start_ns: u64,
        compute_start_ns: u64,
        compute_end_ns: u64,
        exec_end_ns: u64,
    ) {
        let _ = batch_size;
        self.execution_count.fetch_add(1, Ordering::Relaxed);
        self.compute_duration_ns
            .fetch_add(compute_end_ns.saturating_sub(compute_start_ns), Ordering::Relaxed);
        self.exec_duration_ns
            .fetch_add(exec_end_ns.saturating_sub(exec_start_ns), Ordering::Relaxed);
    }

    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            success_count: self.success_count.load(Ordering::Relaxed),
            failure_count: self.failure_count.load(Ordering::Relaxed),
            inference_count: self.inference_count.load(Ordering::Relaxed),
            execution_count: self.execution_count.load(Ordering::Relaxed),
            queue_duration_ns: self.queue_duration_ns.load(Ordering::Relaxed),
            compute_duration_ns: self.compute_duration_ns.load(Ordering::Relaxed),
            exec_duration_ns: self.exec_duration_ns.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_accumulates_counts_and_durations() {
        let stats = StatsAggregator::new();
        stats.update_inference(true, 3, 100, 200, 250, 450, 500);
        stats.update_inference(true, 0, 0, 200, 250, 350, 400);

        let s = stats.snapshot();
        assert_eq!(s.success_count, 2);
        assert_eq!(s.failure_count, 0);
        // batch 3 + batch 0-counted-as-1
        assert_eq!(s.inference_count, 4);
        assert_eq!(s.queue_duration_ns, 100);
        assert_eq!(s.compute_duration_ns, 200 + 100);
        assert_eq!(s.exec_duration_ns, 300 + 200);
    }

    #[test]
    fn failure_records_only_the_failure() {
        let stats = StatsAggregator::new();
        stats.update_inference(false, 4, 100, 200, 250, 450, 500);
        let s = stats.snapshot();
        assert_eq!(s.failure_count, 1);
        assert_eq!(s.success_count, 0);
        assert_eq!(s.inference_count, 0);
        assert_eq!(s.compute_duration_ns, 0);
    }

    #[test]
    fn batch_updates_execution_count() {
        let stats = StatsAggregator::new();
        stats.update_batch(4, 10, 20, 70, 90);
        stats.update_batch(2, 100, 110, 130, 150);
        let s = stats.snapshot();
        assert_eq!(s.execution_count, 2);
        assert_eq!(s.compute_duration_ns, 50 + 20);
        assert_eq!(s.exec_duration_ns, 80 + 50);
    }
}
