//! Executor statistics.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use serde::Serialize;

/// Executor counters.
#[derive(Debug, Default)]
pub struct ExecutorStats {
    /// Total operations queued.
    pub operations_queued: AtomicUsize,
    /// Operations that ran to completion without an error.
    pub operations_completed: AtomicUsize,
    /// Operations that ended canceled (before or while running).
    pub operations_canceled: AtomicUsize,
    /// Operations that ran and recorded an error.
    pub operations_faulted: AtomicUsize,
    /// Total execution time in microseconds.
    pub total_exec_time_us: AtomicUsize,
    /// Deepest the queue has been.
    pub peak_queue_depth: AtomicUsize,
    /// Deepest the frame stack has been.
    pub peak_frame_depth: AtomicUsize,
}

impl ExecutorStats {
    /// Record a queued operation and the resulting queue depth.
    #[inline]
    pub fn record_queued(
        &self,
        depth: usize,
    ) {
        self.operations_queued.fetch_add(1, Ordering::SeqCst);
        self.peak_queue_depth.fetch_max(depth, Ordering::SeqCst);
    }

    /// Record a completed operation.
    #[inline]
    pub fn record_completed(
        &self,
        elapsed: Duration,
    ) {
        self.operations_completed.fetch_add(1, Ordering::SeqCst);
        self.record_exec_time(elapsed);
    }

    /// Record a canceled operation.
    #[inline]
    pub fn record_canceled(&self) {
        self.operations_canceled.fetch_add(1, Ordering::SeqCst);
    }

    /// Record an operation that finished with an error.
    #[inline]
    pub fn record_faulted(
        &self,
        elapsed: Duration,
    ) {
        self.operations_faulted.fetch_add(1, Ordering::SeqCst);
        self.record_exec_time(elapsed);
    }

    /// Record the frame depth reached by a push.
    #[inline]
    pub fn record_frame_depth(
        &self,
        depth: usize,
    ) {
        self.peak_frame_depth.fetch_max(depth, Ordering::SeqCst);
    }

    fn record_exec_time(
        &self,
        elapsed: Duration,
    ) {
        let micros = usize::try_from(elapsed.as_micros()).unwrap_or(usize::MAX);
        self.total_exec_time_us.fetch_add(micros, Ordering::SeqCst);
    }

    /// Operations that have left the queue one way or another.
    pub fn finished(&self) -> usize {
        self.operations_completed.load(Ordering::SeqCst)
            + self.operations_canceled.load(Ordering::SeqCst)
            + self.operations_faulted.load(Ordering::SeqCst)
    }

    /// Plain copy of the counters.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            operations_queued: self.operations_queued.load(Ordering::SeqCst),
            operations_completed: self.operations_completed.load(Ordering::SeqCst),
            operations_canceled: self.operations_canceled.load(Ordering::SeqCst),
            operations_faulted: self.operations_faulted.load(Ordering::SeqCst),
            total_exec_time_us: self.total_exec_time_us.load(Ordering::SeqCst),
            peak_queue_depth: self.peak_queue_depth.load(Ordering::SeqCst),
            peak_frame_depth: self.peak_frame_depth.load(Ordering::SeqCst),
        }
    }
}

/// Serializable copy of [`ExecutorStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub operations_queued: usize,
    pub operations_completed: usize,
    pub operations_canceled: usize,
    pub operations_faulted: usize,
    pub total_exec_time_us: usize,
    pub peak_queue_depth: usize,
    pub peak_frame_depth: usize,
}
