//! Observability surface.
//!
//! The supervisor exposes a single pull-based snapshot; there is no push
//! or exporter layer. Counters live in shared atomics so the control loop,
//! the queue service and external callers can read them without locking.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use serde::Serialize;

/// Point-in-time snapshot returned by `Supervisor::metrics`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Metrics {
    /// Tasks waiting in the queue.
    pub pending_depth: usize,
    /// Workers currently registered (spawning or running).
    pub worker_count: usize,
    /// Tasks dispatched to workers and not yet completed.
    pub in_flight_count: usize,
    /// Total tasks accepted via `submit`.
    pub tasks_submitted: u64,
    /// Total tasks that completed successfully.
    pub tasks_succeeded: u64,
    /// Total tasks that failed, timed out, or were lost to a crash.
    pub tasks_failed: u64,
}

impl Metrics {
    /// Returns the total number of completed tasks.
    pub fn total_completed(&self) -> u64 {
        self.tasks_succeeded + self.tasks_failed
    }
}

/// Shared counters updated by the queue service and the control loop.
#[derive(Debug, Default)]
pub struct SharedCounters {
    pub(crate) worker_count: AtomicUsize,
    pub(crate) in_flight: AtomicUsize,
    pub(crate) tasks_submitted: AtomicU64,
    pub(crate) tasks_succeeded: AtomicU64,
    pub(crate) tasks_failed: AtomicU64,
}

impl SharedCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_submitted(&self) {
        self.tasks_submitted.fetch_add(1, Ordering::SeqCst);
    }

    pub fn record_dispatched(&self) {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
    }

    pub fn record_succeeded(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.tasks_succeeded.fetch_add(1, Ordering::SeqCst);
    }

    pub fn record_failed(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.tasks_failed.fetch_add(1, Ordering::SeqCst);
    }

    pub fn set_worker_count(&self, count: usize) {
        self.worker_count.store(count, Ordering::SeqCst);
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count.load(Ordering::SeqCst)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Builds a snapshot with the given queue depth.
    pub fn snapshot(&self, pending_depth: usize) -> Metrics {
        Metrics {
            pending_depth,
            worker_count: self.worker_count.load(Ordering::SeqCst),
            in_flight_count: self.in_flight.load(Ordering::SeqCst),
            tasks_submitted: self.tasks_submitted.load(Ordering::SeqCst),
            tasks_succeeded: self.tasks_succeeded.load(Ordering::SeqCst),
            tasks_failed: self.tasks_failed.load(Ordering::SeqCst),
        }
    }
}
