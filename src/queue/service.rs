//! Supervisor-side queue facade.
//!
//! `QueueService` is the single point through which tasks are handed to
//! workers and results come back, regardless of transport (pipe connection
//! or in-process channel). It owns the result store and the per-worker
//! in-flight bookkeeping that lets the supervisor convert a crashed
//! worker's tasks into explicit failures.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use tracing::warn;
use uuid::Uuid;

use crate::metrics::{Metrics, SharedCounters};
use crate::task::{PollReply, Task, TaskResult, TaskStatus};

use super::memory::{QueueError, TaskQueue};

/// Tracking entry for a submitted task.
enum TaskEntry {
    /// Queued or dispatched; no result yet.
    Pending,
    /// Completed; the result is retained for polling.
    Done(TaskResult),
}

#[derive(Default)]
struct ServiceState {
    /// Task id -> lifecycle entry. Entries are inserted on submit and
    /// replaced on completion; callers polling unknown ids get NotFound.
    results: HashMap<Uuid, TaskEntry>,
    /// Worker name -> tasks dispatched to it and not yet completed.
    in_flight: HashMap<String, HashMap<Uuid, Task>>,
}

/// Shared dispatch/complete facade over the task queue.
#[derive(Clone)]
pub struct QueueService {
    queue: TaskQueue,
    counters: Arc<SharedCounters>,
    state: Arc<Mutex<ServiceState>>,
}

impl QueueService {
    /// Creates a service over a fresh queue.
    pub fn new(counters: Arc<SharedCounters>) -> Self {
        Self {
            queue: TaskQueue::new(),
            counters,
            state: Arc::new(Mutex::new(ServiceState::default())),
        }
    }

    /// Accepts a task: records it as pending and enqueues it.
    ///
    /// The pending entry goes in before the enqueue so a worker can never
    /// complete a task that polling does not know about; if the enqueue
    /// is rejected the entry is rolled back and the id stays unknown.
    pub fn submit(&self, task: Task) -> Result<Uuid, QueueError> {
        let id = task.id;
        {
            let mut state = self.state.lock().map_err(|_| QueueError::Poisoned)?;
            state.results.insert(id, TaskEntry::Pending);
        }
        if let Err(error) = self.queue.enqueue(task) {
            if let Ok(mut state) = self.state.lock() {
                state.results.remove(&id);
            }
            return Err(error);
        }
        self.counters.record_submitted();
        Ok(id)
    }

    /// Pops the next task for the named worker, stamping its start time
    /// and tracking it as in-flight. Returns immediately with `None` when
    /// the queue is empty.
    pub fn dispatch(&self, worker: &str) -> Result<Option<Task>, QueueError> {
        let Some(mut task) = self.queue.dequeue()? else {
            return Ok(None);
        };
        task.started_at = Some(Utc::now());

        let mut state = self.state.lock().map_err(|_| QueueError::Poisoned)?;
        state
            .in_flight
            .entry(worker.to_string())
            .or_default()
            .insert(task.id, task.clone());
        drop(state);

        self.counters.record_dispatched();
        Ok(Some(task))
    }

    /// Records a completed task's result.
    ///
    /// A result for a task that is not tracked as in-flight (a duplicate,
    /// or a worker already reaped) is dropped: the first result for a task
    /// wins, matching at-most-once delivery.
    pub fn complete(&self, result: TaskResult) {
        let Ok(mut state) = self.state.lock() else {
            return;
        };

        let tracked = state
            .in_flight
            .get_mut(&result.worker)
            .and_then(|tasks| tasks.remove(&result.task_id))
            .is_some();

        if !tracked {
            warn!(
                task_id = %result.task_id,
                worker = %result.worker,
                "dropping result for task not tracked as in-flight"
            );
            return;
        }

        if result.status == TaskStatus::Succeeded {
            self.counters.record_succeeded();
        } else {
            self.counters.record_failed();
        }
        state.results.insert(result.task_id, TaskEntry::Done(result));
    }

    /// Converts every in-flight task of a crashed worker into a failed
    /// result. Returns how many tasks were failed.
    pub fn fail_in_flight(&self, worker: &str, reason: &str) -> usize {
        let Ok(mut state) = self.state.lock() else {
            return 0;
        };

        let tasks = state.in_flight.remove(worker).unwrap_or_default();
        let failed = tasks.len();
        for (_, task) in tasks {
            let result = TaskResult::failure(&task, worker, reason, 0);
            state.results.insert(task.id, TaskEntry::Done(result));
            self.counters.record_failed();
        }
        failed
    }

    /// Looks up the result for a task id.
    pub fn poll(&self, id: Uuid) -> PollReply {
        let Ok(state) = self.state.lock() else {
            return PollReply::NotFound;
        };
        match state.results.get(&id) {
            None => PollReply::NotFound,
            Some(TaskEntry::Pending) => PollReply::Pending,
            Some(TaskEntry::Done(result)) => PollReply::Ready(result.clone()),
        }
    }

    /// Number of tasks waiting in the queue.
    pub fn pending_depth(&self) -> usize {
        self.queue.len()
    }

    /// Builds a metrics snapshot including the current queue depth.
    pub fn metrics(&self) -> Metrics {
        self.counters.snapshot(self.queue.len())
    }

    /// Closes the underlying queue; submits are rejected afterwards.
    pub fn close(&self) {
        self.queue.close();
    }
}
