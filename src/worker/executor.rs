//! Bounded-concurrency task executor.
//!
//! The executor owns the set of in-flight handler futures inside one
//! worker. Dispatch returns immediately; completions are harvested from a
//! `JoinSet` as they finish, so pruning is O(1) per completion instead of
//! a linear scan over an active list. Handler errors, panics and timeouts
//! are all converted into task results at the task boundary and never
//! escape to the worker loop.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, error};

use crate::handler::TaskHandler;
use crate::task::{Task, TaskResult};

/// Concurrent executor for one worker.
pub struct TaskExecutor {
    worker: String,
    handler: Arc<dyn TaskHandler>,
    concurrency_limit: usize,
    task_timeout: Duration,
    in_flight: JoinSet<TaskResult>,
}

impl TaskExecutor {
    /// Creates an executor for the named worker.
    pub fn new(
        worker: impl Into<String>,
        handler: Arc<dyn TaskHandler>,
        concurrency_limit: usize,
        task_timeout: Duration,
    ) -> Self {
        Self {
            worker: worker.into(),
            handler,
            concurrency_limit,
            task_timeout,
            in_flight: JoinSet::new(),
        }
    }

    /// Number of tasks currently executing.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Whether another task may be dispatched right now.
    pub fn has_capacity(&self) -> bool {
        self.in_flight.len() < self.concurrency_limit
    }

    /// Begins executing a task without waiting for it to finish.
    pub fn dispatch(&mut self, task: Task) {
        let worker = self.worker.clone();
        let handler = Arc::clone(&self.handler);
        let task_timeout = self.task_timeout;

        debug!(worker = %worker, task_id = %task.id, "dispatching task");

        self.in_flight.spawn(async move {
            let start = Instant::now();

            // The handler runs in its own spawned task so a panic unwinds
            // into a JoinError here instead of tearing down the worker.
            let mut handle = tokio::spawn({
                let handler = Arc::clone(&handler);
                let task = task.clone();
                async move { handler.execute(&task).await }
            });

            let outcome = tokio::time::timeout(task_timeout, &mut handle).await;
            let duration_ms = start.elapsed().as_millis() as u64;

            match outcome {
                Err(_) => {
                    handle.abort();
                    TaskResult::timeout(&task, worker, duration_ms)
                }
                Ok(Err(join_error)) => {
                    let reason = if join_error.is_panic() {
                        format!("task handler panicked: {}", join_error)
                    } else {
                        format!("task handler was cancelled: {}", join_error)
                    };
                    TaskResult::failure(&task, worker, reason, duration_ms)
                }
                Ok(Ok(Ok(output))) => TaskResult::success(&task, worker, output, duration_ms),
                Ok(Ok(Err(error))) => {
                    TaskResult::failure(&task, worker, error.to_string(), duration_ms)
                }
            }
        });
    }

    /// Harvests one completed task without waiting, if any has finished.
    pub fn try_next_completion(&mut self) -> Option<TaskResult> {
        loop {
            match self.in_flight.try_join_next() {
                None => return None,
                Some(Ok(result)) => return Some(result),
                Some(Err(join_error)) => {
                    // The wrapper future itself never panics; log and move on.
                    error!(worker = %self.worker, error = %join_error, "executor task aborted");
                }
            }
        }
    }

    /// Waits for the next completion. Returns `None` when nothing is
    /// in flight.
    pub async fn next_completion(&mut self) -> Option<TaskResult> {
        loop {
            match self.in_flight.join_next().await {
                None => return None,
                Some(Ok(result)) => return Some(result),
                Some(Err(join_error)) => {
                    error!(worker = %self.worker, error = %join_error, "executor task aborted");
                }
            }
        }
    }

    /// Drains in-flight tasks within a grace period.
    ///
    /// Results that finish in time are returned; anything still running
    /// when the grace period expires is aborted and simply not reported
    /// (the supervisor fails unreported in-flight tasks when it reaps the
    /// worker).
    pub async fn drain(mut self, grace: Duration) -> Vec<TaskResult> {
        let deadline = Instant::now() + grace;
        let mut results = Vec::new();

        while self.in_flight() > 0 {
            match tokio::time::timeout_at(deadline, self.next_completion()).await {
                Ok(Some(result)) => results.push(result),
                Ok(None) => break,
                Err(_) => {
                    debug!(
                        worker = %self.worker,
                        abandoned = self.in_flight(),
                        "grace period expired; aborting remaining tasks"
                    );
                    self.in_flight.abort_all();
                    break;
                }
            }
        }

        results
    }
}
