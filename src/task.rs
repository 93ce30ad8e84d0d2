//! Core task types.
//!
//! This module defines the units of work flowing through the system:
//!
//! - `Task`: an opaque, serializable unit of work
//! - `TaskResult`: the outcome of one execution attempt
//! - `TaskStatus`: terminal status of a completed task
//! - `PollReply`: what callers see when polling for a result

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An opaque unit of work submitted to the supervisor.
///
/// The payload is never inspected by the core; only the registered
/// `TaskHandler` gives it meaning. Tasks are immutable once enqueued.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Unique identifier for this task.
    pub id: Uuid,
    /// Opaque payload interpreted by the task handler.
    pub payload: serde_json::Value,
    /// When this task was enqueued.
    pub enqueued_at: DateTime<Utc>,
    /// When a worker began executing this task, if dispatched.
    ///
    /// Stamped by the supervisor on dispatch so the result can carry the
    /// full enqueue-to-finish timeline.
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
}

impl Task {
    /// Creates a new task with a fresh id and the current timestamp.
    pub fn new(payload: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            payload,
            enqueued_at: Utc::now(),
            started_at: None,
        }
    }

    /// Returns how long the task has been waiting since enqueue.
    pub fn age(&self) -> chrono::Duration {
        Utc::now() - self.enqueued_at
    }
}

/// Terminal status of a completed task.
///
/// Callers observe exactly two terminal statuses; a timeout is a failure
/// whose error descriptor says so.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// The handler returned a value.
    Succeeded,
    /// The handler returned an error, panicked, or timed out.
    Failed,
}

impl TaskStatus {
    /// Returns whether this status counts as a failure from the caller's
    /// point of view.
    pub fn is_failure(&self) -> bool {
        !matches!(self, TaskStatus::Succeeded)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Succeeded => write!(f, "succeeded"),
            TaskStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Result of a single task execution attempt.
///
/// Produced exactly once per attempt. A crashed worker produces no result
/// for its in-flight tasks; the supervisor converts those to failures when
/// it reaps the worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    /// ID of the task this result belongs to.
    pub task_id: Uuid,
    /// Terminal status.
    pub status: TaskStatus,
    /// Output value when the task succeeded.
    pub output: Option<serde_json::Value>,
    /// Error descriptor when the task failed or timed out.
    pub error: Option<String>,
    /// Logical name of the worker that executed the task.
    pub worker: String,
    /// When the task was enqueued.
    pub enqueued_at: DateTime<Utc>,
    /// When execution started, if known.
    pub started_at: Option<DateTime<Utc>>,
    /// When execution finished.
    pub finished_at: DateTime<Utc>,
    /// Execution duration in milliseconds.
    pub duration_ms: u64,
}

impl TaskResult {
    /// Creates a successful result.
    pub fn success(
        task: &Task,
        worker: impl Into<String>,
        output: serde_json::Value,
        duration_ms: u64,
    ) -> Self {
        Self {
            task_id: task.id,
            status: TaskStatus::Succeeded,
            output: Some(output),
            error: None,
            worker: worker.into(),
            enqueued_at: task.enqueued_at,
            started_at: task.started_at,
            finished_at: Utc::now(),
            duration_ms,
        }
    }

    /// Creates a failed result with an error descriptor.
    pub fn failure(
        task: &Task,
        worker: impl Into<String>,
        error: impl Into<String>,
        duration_ms: u64,
    ) -> Self {
        Self {
            task_id: task.id,
            status: TaskStatus::Failed,
            output: None,
            error: Some(error.into()),
            worker: worker.into(),
            enqueued_at: task.enqueued_at,
            started_at: task.started_at,
            finished_at: Utc::now(),
            duration_ms,
        }
    }

    /// Creates the result for a task that exceeded its execution timeout.
    pub fn timeout(task: &Task, worker: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            task_id: task.id,
            status: TaskStatus::Failed,
            output: None,
            error: Some("task execution timed out".to_string()),
            worker: worker.into(),
            enqueued_at: task.enqueued_at,
            started_at: task.started_at,
            finished_at: Utc::now(),
            duration_ms,
        }
    }

    /// Returns whether the task completed successfully.
    pub fn is_success(&self) -> bool {
        self.status == TaskStatus::Succeeded
    }
}

/// Reply to a `poll_result` call.
#[derive(Debug, Clone)]
pub enum PollReply {
    /// The task is known but has not completed yet.
    Pending,
    /// The task id was never submitted or has been garbage-collected.
    NotFound,
    /// The task completed; the result is attached.
    Ready(TaskResult),
}

impl PollReply {
    /// Returns the result if the task has completed.
    pub fn into_result(self) -> Option<TaskResult> {
        match self {
            PollReply::Ready(result) => Some(result),
            _ => None,
        }
    }

    /// Returns whether the task is still pending.
    pub fn is_pending(&self) -> bool {
        matches!(self, PollReply::Pending)
    }
}
