//! In-memory FIFO task queue.
//!
//! The queue is owned by the supervisor process; worker processes reach it
//! through the wire protocol rather than shared memory, so a
//! mutex-protected buffer is sufficient for the cross-task access inside
//! the supervisor.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use thiserror::Error;

use crate::task::Task;

/// Errors that can occur during queue operations.
#[derive(Debug, Error)]
pub enum QueueError {
    /// The queue has been closed; no further enqueues are accepted.
    #[error("queue is closed")]
    Closed,

    /// The queue lock was poisoned by a panicking holder.
    #[error("queue lock poisoned")]
    Poisoned,
}

struct QueueInner {
    items: VecDeque<Task>,
    closed: bool,
}

/// A shared FIFO queue of pending tasks.
///
/// `enqueue` never blocks (the queue is unbounded) and `dequeue` returns
/// immediately whether or not an item is present; that non-blocking
/// contract is what lets workers interleave polling with concurrent
/// execution and idle backoff.
#[derive(Clone)]
pub struct TaskQueue {
    inner: Arc<Mutex<QueueInner>>,
}

impl TaskQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(QueueInner {
                items: VecDeque::new(),
                closed: false,
            })),
        }
    }

    /// Appends a task to the back of the queue.
    pub fn enqueue(&self, task: Task) -> Result<(), QueueError> {
        let mut inner = self.inner.lock().map_err(|_| QueueError::Poisoned)?;
        if inner.closed {
            return Err(QueueError::Closed);
        }
        inner.items.push_back(task);
        Ok(())
    }

    /// Removes and returns the task at the front of the queue, if any.
    ///
    /// Returns immediately; `None` means the queue was empty at the time
    /// of the call.
    pub fn dequeue(&self) -> Result<Option<Task>, QueueError> {
        let mut inner = self.inner.lock().map_err(|_| QueueError::Poisoned)?;
        Ok(inner.items.pop_front())
    }

    /// Returns the number of pending tasks.
    pub fn len(&self) -> usize {
        self.inner.lock().map(|inner| inner.items.len()).unwrap_or(0)
    }

    /// Returns whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Closes the queue. Pending tasks can still be dequeued, but new
    /// enqueues are rejected.
    pub fn close(&self) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.closed = true;
        }
    }

    /// Returns whether the queue has been closed.
    pub fn is_closed(&self) -> bool {
        self.inner.lock().map(|inner| inner.closed).unwrap_or(true)
    }
}

impl Default for TaskQueue {
    fn default() -> Self {
        Self::new()
    }
}
