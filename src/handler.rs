//! The task handler seam.
//!
//! The core never interprets task payloads; a `TaskHandler` supplied by
//! the embedding application gives them meaning. Handlers run inside
//! worker processes, so anything a handler captures must be available in
//! the worker role's process (for the stock binary: the demo handler
//! registered by the CLI).

use async_trait::async_trait;

use crate::task::Task;

/// Executes tasks inside a worker.
///
/// Errors returned here become failed task results; they never terminate
/// the worker. Implementations should be cancellation-safe: the executor
/// aborts handler futures that exceed the task timeout.
#[async_trait]
pub trait TaskHandler: Send + Sync + 'static {
    /// Executes one task and returns its output value.
    async fn execute(&self, task: &Task) -> anyhow::Result<serde_json::Value>;
}
