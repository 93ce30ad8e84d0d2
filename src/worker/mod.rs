//! Worker role: the loop a worker process (or in-process worker task)
//! runs for its whole life.
//!
//! One logical control flow with three interleaved duties:
//!
//! 1. harvest completions from the executor and report them,
//! 2. poll the supervisor for work while capacity remains,
//! 3. back off briefly when the queue is empty instead of busy-spinning.
//!
//! At the concurrency limit the loop awaits a completion rather than
//! polling, which is the backpressure that protects downstream resources.
//! A `Stop` dispatch drains in-flight tasks within a bounded grace period
//! and exits; only an unrecoverable fault ends a worker any other way.

pub mod channel;
pub mod executor;

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{info, warn};

use crate::handler::TaskHandler;

pub use channel::{ChannelError, Dispatch, LocalChannel, PipeChannel, WorkerChannel};
pub use executor::TaskExecutor;

/// Errors that end a worker abnormally.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// The channel back to the supervisor failed; without it the worker
    /// can neither fetch work nor report results.
    #[error("supervisor channel failed: {0}")]
    Channel(#[from] ChannelError),
}

/// Per-worker runtime options, carried from the supervisor config.
#[derive(Debug, Clone)]
pub struct WorkerOptions {
    /// Logical worker name (e.g. `worker-3`), used in results and logs.
    pub name: String,
    /// Maximum simultaneously in-flight tasks.
    pub concurrency_limit: usize,
    /// Sleep between polls when the queue is empty.
    pub idle_backoff: Duration,
    /// Per-task execution deadline.
    pub task_timeout: Duration,
    /// Grace period for in-flight tasks after a stop.
    pub shutdown_grace: Duration,
}

/// Runs the worker loop until the supervisor says stop or the channel
/// fails. This is the single entry point for the worker role.
pub async fn run_worker<C>(
    mut channel: C,
    handler: Arc<dyn TaskHandler>,
    options: WorkerOptions,
) -> Result<(), WorkerError>
where
    C: WorkerChannel,
{
    info!(
        worker = %options.name,
        concurrency_limit = options.concurrency_limit,
        "worker started"
    );

    let mut executor = TaskExecutor::new(
        &options.name,
        handler,
        options.concurrency_limit,
        options.task_timeout,
    );
    let mut completed: u64 = 0;

    loop {
        // Report everything that finished since the last pass.
        while let Some(result) = executor.try_next_completion() {
            completed += 1;
            channel.complete(result).await?;
        }

        if !executor.has_capacity() {
            // At the limit: wait for a slot instead of dequeuing and holding.
            if let Some(result) = executor.next_completion().await {
                completed += 1;
                channel.complete(result).await?;
            }
            continue;
        }

        match channel.dequeue().await? {
            Dispatch::Task(task) => executor.dispatch(task),
            Dispatch::Empty => {
                if executor.in_flight() == 0 {
                    tokio::time::sleep(options.idle_backoff).await;
                } else {
                    // Sleep, but wake early if a task finishes meanwhile.
                    match tokio::time::timeout(options.idle_backoff, executor.next_completion())
                        .await
                    {
                        Ok(Some(result)) => {
                            completed += 1;
                            channel.complete(result).await?;
                        }
                        Ok(None) | Err(_) => {}
                    }
                }
            }
            Dispatch::Stop => {
                info!(worker = %options.name, in_flight = executor.in_flight(), "stop received");
                break;
            }
        }
    }

    // Drain in-flight work within the grace period; report what finished.
    for result in executor.drain(options.shutdown_grace).await {
        completed += 1;
        if let Err(error) = channel.complete(result).await {
            warn!(worker = %options.name, error = %error, "failed to report result during drain");
            break;
        }
    }

    info!(worker = %options.name, completed, "worker exiting");
    Ok(())
}
