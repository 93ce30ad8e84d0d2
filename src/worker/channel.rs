//! Worker-side channel back to the supervisor.
//!
//! `WorkerChannel` abstracts how a worker reaches the shared queue so the
//! same worker loop serves both deployment shapes: a real child process
//! speaking the pipe protocol, and an in-process worker task with direct
//! access to the supervisor's `QueueService`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWrite, BufReader, Stdin, Stdout};

use crate::queue::protocol::{read_message, write_message, ProtocolError, SupervisorReply, WorkerRequest};
use crate::queue::QueueService;
use crate::task::{Task, TaskResult};

/// Errors on the worker-to-supervisor channel.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// Protocol-level failure on the pipe.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The supervisor closed its end of the channel.
    #[error("channel to supervisor closed")]
    Closed,
}

/// Outcome of a dequeue attempt.
#[derive(Debug)]
pub enum Dispatch {
    /// A task to execute.
    Task(Task),
    /// Nothing available right now; back off and retry.
    Empty,
    /// The supervisor wants this worker to drain and exit.
    Stop,
}

/// How a worker asks for tasks and reports results.
#[async_trait]
pub trait WorkerChannel: Send {
    /// Requests the next task. Non-blocking by contract: the supervisor
    /// answers immediately with `Empty` when the queue has nothing.
    async fn dequeue(&mut self) -> Result<Dispatch, ChannelError>;

    /// Reports a finished task.
    async fn complete(&mut self, result: TaskResult) -> Result<(), ChannelError>;
}

/// Channel over the worker process's stdin/stdout pipes.
pub struct PipeChannel<R, W> {
    reader: R,
    writer: W,
}

impl PipeChannel<BufReader<Stdin>, Stdout> {
    /// Builds the channel a spawned worker process uses: requests go out
    /// on stdout, replies come in on stdin. Logging must use stderr.
    pub fn from_stdio() -> Self {
        Self {
            reader: BufReader::new(tokio::io::stdin()),
            writer: tokio::io::stdout(),
        }
    }
}

impl<R, W> PipeChannel<R, W>
where
    R: AsyncBufReadExt + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    /// Builds a channel over arbitrary pipe halves.
    pub fn new(reader: R, writer: W) -> Self {
        Self { reader, writer }
    }
}

#[async_trait]
impl<R, W> WorkerChannel for PipeChannel<R, W>
where
    R: AsyncBufReadExt + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    async fn dequeue(&mut self) -> Result<Dispatch, ChannelError> {
        write_message(&mut self.writer, &WorkerRequest::Dequeue).await?;
        match read_message::<_, SupervisorReply>(&mut self.reader).await? {
            None => Err(ChannelError::Closed),
            Some(SupervisorReply::Task { task }) => Ok(Dispatch::Task(task)),
            Some(SupervisorReply::Empty) => Ok(Dispatch::Empty),
            Some(SupervisorReply::Stop) => Ok(Dispatch::Stop),
        }
    }

    async fn complete(&mut self, result: TaskResult) -> Result<(), ChannelError> {
        write_message(&mut self.writer, &WorkerRequest::Complete { result }).await?;
        Ok(())
    }
}

/// Channel for in-process workers: talks to the `QueueService` directly.
pub struct LocalChannel {
    worker: String,
    service: QueueService,
    stop: Arc<AtomicBool>,
}

impl LocalChannel {
    /// Creates a channel for the named worker.
    pub fn new(worker: impl Into<String>, service: QueueService, stop: Arc<AtomicBool>) -> Self {
        Self {
            worker: worker.into(),
            service,
            stop,
        }
    }
}

#[async_trait]
impl WorkerChannel for LocalChannel {
    async fn dequeue(&mut self) -> Result<Dispatch, ChannelError> {
        if self.stop.load(Ordering::SeqCst) {
            return Ok(Dispatch::Stop);
        }
        match self.service.dispatch(&self.worker) {
            Ok(Some(task)) => Ok(Dispatch::Task(task)),
            Ok(None) => Ok(Dispatch::Empty),
            Err(_) => Ok(Dispatch::Stop),
        }
    }

    async fn complete(&mut self, result: TaskResult) -> Result<(), ChannelError> {
        self.service.complete(result);
        Ok(())
    }
}
