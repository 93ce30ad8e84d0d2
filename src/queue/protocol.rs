//! Wire protocol between the supervisor and its worker processes.
//!
//! Messages are newline-delimited JSON carried over the worker's
//! stdin/stdout pipes. The protocol is strictly worker-initiated: a worker
//! sends a request on stdout and, for `Dequeue`, reads exactly one reply
//! from stdin. `Complete` carries no reply. Anything a worker wants to log
//! must therefore go to stderr.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use crate::task::{Task, TaskResult};

/// Errors that can occur while encoding or decoding protocol messages.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// I/O failure on the underlying pipe.
    #[error("pipe I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A line arrived that is not a valid protocol message.
    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Messages sent from a worker to the supervisor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerRequest {
    /// Ask for the next task. The supervisor answers with exactly one
    /// `SupervisorReply`.
    Dequeue,
    /// Report a finished task. No reply follows.
    Complete { result: TaskResult },
}

/// Replies sent from the supervisor to a worker, only ever in response to
/// a `Dequeue` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SupervisorReply {
    /// A task to execute.
    Task { task: Task },
    /// The queue had nothing for this worker right now.
    Empty,
    /// The worker should finish in-flight tasks and exit.
    Stop,
}

/// Serializes a message and writes it as one line.
pub async fn write_message<W, T>(writer: &mut W, message: &T) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let mut line = serde_json::to_string(message)?;
    line.push('\n');
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads one line and decodes it as a message.
///
/// Returns `Ok(None)` on a clean EOF, which means the peer closed its end
/// of the pipe (for the supervisor side: the worker process exited).
pub async fn read_message<R, T>(reader: &mut R) -> Result<Option<T>, ProtocolError>
where
    R: AsyncBufReadExt + Unpin,
    T: DeserializeOwned,
{
    let mut line = String::new();
    let bytes_read = reader.read_line(&mut line).await?;
    if bytes_read == 0 {
        return Ok(None);
    }
    let message = serde_json::from_str(line.trim_end())?;
    Ok(Some(message))
}
