//! Worker launchers.
//!
//! `Launcher::spawn` is the explicit process-creation seam: the
//! supervisor never forks and never branches on "which side of a fork am
//! I". `ProcessLauncher` starts a separate OS process running the
//! binary's dedicated worker entry point; `LocalLauncher` runs the same
//! worker loop on an in-process task, which tests and single-process
//! deployments use.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::BufReader;
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::handler::TaskHandler;
use crate::queue::QueueService;
use crate::worker::{run_worker, LocalChannel, WorkerOptions};

use super::connection;

/// Errors that can occur while spawning a worker.
#[derive(Debug, Error)]
pub enum SpawnError {
    /// The OS refused to create the process (resource exhaustion, missing
    /// binary, permissions).
    #[error("failed to spawn worker process: {0}")]
    Io(#[from] std::io::Error),

    /// The child was created but its stdio pipes could not be captured.
    #[error("worker stdio could not be captured")]
    StdioUnavailable,
}

/// Everything a launcher needs to wire a new worker to the supervisor.
pub struct WorkerContext {
    /// Queue facade the worker's tasks are served from.
    pub service: QueueService,
    /// Stop flag the supervisor flips to retire this worker.
    pub stop: Arc<AtomicBool>,
    /// Runtime options for the worker loop.
    pub options: WorkerOptions,
}

/// A handle to a spawned worker, used for liveness checks and last-resort
/// termination.
pub enum WorkerHandle {
    /// An OS child process plus the task serving its pipes.
    Process {
        child: Child,
        connection: JoinHandle<()>,
    },
    /// An in-process worker task.
    Local { task: JoinHandle<()> },
}

impl WorkerHandle {
    /// Wraps an in-process worker task. Custom launchers use this to
    /// plug their own execution contexts into the supervisor.
    pub fn local(task: JoinHandle<()>) -> Self {
        WorkerHandle::Local { task }
    }

    /// Non-blocking liveness check.
    ///
    /// A process worker counts as alive until its connection task has
    /// finished. The connection task ends only at pipe EOF, after every
    /// buffered `Complete` line has been decoded, so results written just
    /// before the child exited are recorded before the reaper fails that
    /// worker's remaining in-flight tasks.
    pub fn is_alive(&self) -> bool {
        match self {
            WorkerHandle::Process { connection, .. } => !connection.is_finished(),
            WorkerHandle::Local { task } => !task.is_finished(),
        }
    }

    /// OS process id, if this worker is a process.
    pub fn pid(&self) -> Option<u32> {
        match self {
            WorkerHandle::Process { child, .. } => child.id(),
            WorkerHandle::Local { .. } => None,
        }
    }

    /// Forcibly terminates the worker. Used only after the cooperative
    /// stop path has run out of grace.
    pub async fn kill(&mut self) {
        match self {
            WorkerHandle::Process { child, connection } => {
                let _ = child.kill().await;
                connection.abort();
            }
            WorkerHandle::Local { task } => task.abort(),
        }
    }
}

/// Creates workers for the supervisor.
#[async_trait]
pub trait Launcher: Send + Sync {
    /// Spawns one worker and returns its handle.
    async fn spawn(&self, context: WorkerContext) -> Result<WorkerHandle, SpawnError>;
}

/// Spawns workers as OS processes running the worker entry point.
pub struct ProcessLauncher {
    program: PathBuf,
    base_args: Vec<String>,
}

impl ProcessLauncher {
    /// Launches workers by re-invoking the current executable with the
    /// `worker` subcommand, the standard deployment shape for the stock
    /// binary.
    pub fn from_current_exe() -> Result<Self, SpawnError> {
        let program = std::env::current_exe()?;
        Ok(Self {
            program,
            base_args: vec!["worker".to_string()],
        })
    }

    /// Launches workers with a custom program and base arguments. The
    /// program must speak the pipe protocol on stdin/stdout; per-worker
    /// options are appended as flags.
    pub fn new(program: impl Into<PathBuf>, base_args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            base_args,
        }
    }
}

#[async_trait]
impl Launcher for ProcessLauncher {
    async fn spawn(&self, context: WorkerContext) -> Result<WorkerHandle, SpawnError> {
        let options = &context.options;
        let mut child = Command::new(&self.program)
            .args(&self.base_args)
            .arg("--name")
            .arg(&options.name)
            .arg("--concurrency")
            .arg(options.concurrency_limit.to_string())
            .arg("--idle-backoff-ms")
            .arg(options.idle_backoff.as_millis().to_string())
            .arg("--task-timeout-ms")
            .arg(options.task_timeout.as_millis().to_string())
            .arg("--shutdown-grace-ms")
            .arg(options.shutdown_grace.as_millis().to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()?;

        let stdin = child.stdin.take().ok_or(SpawnError::StdioUnavailable)?;
        let stdout = child.stdout.take().ok_or(SpawnError::StdioUnavailable)?;

        let name = options.name.clone();
        let service = context.service.clone();
        let stop = Arc::clone(&context.stop);
        let connection = tokio::spawn(async move {
            let reader = BufReader::new(stdout);
            if let Err(e) = connection::serve(reader, stdin, &name, service, stop).await {
                error!(worker = %name, error = %e, "worker connection ended with error");
            }
        });

        info!(
            worker = %options.name,
            pid = child.id().unwrap_or(0),
            "spawned worker process"
        );

        Ok(WorkerHandle::Process { child, connection })
    }
}

/// Runs workers as tokio tasks inside the supervisor's own process.
pub struct LocalLauncher {
    handler: Arc<dyn TaskHandler>,
}

impl LocalLauncher {
    /// Creates a launcher that hands every worker the given handler.
    pub fn new(handler: Arc<dyn TaskHandler>) -> Self {
        Self { handler }
    }
}

#[async_trait]
impl Launcher for LocalLauncher {
    async fn spawn(&self, context: WorkerContext) -> Result<WorkerHandle, SpawnError> {
        let channel = LocalChannel::new(
            context.options.name.clone(),
            context.service.clone(),
            Arc::clone(&context.stop),
        );
        let handler = Arc::clone(&self.handler);
        let name = context.options.name.clone();

        let task_name = name.clone();
        let task = tokio::spawn(async move {
            if let Err(e) = run_worker(channel, handler, context.options).await {
                error!(worker = %task_name, error = %e, "worker exited with error");
            }
        });

        info!(worker = %name, "spawned local worker");
        Ok(WorkerHandle::Local { task })
    }
}
