//! CLI command definitions for taskforge.
//!
//! Two entry points share this binary: `run` starts a supervisor and
//! drives a synthetic workload through it, and `worker` is what spawned
//! worker processes execute. The supervisor re-invokes the current
//! executable with `worker` plus per-worker flags; the flag names here
//! and in the process launcher must stay in lockstep.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::info;
use uuid::Uuid;

use crate::handler::TaskHandler;
use crate::supervisor::Supervisor;
use crate::task::Task;
use crate::worker::{run_worker, PipeChannel, WorkerOptions};
use crate::SupervisorConfig;

/// Adaptive process supervisor with a shared task queue.
#[derive(Parser)]
#[command(name = "taskforge")]
#[command(about = "Run a self-healing pool of task worker processes")]
#[command(version)]
#[command(
    long_about = "taskforge supervises a pool of worker processes that drain a shared FIFO task queue.\n\nThe pool scales between --min-workers and --max-workers based on queue depth, and crashed workers are respawned automatically.\n\nExample usage:\n  taskforge run --min-workers 2 --max-workers 4 --tasks 100"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Start a supervisor and push a synthetic workload through it.
    Run(RunArgs),

    /// Worker entry point. Spawned by the supervisor; speaks the task
    /// protocol on stdin/stdout and must not be run by hand.
    #[command(hide = true)]
    Worker(WorkerArgs),
}

/// Arguments for `taskforge run`.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Minimum number of workers to keep alive.
    #[arg(long, default_value = "2")]
    pub min_workers: usize,

    /// Hard ceiling on the worker population.
    #[arg(long, default_value = "4")]
    pub max_workers: usize,

    /// Pending-queue depth that triggers scale-up.
    #[arg(long, default_value = "10")]
    pub scale_up_threshold: usize,

    /// Maximum simultaneously in-flight tasks per worker.
    #[arg(long, default_value = "3")]
    pub concurrency: usize,

    /// Control-loop tick interval in milliseconds.
    #[arg(long, default_value = "500")]
    pub tick_ms: u64,

    /// Per-task execution timeout in milliseconds.
    #[arg(long, default_value = "30000")]
    pub task_timeout_ms: u64,

    /// Grace period for in-flight tasks at shutdown, in milliseconds.
    #[arg(long, default_value = "5000")]
    pub shutdown_grace_ms: u64,

    /// Number of synthetic tasks to submit.
    #[arg(short = 'n', long, default_value = "50")]
    pub tasks: usize,

    /// Run workers as in-process tasks instead of OS processes.
    #[arg(long)]
    pub local: bool,
}

/// Arguments for the hidden `taskforge worker` subcommand. The flag set
/// mirrors what `ProcessLauncher` passes on spawn.
#[derive(Parser, Debug)]
pub struct WorkerArgs {
    /// Logical worker name assigned by the supervisor.
    #[arg(long)]
    pub name: String,

    /// Maximum simultaneously in-flight tasks.
    #[arg(long, default_value = "3")]
    pub concurrency: usize,

    /// Sleep between queue polls when idle, in milliseconds.
    #[arg(long, default_value = "100")]
    pub idle_backoff_ms: u64,

    /// Per-task execution timeout in milliseconds.
    #[arg(long, default_value = "30000")]
    pub task_timeout_ms: u64,

    /// Grace period for in-flight tasks after a stop, in milliseconds.
    #[arg(long, default_value = "5000")]
    pub shutdown_grace_ms: u64,
}

/// Handler for the synthetic demo workload.
///
/// Payload fields: `sleep_ms` simulates work, `fail: true` makes the
/// task fail.
struct DemoHandler;

#[async_trait::async_trait]
impl TaskHandler for DemoHandler {
    async fn execute(&self, task: &Task) -> anyhow::Result<serde_json::Value> {
        let sleep_ms = task
            .payload
            .get("sleep_ms")
            .and_then(|v| v.as_u64())
            .unwrap_or(0);
        if sleep_ms > 0 {
            tokio::time::sleep(Duration::from_millis(sleep_ms)).await;
        }
        if task
            .payload
            .get("fail")
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
        {
            anyhow::bail!("synthetic failure requested by payload");
        }
        Ok(serde_json::json!({ "slept_ms": sleep_ms }))
    }
}

/// Parse CLI arguments without running any command.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI by parsing arguments and executing the command.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with the parsed arguments.
///
/// This is the main entry point for the taskforge binary.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Run(args) => run_supervisor_command(args).await?,
        Commands::Worker(args) => run_worker_command(args).await?,
    }
    Ok(())
}

async fn run_supervisor_command(args: RunArgs) -> anyhow::Result<()> {
    let config = SupervisorConfig::new(args.min_workers, args.max_workers)
        .with_scale_up_threshold(args.scale_up_threshold)
        .with_concurrency_limit(args.concurrency)
        .with_control_loop_interval(Duration::from_millis(args.tick_ms))
        .with_task_timeout(Duration::from_millis(args.task_timeout_ms))
        .with_shutdown_grace(Duration::from_millis(args.shutdown_grace_ms));

    let mut supervisor = if args.local {
        Supervisor::with_local_workers(config, Arc::new(DemoHandler))?
    } else {
        Supervisor::with_process_workers(config)?
    };
    supervisor.start()?;

    let ids = submit_synthetic_load(&supervisor, args.tasks)?;
    info!(submitted = ids.len(), "synthetic workload submitted");

    // Poll until every task has a terminal result. Crashed-worker tasks
    // come back as failures, so this always terminates.
    let mut pending = ids;
    while !pending.is_empty() {
        tokio::time::sleep(Duration::from_millis(200)).await;
        pending.retain(|id| supervisor.poll_result(*id).is_pending());

        let metrics = supervisor.metrics();
        info!(
            awaiting = pending.len(),
            workers = metrics.worker_count,
            queue_depth = metrics.pending_depth,
            in_flight = metrics.in_flight_count,
            "workload progress"
        );
    }

    let metrics = supervisor.metrics();
    info!(
        succeeded = metrics.tasks_succeeded,
        failed = metrics.tasks_failed,
        "workload complete"
    );

    supervisor.shutdown().await?;
    Ok(())
}

/// Deterministic mixed workload: variable sleep times plus a failure
/// every tenth task.
fn submit_synthetic_load(supervisor: &Supervisor, count: usize) -> anyhow::Result<Vec<Uuid>> {
    let mut ids = Vec::with_capacity(count);
    for i in 0..count {
        let sleep_ms = 20 + (i as u64 % 7) * 30;
        let payload = if i % 10 == 9 {
            serde_json::json!({ "sleep_ms": sleep_ms, "fail": true })
        } else {
            serde_json::json!({ "sleep_ms": sleep_ms })
        };
        ids.push(supervisor.submit(Task::new(payload))?);
    }
    Ok(ids)
}

async fn run_worker_command(args: WorkerArgs) -> anyhow::Result<()> {
    let options = WorkerOptions {
        name: args.name,
        concurrency_limit: args.concurrency,
        idle_backoff: Duration::from_millis(args.idle_backoff_ms),
        task_timeout: Duration::from_millis(args.task_timeout_ms),
        shutdown_grace: Duration::from_millis(args.shutdown_grace_ms),
    };

    // stdout carries the protocol, so stderr is the only place logs may
    // go; main wires tracing accordingly.
    let channel = PipeChannel::from_stdio();
    run_worker(channel, Arc::new(DemoHandler), options).await?;
    Ok(())
}
