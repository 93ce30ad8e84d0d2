//! The supervisor: owns worker lifecycle and the scaling control loop.
//!
//! The supervisor is the only component that creates or destroys workers.
//! Its registry of `WorkerRecord`s is private state of the control-loop
//! task; nothing else reads or writes it, so it needs no lock. Workers
//! report liveness implicitly by existing; the reaper notices exits with
//! a non-blocking check each tick and respawns to hold `min_workers`.
//!
//! Worker slot state machine:
//!
//! ```text
//! Absent -> Spawning -> Running -> { Stopped | Crashed } -> Absent
//! ```
//!
//! A `Crashed` exit below `min_workers` re-enters `Spawning` on the same
//! tick that reaped it.

pub mod connection;
pub mod launcher;
pub mod scaling;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::{ConfigError, SupervisorConfig};
use crate::handler::TaskHandler;
use crate::metrics::{Metrics, SharedCounters};
use crate::queue::{QueueError, QueueService};
use crate::task::{PollReply, Task};
use crate::worker::WorkerOptions;

pub use launcher::{
    Launcher, LocalLauncher, ProcessLauncher, SpawnError, WorkerContext, WorkerHandle,
};
pub use scaling::{decide, LoadSnapshot, ScalingDecision};

/// Errors from supervisor lifecycle operations.
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// The configuration failed validation.
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// `start` was called on a running supervisor.
    #[error("supervisor is already running")]
    AlreadyRunning,

    /// `shutdown` was called on a stopped supervisor.
    #[error("supervisor is not running")]
    NotRunning,

    /// The task queue rejected an operation (e.g. submit after shutdown).
    #[error("queue error: {0}")]
    Queue(#[from] QueueError),

    /// A launcher could not be constructed.
    #[error("launcher error: {0}")]
    Spawn(#[from] SpawnError),

    /// The control loop did not exit within the shutdown deadline.
    #[error("shutdown timed out after {0:?}")]
    ShutdownTimeout(Duration),
}

/// Registry entry for one live worker. Created on spawn, destroyed when
/// the reaper observes the exit.
struct WorkerRecord {
    name: String,
    handle: WorkerHandle,
    stop: Arc<AtomicBool>,
    spawned_at: DateTime<Utc>,
}

impl WorkerRecord {
    fn is_stopping(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }
}

/// Process supervisor with an adaptive worker pool.
///
/// External collaborators see exactly three boundary operations
/// (`submit`, `poll_result` and `metrics`) plus lifecycle control.
pub struct Supervisor {
    config: SupervisorConfig,
    service: QueueService,
    counters: Arc<SharedCounters>,
    launcher: Arc<dyn Launcher>,
    shutdown_tx: broadcast::Sender<()>,
    control: Option<JoinHandle<()>>,
}

impl Supervisor {
    /// Creates a supervisor with an explicit launcher.
    pub fn new(
        config: SupervisorConfig,
        launcher: Arc<dyn Launcher>,
    ) -> Result<Self, SupervisorError> {
        config.validate()?;
        let counters = Arc::new(SharedCounters::new());
        let service = QueueService::new(Arc::clone(&counters));
        let (shutdown_tx, _) = broadcast::channel(1);

        Ok(Self {
            config,
            service,
            counters,
            launcher,
            shutdown_tx,
            control: None,
        })
    }

    /// Creates a supervisor whose workers are separate OS processes
    /// running this binary's `worker` subcommand.
    pub fn with_process_workers(config: SupervisorConfig) -> Result<Self, SupervisorError> {
        let launcher = ProcessLauncher::from_current_exe()?;
        Self::new(config, Arc::new(launcher))
    }

    /// Creates a supervisor whose workers run as in-process tasks with
    /// the given handler.
    pub fn with_local_workers(
        config: SupervisorConfig,
        handler: Arc<dyn TaskHandler>,
    ) -> Result<Self, SupervisorError> {
        Self::new(config, Arc::new(LocalLauncher::new(handler)))
    }

    /// Starts the control loop. The initial ramp to `min_workers` happens
    /// on the first tick.
    pub fn start(&mut self) -> Result<(), SupervisorError> {
        if self.control.is_some() {
            return Err(SupervisorError::AlreadyRunning);
        }

        let control_loop = ControlLoop {
            config: self.config.clone(),
            service: self.service.clone(),
            counters: Arc::clone(&self.counters),
            launcher: Arc::clone(&self.launcher),
            registry: Vec::new(),
            next_worker_id: 0,
            idle_ticks: 0,
        };
        let shutdown_rx = self.shutdown_tx.subscribe();
        self.control = Some(tokio::spawn(control_loop.run(shutdown_rx)));

        info!(
            min_workers = self.config.min_workers,
            max_workers = self.config.max_workers,
            scale_up_threshold = self.config.scale_up_threshold,
            "supervisor started"
        );
        Ok(())
    }

    /// Gracefully stops the control loop and all workers: STOP is sent to
    /// every worker, in-flight tasks get the grace period, stragglers are
    /// killed.
    pub async fn shutdown(&mut self) -> Result<(), SupervisorError> {
        let Some(control) = self.control.take() else {
            return Err(SupervisorError::NotRunning);
        };

        info!("initiating supervisor shutdown");
        self.service.close();
        // Ignore send error: the control loop may already be gone.
        let _ = self.shutdown_tx.send(());

        let deadline = self.config.shutdown_grace
            + self.config.control_loop_interval * 2
            + Duration::from_secs(1);
        match tokio::time::timeout(deadline, control).await {
            Ok(Ok(())) => {
                info!("supervisor shutdown complete");
                Ok(())
            }
            Ok(Err(e)) => {
                error!(error = %e, "control loop panicked during shutdown");
                Ok(())
            }
            Err(_) => Err(SupervisorError::ShutdownTimeout(deadline)),
        }
    }

    /// Enqueues a task and returns its id. The payload is never
    /// inspected.
    pub fn submit(&self, task: Task) -> Result<Uuid, SupervisorError> {
        Ok(self.service.submit(task)?)
    }

    /// Looks up the result for a task id. Callers pull; the core never
    /// pushes results.
    pub fn poll_result(&self, id: Uuid) -> PollReply {
        self.service.poll(id)
    }

    /// Current observability snapshot.
    pub fn metrics(&self) -> Metrics {
        self.service.metrics()
    }

    /// Whether the control loop has been started and not shut down.
    pub fn is_running(&self) -> bool {
        self.control.is_some()
    }

    /// The queue service, for wiring custom launchers in tests or
    /// embeddings.
    pub fn queue_service(&self) -> &QueueService {
        &self.service
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        // Last resort if the owner never called shutdown. Process workers
        // are killed via kill_on_drop on their Child handles.
        if let Some(control) = self.control.take() {
            control.abort();
        }
    }
}

/// State owned exclusively by the control-loop task.
struct ControlLoop {
    config: SupervisorConfig,
    service: QueueService,
    counters: Arc<SharedCounters>,
    launcher: Arc<dyn Launcher>,
    registry: Vec<WorkerRecord>,
    next_worker_id: u64,
    idle_ticks: u32,
}

impl ControlLoop {
    async fn run(mut self, mut shutdown_rx: broadcast::Receiver<()>) {
        let mut tick = tokio::time::interval(self.config.control_loop_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!("control loop started");
        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => break,
                _ = tick.tick() => {
                    self.reap();
                    self.scale().await;
                    self.counters.set_worker_count(self.registry.len());
                    debug!(
                        pending = self.service.pending_depth(),
                        workers = self.registry.len(),
                        in_flight = self.counters.in_flight(),
                        "control tick"
                    );
                }
            }
        }

        self.stop_all_workers().await;
        self.counters.set_worker_count(0);
        info!("control loop exited");
    }

    /// Non-blockingly collects exited workers. A crashed worker's
    /// in-flight tasks become explicit failures; respawning (if below
    /// `min_workers`) happens in `scale` on this same tick.
    fn reap(&mut self) {
        let service = &self.service;
        self.registry.retain_mut(|record| {
            if record.handle.is_alive() {
                return true;
            }
            let stopping = record.is_stopping();
            let reason = if stopping {
                "worker stopped before completing task"
            } else {
                "worker crashed"
            };
            let lost = service.fail_in_flight(&record.name, reason);
            if stopping {
                info!(worker = %record.name, lost, "worker stopped");
            } else {
                warn!(
                    worker = %record.name,
                    lost,
                    uptime_secs = (Utc::now() - record.spawned_at).num_seconds(),
                    "worker exited unexpectedly"
                );
            }
            false
        });
    }

    /// Applies the scaling policy for this tick.
    async fn scale(&mut self) {
        let pending_depth = self.service.pending_depth();
        let in_flight = self.counters.in_flight();
        if pending_depth == 0 && in_flight == 0 {
            self.idle_ticks = self.idle_ticks.saturating_add(1);
        } else {
            self.idle_ticks = 0;
        }

        let snapshot = LoadSnapshot {
            pending_depth,
            in_flight,
            worker_count: self.registry.len(),
            idle_ticks: self.idle_ticks,
        };

        match decide(snapshot, &self.config) {
            ScalingDecision::Idle => {}
            ScalingDecision::ScaleUp(count) => {
                for _ in 0..count {
                    if !self.spawn_worker().await {
                        break;
                    }
                }
            }
            ScalingDecision::ScaleDown => {
                self.retire_one();
                self.idle_ticks = 0;
            }
        }
    }

    /// Spawns one worker. Returns false when at the ceiling or when the
    /// spawn failed (failure is logged and retried on a later tick, never
    /// escalated).
    async fn spawn_worker(&mut self) -> bool {
        if self.registry.len() >= self.config.max_workers {
            debug!("at max_workers; not spawning");
            return false;
        }

        let name = format!("worker-{}", self.next_worker_id);
        let stop = Arc::new(AtomicBool::new(false));
        let context = WorkerContext {
            service: self.service.clone(),
            stop: Arc::clone(&stop),
            options: WorkerOptions {
                name: name.clone(),
                concurrency_limit: self.config.concurrency_limit,
                idle_backoff: self.config.idle_backoff,
                task_timeout: self.config.task_timeout,
                shutdown_grace: self.config.shutdown_grace,
            },
        };

        match self.launcher.spawn(context).await {
            Ok(handle) => {
                self.next_worker_id += 1;
                self.registry.push(WorkerRecord {
                    name,
                    handle,
                    stop,
                    spawned_at: Utc::now(),
                });
                true
            }
            Err(e) => {
                warn!(worker = %name, error = %e, "worker spawn failed; retrying next tick");
                false
            }
        }
    }

    /// Flags the newest non-retiring worker to stop. The record stays in
    /// the registry until the reaper confirms the exit.
    fn retire_one(&mut self) {
        if let Some(record) = self.registry.iter().rev().find(|r| !r.is_stopping()) {
            info!(worker = %record.name, "retiring worker");
            record.stop.store(true, Ordering::SeqCst);
        }
    }

    /// Cooperative stop of the whole pool, then force-kill of stragglers.
    async fn stop_all_workers(&mut self) {
        info!(workers = self.registry.len(), "stopping all workers");
        for record in &self.registry {
            record.stop.store(true, Ordering::SeqCst);
        }

        let deadline =
            Instant::now() + self.config.shutdown_grace + self.config.control_loop_interval;
        loop {
            self.reap();
            if self.registry.is_empty() {
                return;
            }
            if Instant::now() >= deadline {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        for mut record in std::mem::take(&mut self.registry) {
            warn!(worker = %record.name, "force-killing worker that ignored stop");
            record.handle.kill().await;
            self.service
                .fail_in_flight(&record.name, "worker killed during shutdown");
        }
    }
}
