//! End-to-end tests for the supervisor lifecycle.
//!
//! These tests run full supervisors with in-process workers so they need
//! no child binaries. Timings are compressed (20ms control ticks) to keep
//! the suite fast while still exercising real scheduling.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::AbortHandle;

use taskforge::supervisor::{Launcher, SpawnError, Supervisor, WorkerContext, WorkerHandle};
use taskforge::worker::{run_worker, LocalChannel};
use taskforge::{PollReply, SupervisorConfig, Task, TaskHandler, TaskStatus};

/// Handler driven by payload fields: `sleep_ms` and `fail`.
struct ScriptedHandler;

#[async_trait]
impl TaskHandler for ScriptedHandler {
    async fn execute(&self, task: &Task) -> anyhow::Result<serde_json::Value> {
        if let Some(ms) = task.payload.get("sleep_ms").and_then(|v| v.as_u64()) {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }
        if task.payload.get("fail").and_then(|v| v.as_bool()) == Some(true) {
            anyhow::bail!("scripted failure");
        }
        Ok(serde_json::json!("ok"))
    }
}

fn fast_config(min: usize, max: usize) -> SupervisorConfig {
    SupervisorConfig::new(min, max)
        .with_scale_up_threshold(5)
        .with_concurrency_limit(2)
        .with_control_loop_interval(Duration::from_millis(20))
        .with_idle_backoff(Duration::from_millis(5))
        .with_task_timeout(Duration::from_secs(2))
        .with_shutdown_grace(Duration::from_millis(500))
        .with_scale_down_idle_ticks(3)
}

async fn wait_for<F>(mut condition: F, deadline: Duration) -> bool
where
    F: FnMut() -> bool,
{
    let start = tokio::time::Instant::now();
    while start.elapsed() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

#[tokio::test]
async fn test_submit_poll_complete_cycle() {
    let mut supervisor =
        Supervisor::with_local_workers(fast_config(2, 4), Arc::new(ScriptedHandler))
            .expect("config should be valid");
    supervisor.start().expect("start should work");

    let mut ids = Vec::new();
    for _ in 0..20 {
        ids.push(
            supervisor
                .submit(Task::new(serde_json::json!({"sleep_ms": 10})))
                .expect("submit should work"),
        );
    }

    let done = wait_for(
        || ids.iter().all(|id| !supervisor.poll_result(*id).is_pending()),
        Duration::from_secs(5),
    )
    .await;
    assert!(done, "all tasks should complete");

    for id in &ids {
        let result = supervisor
            .poll_result(*id)
            .into_result()
            .expect("result should be ready");
        assert_eq!(result.status, TaskStatus::Succeeded);
        assert!(result.worker.starts_with("worker-"));
    }

    let metrics = supervisor.metrics();
    assert_eq!(metrics.tasks_submitted, 20);
    assert_eq!(metrics.tasks_succeeded, 20);
    assert_eq!(metrics.tasks_failed, 0);
    assert!(metrics.worker_count >= 2 && metrics.worker_count <= 4);

    supervisor.shutdown().await.expect("shutdown should work");
}

#[tokio::test]
async fn test_idle_startup_ramps_to_min_workers() {
    let mut supervisor =
        Supervisor::with_local_workers(fast_config(2, 4), Arc::new(ScriptedHandler)).unwrap();
    supervisor.start().unwrap();

    // No submissions at all: the pool still ramps to min_workers.
    let ramped = wait_for(|| supervisor.metrics().worker_count == 2, Duration::from_secs(3)).await;
    assert!(ramped, "pool should reach min_workers without any load");

    // And holds there: no load means no growth, and min is the floor.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(supervisor.metrics().worker_count, 2);

    supervisor.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_unknown_task_id_is_not_found() {
    let mut supervisor =
        Supervisor::with_local_workers(fast_config(1, 2), Arc::new(ScriptedHandler)).unwrap();
    supervisor.start().unwrap();

    assert!(matches!(
        supervisor.poll_result(uuid::Uuid::new_v4()),
        PollReply::NotFound
    ));

    supervisor.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_backlog_scales_pool_to_max() {
    let mut supervisor =
        Supervisor::with_local_workers(fast_config(1, 3), Arc::new(ScriptedHandler)).unwrap();
    supervisor.start().unwrap();

    // Deep backlog of slow tasks: way past the threshold of 5.
    let mut ids = Vec::new();
    for _ in 0..40 {
        ids.push(
            supervisor
                .submit(Task::new(serde_json::json!({"sleep_ms": 100})))
                .unwrap(),
        );
    }

    let grew = wait_for(|| supervisor.metrics().worker_count == 3, Duration::from_secs(3)).await;
    assert!(grew, "pool should grow to max_workers under sustained backlog");

    // The ceiling holds no matter how long the backlog persists.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(supervisor.metrics().worker_count <= 3);

    let drained = wait_for(
        || ids.iter().all(|id| !supervisor.poll_result(*id).is_pending()),
        Duration::from_secs(15),
    )
    .await;
    assert!(drained, "backlog should drain");

    supervisor.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_idle_pool_scales_down_to_min() {
    let mut supervisor =
        Supervisor::with_local_workers(fast_config(1, 3), Arc::new(ScriptedHandler)).unwrap();
    supervisor.start().unwrap();

    // Push the pool up.
    let mut ids = Vec::new();
    for _ in 0..30 {
        ids.push(
            supervisor
                .submit(Task::new(serde_json::json!({"sleep_ms": 50})))
                .unwrap(),
        );
    }
    assert!(wait_for(|| supervisor.metrics().worker_count > 1, Duration::from_secs(3)).await);

    // Let everything finish, then wait out the idle hysteresis.
    assert!(
        wait_for(
            || ids.iter().all(|id| !supervisor.poll_result(*id).is_pending()),
            Duration::from_secs(10),
        )
        .await
    );
    let shrunk = wait_for(|| supervisor.metrics().worker_count == 1, Duration::from_secs(5)).await;
    assert!(shrunk, "idle pool should retire back to min_workers");

    supervisor.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_task_timeout_fails_task_and_frees_slot() {
    let mut supervisor =
        Supervisor::with_local_workers(
            fast_config(1, 2).with_task_timeout(Duration::from_millis(50)),
            Arc::new(ScriptedHandler),
        )
        .unwrap();
    supervisor.start().unwrap();

    let hung = supervisor
        .submit(Task::new(serde_json::json!({"sleep_ms": 60000})))
        .unwrap();
    let healthy = supervisor
        .submit(Task::new(serde_json::json!({"sleep_ms": 5})))
        .unwrap();

    assert!(
        wait_for(
            || !supervisor.poll_result(hung).is_pending()
                && !supervisor.poll_result(healthy).is_pending(),
            Duration::from_secs(5),
        )
        .await
    );

    let hung_result = supervisor.poll_result(hung).into_result().unwrap();
    assert_eq!(hung_result.status, TaskStatus::Failed);
    assert!(hung_result.error.as_deref().unwrap_or("").contains("timed out"));
    // The worker that hit the timeout keeps serving other tasks.
    let healthy_result = supervisor.poll_result(healthy).into_result().unwrap();
    assert_eq!(healthy_result.status, TaskStatus::Succeeded);

    supervisor.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_handler_failure_is_isolated() {
    let mut supervisor =
        Supervisor::with_local_workers(fast_config(1, 2), Arc::new(ScriptedHandler)).unwrap();
    supervisor.start().unwrap();

    let failing = supervisor
        .submit(Task::new(serde_json::json!({"fail": true})))
        .unwrap();
    let healthy = supervisor.submit(Task::new(serde_json::json!({}))).unwrap();

    assert!(
        wait_for(
            || !supervisor.poll_result(failing).is_pending()
                && !supervisor.poll_result(healthy).is_pending(),
            Duration::from_secs(5),
        )
        .await
    );

    let failed = supervisor.poll_result(failing).into_result().unwrap();
    assert_eq!(failed.status, TaskStatus::Failed);
    assert!(failed.error.as_deref().unwrap_or("").contains("scripted failure"));
    assert!(supervisor.poll_result(healthy).into_result().unwrap().is_success());

    let metrics = supervisor.metrics();
    assert_eq!(metrics.tasks_submitted, 2);
    assert_eq!(metrics.tasks_succeeded, 1);
    assert_eq!(metrics.tasks_failed, 1);

    supervisor.shutdown().await.unwrap();
}

/// Launcher that exposes abort handles so tests can kill workers the way
/// the OS would kill a process.
struct KillableLauncher {
    handler: Arc<dyn TaskHandler>,
    spawned: Arc<Mutex<Vec<AbortHandle>>>,
}

#[async_trait]
impl Launcher for KillableLauncher {
    async fn spawn(&self, context: WorkerContext) -> Result<WorkerHandle, SpawnError> {
        let channel = LocalChannel::new(
            context.options.name.clone(),
            context.service.clone(),
            Arc::clone(&context.stop),
        );
        let handler = Arc::clone(&self.handler);
        let task = tokio::spawn(async move {
            let _ = run_worker(channel, handler, context.options).await;
        });
        self.spawned
            .lock()
            .expect("lock should not be poisoned")
            .push(task.abort_handle());
        Ok(WorkerHandle::local(task))
    }
}

#[tokio::test]
async fn test_crashed_worker_is_replaced_and_tasks_failed() {
    let spawned = Arc::new(Mutex::new(Vec::new()));
    let launcher = KillableLauncher {
        handler: Arc::new(ScriptedHandler),
        spawned: Arc::clone(&spawned),
    };
    let mut supervisor = Supervisor::new(fast_config(1, 2), Arc::new(launcher)).unwrap();
    supervisor.start().unwrap();

    // A task slow enough to still be in flight when we pull the plug.
    let doomed = supervisor
        .submit(Task::new(serde_json::json!({"sleep_ms": 60000})))
        .unwrap();
    assert!(
        wait_for(|| supervisor.metrics().in_flight_count == 1, Duration::from_secs(3)).await,
        "task should be dispatched"
    );

    // Kill the worker mid-task.
    spawned
        .lock()
        .expect("lock should not be poisoned")
        .first()
        .expect("one worker should have spawned")
        .abort();

    // The supervisor surfaces the lost task as an explicit failure...
    assert!(
        wait_for(|| !supervisor.poll_result(doomed).is_pending(), Duration::from_secs(3)).await,
        "in-flight task of crashed worker should fail"
    );
    let result = supervisor.poll_result(doomed).into_result().unwrap();
    assert_eq!(result.status, TaskStatus::Failed);
    assert!(result.error.as_deref().unwrap_or("").contains("crashed"));

    // ...and refills the pool to min_workers.
    assert!(
        wait_for(|| supervisor.metrics().worker_count >= 1, Duration::from_secs(3)).await,
        "crashed worker should be replaced"
    );
    let spawn_count = spawned.lock().expect("lock should not be poisoned").len();
    assert!(spawn_count >= 2, "a replacement worker should have spawned");

    // The replacement actually works.
    let probe = supervisor
        .submit(Task::new(serde_json::json!({"sleep_ms": 5})))
        .unwrap();
    assert!(
        wait_for(|| !supervisor.poll_result(probe).is_pending(), Duration::from_secs(3)).await
    );
    assert!(supervisor.poll_result(probe).into_result().unwrap().is_success());

    supervisor.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_graceful_shutdown_finishes_in_flight_work() {
    let mut supervisor =
        Supervisor::with_local_workers(fast_config(2, 2), Arc::new(ScriptedHandler)).unwrap();
    supervisor.start().unwrap();

    let mut ids = Vec::new();
    for _ in 0..4 {
        ids.push(
            supervisor
                .submit(Task::new(serde_json::json!({"sleep_ms": 200})))
                .unwrap(),
        );
    }
    // Two workers with concurrency 2 can hold all four tasks; wait until
    // everything is dispatched so shutdown has real in-flight work to drain.
    assert!(
        wait_for(|| supervisor.metrics().in_flight_count == 4, Duration::from_secs(3)).await
    );

    supervisor.shutdown().await.expect("shutdown should work");
    assert!(!supervisor.is_running());

    // Everything in flight at shutdown finished inside the grace period.
    for id in ids {
        let result = supervisor
            .poll_result(id)
            .into_result()
            .expect("in-flight task should have drained");
        assert_eq!(result.status, TaskStatus::Succeeded);
    }

    // New work is refused after shutdown.
    assert!(supervisor.submit(Task::new(serde_json::json!(null))).is_err());
}
