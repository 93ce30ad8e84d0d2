//! Supervisor side of a worker process's pipe connection.
//!
//! One `serve` task runs per worker process, answering that worker's
//! requests from the shared `QueueService`. All workers' serve tasks pull
//! from the same queue, which is what preserves pool-wide FIFO.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWrite};
use tracing::{debug, error};

use crate::queue::protocol::{read_message, write_message, ProtocolError, SupervisorReply, WorkerRequest};
use crate::queue::QueueService;

/// Serves one worker's pipe until the worker closes its end (exit or
/// crash). Returns cleanly on EOF.
pub async fn serve<R, W>(
    mut reader: R,
    mut writer: W,
    worker: &str,
    service: QueueService,
    stop: Arc<AtomicBool>,
) -> Result<(), ProtocolError>
where
    R: AsyncBufReadExt + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    loop {
        let Some(request) = read_message::<_, WorkerRequest>(&mut reader).await? else {
            debug!(worker = %worker, "worker closed its pipe");
            return Ok(());
        };

        match request {
            WorkerRequest::Dequeue => {
                let reply = if stop.load(Ordering::SeqCst) {
                    SupervisorReply::Stop
                } else {
                    match service.dispatch(worker) {
                        Ok(Some(task)) => SupervisorReply::Task { task },
                        Ok(None) => SupervisorReply::Empty,
                        Err(e) => {
                            // Queue unusable: tell the worker to wind down.
                            error!(worker = %worker, error = %e, "dispatch failed");
                            SupervisorReply::Stop
                        }
                    }
                };
                write_message(&mut writer, &reply).await?;
            }
            WorkerRequest::Complete { result } => {
                debug!(
                    worker = %worker,
                    task_id = %result.task_id,
                    status = %result.status,
                    "task completed"
                );
                service.complete(result);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::BufReader;

    use crate::metrics::SharedCounters;
    use crate::task::{Task, TaskResult};

    async fn run_serve(
        requests: Vec<u8>,
        service: QueueService,
        stop: bool,
    ) -> (Vec<u8>, Result<(), ProtocolError>) {
        let mut replies = Vec::new();
        let result = serve(
            BufReader::new(requests.as_slice()),
            &mut replies,
            "worker-0",
            service,
            Arc::new(AtomicBool::new(stop)),
        )
        .await;
        (replies, result)
    }

    #[tokio::test]
    async fn test_serve_dispatches_and_records_completion() {
        let service = QueueService::new(Arc::new(SharedCounters::new()));
        let id = service
            .submit(Task::new(serde_json::json!({"n": 1})))
            .expect("submit should work");

        // Script: dequeue (gets the task), complete it, dequeue (empty), EOF.
        let mut requests = Vec::new();
        write_message(&mut requests, &WorkerRequest::Dequeue).await.unwrap();
        // The scripted Complete only needs the right task id and worker.
        let task = Task {
            id,
            payload: serde_json::json!({"n": 1}),
            enqueued_at: chrono::Utc::now(),
            started_at: Some(chrono::Utc::now()),
        };
        write_message(
            &mut requests,
            &WorkerRequest::Complete {
                result: TaskResult::success(&task, "worker-0", serde_json::json!("ok"), 2),
            },
        )
        .await
        .unwrap();
        write_message(&mut requests, &WorkerRequest::Dequeue).await.unwrap();

        let (replies, result) = run_serve(requests, service.clone(), false).await;
        result.expect("serve should end cleanly at EOF");

        let mut reader = BufReader::new(replies.as_slice());
        let first: SupervisorReply = read_message(&mut reader).await.unwrap().unwrap();
        let second: SupervisorReply = read_message(&mut reader).await.unwrap().unwrap();
        match first {
            SupervisorReply::Task { task } => assert_eq!(task.id, id),
            other => panic!("unexpected reply: {:?}", other),
        }
        assert!(matches!(second, SupervisorReply::Empty));

        assert!(service.poll(id).into_result().unwrap().is_success());
    }

    #[tokio::test]
    async fn test_serve_replies_stop_when_retiring() {
        let service = QueueService::new(Arc::new(SharedCounters::new()));
        service
            .submit(Task::new(serde_json::json!(null)))
            .expect("submit should work");

        let mut requests = Vec::new();
        write_message(&mut requests, &WorkerRequest::Dequeue).await.unwrap();

        let (replies, result) = run_serve(requests, service.clone(), true).await;
        result.expect("serve should end cleanly");

        let mut reader = BufReader::new(replies.as_slice());
        let reply: SupervisorReply = read_message(&mut reader).await.unwrap().unwrap();
        assert!(matches!(reply, SupervisorReply::Stop));
        // The task was never dispatched.
        assert_eq!(service.pending_depth(), 1);
    }

    #[tokio::test]
    async fn test_buffered_completion_recorded_before_serve_returns() {
        let service = QueueService::new(Arc::new(SharedCounters::new()));
        let id = service
            .submit(Task::new(serde_json::json!(null)))
            .expect("submit should work");
        let task = service
            .dispatch("worker-0")
            .expect("dispatch should work")
            .expect("task expected");

        // The worker wrote its final Complete and exited; the line is
        // still sitting in the pipe, followed by EOF.
        let mut requests = Vec::new();
        write_message(
            &mut requests,
            &WorkerRequest::Complete {
                result: TaskResult::success(&task, "worker-0", serde_json::json!("ok"), 1),
            },
        )
        .await
        .unwrap();

        let (_, result) = run_serve(requests, service.clone(), false).await;
        result.expect("serve should end cleanly at EOF");

        // By the time serve returns nothing is left in flight, so a reap
        // after the exit cannot clobber the recorded success.
        assert_eq!(service.fail_in_flight("worker-0", "worker stopped"), 0);
        assert!(service.poll(id).into_result().unwrap().is_success());
    }

    #[tokio::test]
    async fn test_serve_malformed_request_is_error() {
        let service = QueueService::new(Arc::new(SharedCounters::new()));
        let (_, result) = run_serve(b"garbage\n".to_vec(), service, false).await;
        assert!(matches!(result, Err(ProtocolError::Malformed(_))));
    }
}
