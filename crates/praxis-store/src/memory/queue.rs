//! In-process task queue backed by a fixed worker pool.
//!
//! A fixed-size pool of worker loops pulls submitted tasks from a single
//! FIFO queue in submission order; each worker runs at most one task at a
//! time, and task bodies may suspend without blocking the other workers.
//! Results move through PENDING → STARTED → SUCCESS/FAILURE (or REVOKED),
//! observed by waiters via watch channels.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, RwLock as StdRwLock};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{StoreError, StoreResult};
use crate::queue::{TaskHandler, TaskInvocation, TaskQueue};
use praxis_core::JsonMap;

/// Execution state of one submitted task.
#[derive(Debug, Clone)]
enum TaskState {
    Pending,
    Started,
    Success(Value),
    Failure(String),
    Revoked,
}

impl TaskState {
    fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Success(_) | TaskState::Failure(_) | TaskState::Revoked
        )
    }
}

struct QueueItem {
    task_id: String,
    name: String,
    invocation: TaskInvocation,
}

/// Task id → state publisher. Senders are retained so late waiters can
/// still observe terminal states.
#[derive(Default)]
struct ResultTable {
    inner: StdMutex<HashMap<String, watch::Sender<TaskState>>>,
}

impl ResultTable {
    fn insert(&self, task_id: &str) {
        let (tx, _) = watch::channel(TaskState::Pending);
        self.inner.lock().unwrap().insert(task_id.to_string(), tx);
    }

    fn set(&self, task_id: &str, state: TaskState) {
        if let Some(tx) = self.inner.lock().unwrap().get(task_id) {
            let _ = tx.send(state);
        }
    }

    fn current(&self, task_id: &str) -> Option<TaskState> {
        self.inner
            .lock()
            .unwrap()
            .get(task_id)
            .map(|tx| tx.borrow().clone())
    }

    fn subscribe(&self, task_id: &str) -> Option<watch::Receiver<TaskState>> {
        self.inner
            .lock()
            .unwrap()
            .get(task_id)
            .map(|tx| tx.subscribe())
    }

    /// Move `Pending → Started` as one step under the table lock.
    /// Returns false when the task was revoked (or is unknown), in which
    /// case it must not run.
    fn begin(&self, task_id: &str) -> bool {
        let table = self.inner.lock().unwrap();
        match table.get(task_id) {
            Some(tx) => {
                let pending = matches!(&*tx.borrow(), TaskState::Pending);
                if pending {
                    let _ = tx.send(TaskState::Started);
                }
                pending
            }
            None => false,
        }
    }

    /// Move `Pending → Revoked` as one step under the table lock.
    /// Returns false once the task has started or finished; a terminal
    /// state is never overwritten.
    fn try_revoke(&self, task_id: &str) -> bool {
        let table = self.inner.lock().unwrap();
        match table.get(task_id) {
            Some(tx) => {
                let pending = matches!(&*tx.borrow(), TaskState::Pending);
                if pending {
                    let _ = tx.send(TaskState::Revoked);
                }
                pending
            }
            None => false,
        }
    }
}

/// Reference `TaskQueue`: a FIFO queue drained by `workers` loops.
///
/// Must be created inside a Tokio runtime (it spawns the worker loops).
pub struct WorkerPoolQueue {
    handlers: Arc<StdRwLock<HashMap<String, TaskHandler>>>,
    /// Intake side of the FIFO queue; `None` once closed.
    intake: StdMutex<Option<mpsc::UnboundedSender<QueueItem>>>,
    results: Arc<ResultTable>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPoolQueue {
    /// Spawn a queue with a pool of `workers` worker loops.
    pub fn new(workers: usize) -> Self {
        let workers = workers.max(1);
        let handlers: Arc<StdRwLock<HashMap<String, TaskHandler>>> =
            Arc::new(StdRwLock::new(HashMap::new()));
        let results = Arc::new(ResultTable::default());

        let (tx, rx) = mpsc::unbounded_channel();
        let rx = Arc::new(Mutex::new(rx));

        let handles = (0..workers)
            .map(|worker| {
                tokio::spawn(worker_loop(
                    worker,
                    rx.clone(),
                    handlers.clone(),
                    results.clone(),
                ))
            })
            .collect();

        info!(workers, "worker pool queue started");
        Self {
            handlers,
            intake: StdMutex::new(Some(tx)),
            results,
            workers: Mutex::new(handles),
        }
    }
}

#[async_trait]
impl TaskQueue for WorkerPoolQueue {
    fn register(&self, name: &str, handler: TaskHandler) {
        self.handlers
            .write()
            .unwrap()
            .insert(name.to_string(), handler);
        debug!(task = name, "task registered");
    }

    async fn send_task(
        &self,
        name: &str,
        args: Vec<Value>,
        kwargs: JsonMap,
    ) -> StoreResult<String> {
        if !self.handlers.read().unwrap().contains_key(name) {
            return Err(StoreError::UnknownTask(name.to_string()));
        }

        let tx = self
            .intake
            .lock()
            .unwrap()
            .as_ref()
            .cloned()
            .ok_or(StoreError::Closed)?;

        let task_id = Uuid::new_v4().to_string();
        self.results.insert(&task_id);
        let item = QueueItem {
            task_id: task_id.clone(),
            name: name.to_string(),
            invocation: TaskInvocation::new(args, kwargs),
        };
        tx.send(item).map_err(|_| StoreError::Closed)?;

        debug!(%task_id, task = name, "task queued");
        Ok(task_id)
    }

    async fn get_result(&self, task_id: &str, timeout: Option<Duration>) -> StoreResult<Value> {
        let mut rx = self
            .results
            .subscribe(task_id)
            .ok_or_else(|| StoreError::NotFound(format!("task {task_id}")))?;

        let wait = async move {
            loop {
                let state = rx.borrow().clone();
                if state.is_terminal() {
                    return state;
                }
                if rx.changed().await.is_err() {
                    // Publisher dropped without a terminal state.
                    return TaskState::Failure("result channel closed".to_string());
                }
            }
        };

        let state = match timeout {
            Some(limit) => tokio::time::timeout(limit, wait)
                .await
                .map_err(|_| StoreError::Timeout(task_id.to_string()))?,
            None => wait.await,
        };

        match state {
            TaskState::Success(value) => Ok(value),
            TaskState::Failure(message) => Err(StoreError::TaskFailed(message)),
            TaskState::Revoked => Err(StoreError::Revoked(task_id.to_string())),
            TaskState::Pending | TaskState::Started => unreachable!("non-terminal state"),
        }
    }

    async fn revoke(&self, task_id: &str) -> StoreResult<()> {
        if self.results.current(task_id).is_none() {
            warn!(%task_id, "revoke of unknown task ignored");
        } else if self.results.try_revoke(task_id) {
            debug!(%task_id, "queued task revoked");
        } else {
            // Already started or finished; revocation is advisory.
            debug!(%task_id, "revoke ignored, task already started");
        }
        Ok(())
    }

    async fn close(&self) -> StoreResult<()> {
        // Dropping the intake lets workers drain the queue and exit.
        self.intake.lock().unwrap().take();
        let handles: Vec<JoinHandle<()>> = self.workers.lock().await.drain(..).collect();
        for handle in handles {
            let _ = handle.await;
        }
        info!("worker pool queue closed");
        Ok(())
    }
}

/// One worker: pull the next task off the shared queue, run it, publish
/// the terminal state. Holding the receiver lock only while waiting
/// keeps start order FIFO while letting bodies run in parallel.
async fn worker_loop(
    worker: usize,
    rx: Arc<Mutex<mpsc::UnboundedReceiver<QueueItem>>>,
    handlers: Arc<StdRwLock<HashMap<String, TaskHandler>>>,
    results: Arc<ResultTable>,
) {
    loop {
        let item = {
            let mut rx = rx.lock().await;
            rx.recv().await
        };
        let Some(item) = item else { break };

        // begin() claims Pending → Started atomically; a task revoked
        // while queued never starts, and its Revoked state stays final.
        if !results.begin(&item.task_id) {
            debug!(worker, task_id = %item.task_id, "skipping revoked task");
            continue;
        }

        let handler = handlers.read().unwrap().get(&item.name).cloned();
        let state = match handler {
            Some(handler) => match handler(item.invocation).await {
                Ok(value) => TaskState::Success(value),
                Err(error) => {
                    warn!(worker, task_id = %item.task_id, %error, "task failed");
                    TaskState::Failure(format!("{error:#}"))
                }
            },
            // Registration is checked at dispatch; this arm only fires if
            // a handler map were mutated mid-flight.
            None => TaskState::Failure(format!("no handler for task {:?}", item.name)),
        };
        results.set(&item.task_id, state);
    }
    debug!(worker, "worker exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::task_handler;
    use serde_json::json;

    fn add_handler() -> TaskHandler {
        task_handler(|inv: TaskInvocation| async move {
            let a = inv.args[0].as_i64().unwrap_or(0);
            let b = inv.args[1].as_i64().unwrap_or(0);
            Ok(json!(a + b))
        })
    }

    fn sleep_handler(millis: u64) -> TaskHandler {
        task_handler(move |_inv| async move {
            tokio::time::sleep(Duration::from_millis(millis)).await;
            Ok(json!("done"))
        })
    }

    #[tokio::test]
    async fn add_round_trip() {
        let queue = WorkerPoolQueue::new(2);
        queue.register("add", add_handler());

        let task_id = queue
            .send_task("add", vec![json!(2), json!(3)], JsonMap::new())
            .await
            .unwrap();
        assert!(!task_id.is_empty());

        let result = queue
            .get_result(&task_id, Some(Duration::from_secs(2)))
            .await
            .unwrap();
        assert_eq!(result, json!(5));
    }

    #[tokio::test]
    async fn unknown_task_fails_dispatch_immediately() {
        let queue = WorkerPoolQueue::new(1);
        let err = queue
            .send_task("nope", vec![], JsonMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::UnknownTask(_)));
    }

    #[tokio::test]
    async fn task_failure_is_reraised_to_waiter() {
        let queue = WorkerPoolQueue::new(1);
        queue.register(
            "explode",
            task_handler(|_inv| async move {
                Err(anyhow::anyhow!("deck plate missing from slot 4"))
            }),
        );

        let task_id = queue
            .send_task("explode", vec![], JsonMap::new())
            .await
            .unwrap();
        let err = queue
            .get_result(&task_id, Some(Duration::from_secs(2)))
            .await
            .unwrap_err();
        match err {
            StoreError::TaskFailed(message) => {
                assert!(message.contains("deck plate missing from slot 4"))
            }
            other => panic!("expected TaskFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn get_result_times_out_without_cancelling() {
        let queue = WorkerPoolQueue::new(1);
        queue.register("slow", sleep_handler(200));

        let task_id = queue
            .send_task("slow", vec![], JsonMap::new())
            .await
            .unwrap();
        let err = queue
            .get_result(&task_id, Some(Duration::from_millis(20)))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Timeout(_)));

        // The task keeps running and completes after the timeout.
        let result = queue.get_result(&task_id, None).await.unwrap();
        assert_eq!(result, json!("done"));
    }

    #[tokio::test]
    async fn revoke_prevents_queued_task_from_starting() {
        // One worker, so the second task is guaranteed still queued.
        let queue = WorkerPoolQueue::new(1);
        queue.register("slow", sleep_handler(200));
        queue.register("add", add_handler());

        let first = queue
            .send_task("slow", vec![], JsonMap::new())
            .await
            .unwrap();
        let second = queue
            .send_task("add", vec![json!(1), json!(1)], JsonMap::new())
            .await
            .unwrap();

        queue.revoke(&second).await.unwrap();

        let err = queue
            .get_result(&second, Some(Duration::from_secs(2)))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Revoked(_)));

        // The running task is unaffected.
        let result = queue
            .get_result(&first, Some(Duration::from_secs(2)))
            .await
            .unwrap();
        assert_eq!(result, json!("done"));
    }

    #[tokio::test]
    async fn revoked_state_is_final_after_the_queue_drains() {
        let queue = WorkerPoolQueue::new(1);
        queue.register("slow", sleep_handler(100));
        queue.register("add", add_handler());

        let first = queue
            .send_task("slow", vec![], JsonMap::new())
            .await
            .unwrap();
        let second = queue
            .send_task("add", vec![json!(1), json!(1)], JsonMap::new())
            .await
            .unwrap();
        queue.revoke(&second).await.unwrap();

        // Let the worker finish the first task and pass over the second.
        queue
            .get_result(&first, Some(Duration::from_secs(2)))
            .await
            .unwrap();

        // The revoked state never flips to a run result.
        for _ in 0..2 {
            let err = queue
                .get_result(&second, Some(Duration::from_millis(100)))
                .await
                .unwrap_err();
            assert!(matches!(err, StoreError::Revoked(_)));
        }
    }

    #[tokio::test]
    async fn revoking_a_started_task_is_ignored() {
        let queue = WorkerPoolQueue::new(1);
        queue.register("slow", sleep_handler(100));

        let task_id = queue
            .send_task("slow", vec![], JsonMap::new())
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        queue.revoke(&task_id).await.unwrap();
        let result = queue
            .get_result(&task_id, Some(Duration::from_secs(2)))
            .await
            .unwrap();
        assert_eq!(result, json!("done"));
    }

    #[tokio::test]
    async fn fifo_start_order_across_the_pool() {
        let queue = WorkerPoolQueue::new(1);
        let order: Arc<StdMutex<Vec<i64>>> = Arc::new(StdMutex::new(Vec::new()));
        let seen = order.clone();
        queue.register(
            "record",
            task_handler(move |inv: TaskInvocation| {
                let seen = seen.clone();
                async move {
                    seen.lock().unwrap().push(inv.args[0].as_i64().unwrap());
                    Ok(json!(null))
                }
            }),
        );

        let mut ids = Vec::new();
        for i in 0..5 {
            ids.push(
                queue
                    .send_task("record", vec![json!(i)], JsonMap::new())
                    .await
                    .unwrap(),
            );
        }
        for id in &ids {
            queue
                .get_result(id, Some(Duration::from_secs(2)))
                .await
                .unwrap();
        }
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn close_drains_in_flight_work_and_rejects_new() {
        let queue = WorkerPoolQueue::new(2);
        queue.register("add", add_handler());

        let task_id = queue
            .send_task("add", vec![json!(20), json!(22)], JsonMap::new())
            .await
            .unwrap();
        queue.close().await.unwrap();

        let err = queue
            .send_task("add", vec![json!(1), json!(1)], JsonMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Closed));

        // Work accepted before close still completed.
        let result = queue.get_result(&task_id, None).await.unwrap();
        assert_eq!(result, json!(42));
    }

    #[tokio::test]
    async fn get_result_for_unknown_id_is_not_found() {
        let queue = WorkerPoolQueue::new(1);
        let err = queue
            .get_result("never-sent", Some(Duration::from_millis(10)))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }
}
