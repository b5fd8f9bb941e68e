//! TaskQueue protocol.
//!
//! A task is a registered name plus positional args and keyword args,
//! executed somewhere (a local worker pool, or a distributed broker's
//! workers) with the result retrievable by task id. Whether a task body
//! suspends internally is the body's business, not the queue's.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::StoreResult;
use praxis_core::JsonMap;

/// Future returned by a task handler.
pub type TaskFuture = Pin<Box<dyn Future<Output = anyhow::Result<Value>> + Send>>;

/// A registered unit of work: async closure over its invocation.
pub type TaskHandler = Arc<dyn Fn(TaskInvocation) -> TaskFuture + Send + Sync>;

/// Arguments for one task execution.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskInvocation {
    pub args: Vec<Value>,
    pub kwargs: JsonMap,
}

impl TaskInvocation {
    pub fn new(args: Vec<Value>, kwargs: JsonMap) -> Self {
        Self { args, kwargs }
    }
}

/// Task dispatch and result retrieval capability.
#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Register a task handler under `name`. Dispatch of unregistered
    /// names fails immediately.
    fn register(&self, name: &str, handler: TaskHandler);

    /// Submit a task for execution, returning its task id.
    async fn send_task(
        &self,
        name: &str,
        args: Vec<Value>,
        kwargs: JsonMap,
    ) -> StoreResult<String>;

    /// Wait for a task's result.
    ///
    /// Suspends until the task reaches a terminal state or `timeout`
    /// elapses (`StoreError::Timeout`, which does not cancel the task).
    /// A failed task's error content is re-raised verbatim.
    async fn get_result(&self, task_id: &str, timeout: Option<Duration>) -> StoreResult<Value>;

    /// Best-effort revocation: a queued task must not start; a task
    /// already executing is not interrupted.
    async fn revoke(&self, task_id: &str) -> StoreResult<()>;

    /// Stop accepting new work and wait for in-flight tasks to finish.
    async fn close(&self) -> StoreResult<()>;
}

/// Wrap an async closure as a [`TaskHandler`].
///
/// ```ignore
/// queue.register("add", task_handler(|inv| async move { ... }));
/// ```
pub fn task_handler<F, Fut>(f: F) -> TaskHandler
where
    F: Fn(TaskInvocation) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
{
    Arc::new(move |inv| Box::pin(f(inv)))
}
