//! Distributed adapters backed by Redis (feature = "distributed").
//!
//! Thin shims that make an external cache/broker conform to the same
//! three protocols as the in-memory reference adapters. Connections are
//! established lazily through an idempotent `ensure_connected` guard, so
//! constructing an adapter never touches the network. Transient network
//! failures are surfaced, not retried — retry policy belongs to the
//! backend, not this layer.

use std::collections::HashMap;
use std::sync::{Arc, RwLock as StdRwLock};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use redis::AsyncCommands;
use redis::aio::MultiplexedConnection;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{StoreError, StoreResult};
use crate::kv::KeyValueStore;
use crate::pubsub::{PubSub, Subscription};
use crate::queue::{TaskHandler, TaskInvocation, TaskQueue};
use praxis_core::JsonMap;

/// Default key namespace shared by the distributed adapters.
pub const DEFAULT_NAMESPACE: &str = "praxis";

/// How long broker task results stay readable, in seconds.
const RESULT_TTL_SECS: u64 = 3600;

/// Poll interval while waiting on a broker result.
const RESULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Blocking-pop timeout for broker workers, so they notice shutdown.
const WORKER_POP_TIMEOUT_SECS: f64 = 1.0;

fn backend_err(e: impl std::fmt::Display) -> StoreError {
    StoreError::Backend(e.to_string())
}

/// Lazily-established shared connection: every operation goes through
/// `ensure_connected`, which connects exactly once.
struct ConnectionGuard {
    client: redis::Client,
    conn: Mutex<Option<MultiplexedConnection>>,
}

impl ConnectionGuard {
    fn new(url: &str) -> StoreResult<Self> {
        let client = redis::Client::open(url).map_err(backend_err)?;
        Ok(Self {
            client,
            conn: Mutex::new(None),
        })
    }

    async fn ensure_connected(&self) -> StoreResult<MultiplexedConnection> {
        let mut guard = self.conn.lock().await;
        if let Some(conn) = guard.as_ref() {
            return Ok(conn.clone());
        }
        let conn = self
            .client
            .get_multiplexed_tokio_connection()
            .await
            .map_err(backend_err)?;
        debug!("connected to redis");
        *guard = Some(conn.clone());
        Ok(conn)
    }
}

// ── Key-value ──────────────────────────────────────────────────────

/// Redis-backed `KeyValueStore`. TTL maps to native key expiry.
pub struct RedisKvStore {
    guard: ConnectionGuard,
}

impl RedisKvStore {
    pub fn new(url: &str) -> StoreResult<Self> {
        Ok(Self {
            guard: ConnectionGuard::new(url)?,
        })
    }
}

#[async_trait]
impl KeyValueStore for RedisKvStore {
    async fn get(&self, key: &str) -> StoreResult<Option<Value>> {
        let mut conn = self.guard.ensure_connected().await?;
        let raw: Option<String> = conn.get(key).await.map_err(backend_err)?;
        match raw {
            Some(payload) => Ok(Some(
                serde_json::from_str(&payload).map_err(|e| StoreError::Deserialize(e.to_string()))?,
            )),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: Value, ttl: Option<Duration>) -> StoreResult<()> {
        let payload =
            serde_json::to_string(&value).map_err(|e| StoreError::Serialize(e.to_string()))?;
        let mut conn = self.guard.ensure_connected().await?;
        match ttl {
            Some(ttl) => {
                let secs = ttl.as_secs().max(1);
                let _: () = conn.set_ex(key, payload, secs).await.map_err(backend_err)?;
            }
            None => {
                let _: () = conn.set(key, payload).await.map_err(backend_err)?;
            }
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        let mut conn = self.guard.ensure_connected().await?;
        let removed: i64 = conn.del(key).await.map_err(backend_err)?;
        Ok(removed > 0)
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        let mut conn = self.guard.ensure_connected().await?;
        let exists: bool = conn.exists(key).await.map_err(backend_err)?;
        Ok(exists)
    }

    async fn keys(&self, pattern: &str) -> StoreResult<Vec<String>> {
        let mut conn = self.guard.ensure_connected().await?;
        let keys: Vec<String> = conn.keys(pattern).await.map_err(backend_err)?;
        Ok(keys)
    }

    async fn close(&self) -> StoreResult<()> {
        self.guard.conn.lock().await.take();
        Ok(())
    }
}

// ── Pub/sub ────────────────────────────────────────────────────────

/// Redis-backed `PubSub`. Each subscription owns a dedicated pubsub
/// connection drained by a forwarder task.
pub struct RedisPubSub {
    guard: ConnectionGuard,
}

impl RedisPubSub {
    pub fn new(url: &str) -> StoreResult<Self> {
        Ok(Self {
            guard: ConnectionGuard::new(url)?,
        })
    }
}

#[async_trait]
impl PubSub for RedisPubSub {
    async fn publish(&self, channel: &str, message: Value) -> StoreResult<usize> {
        let payload =
            serde_json::to_string(&message).map_err(|e| StoreError::Serialize(e.to_string()))?;
        let mut conn = self.guard.ensure_connected().await?;
        let delivered: i64 = conn.publish(channel, payload).await.map_err(backend_err)?;
        Ok(delivered.max(0) as usize)
    }

    async fn subscribe(&self, channel: &str) -> StoreResult<Subscription> {
        let mut pubsub = self
            .guard
            .client
            .get_async_pubsub()
            .await
            .map_err(backend_err)?;
        pubsub.subscribe(channel).await.map_err(backend_err)?;

        let (feed, subscription) = Subscription::pair();
        tokio::spawn(async move {
            let mut stream = pubsub.into_on_message();
            loop {
                tokio::select! {
                    _ = feed.cancel.notified() => break,
                    msg = stream.next() => match msg {
                        Some(msg) => {
                            let payload: String = match msg.get_payload() {
                                Ok(payload) => payload,
                                Err(error) => {
                                    warn!(%error, "dropping undecodable message");
                                    continue;
                                }
                            };
                            let value = serde_json::from_str(&payload)
                                .unwrap_or(Value::String(payload));
                            if feed.messages.send(value).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    },
                }
            }
        });

        Ok(subscription)
    }

    async fn close(&self) -> StoreResult<()> {
        self.guard.conn.lock().await.take();
        Ok(())
    }
}

// ── Task queue ─────────────────────────────────────────────────────

/// Wire envelope for one broker task.
#[derive(Debug, Serialize, Deserialize)]
struct TaskEnvelope {
    task_id: String,
    name: String,
    args: Vec<Value>,
    kwargs: JsonMap,
}

/// Terminal result document stored under the result key.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
enum ResultDoc {
    Success { value: Value },
    Failure { error: String },
    Revoked,
}

/// Redis-list-backed `TaskQueue`.
///
/// `send_task` LPUSHes an envelope onto the queue key; local worker
/// loops BRPOP envelopes and run registered handlers, storing the
/// terminal result under `{ns}:result:{task_id}` with an advisory TTL.
/// Any process sharing the namespace and registrations can consume the
/// same queue, which is what makes the broker distributed.
pub struct RedisBrokerQueue {
    guard: Arc<ConnectionGuard>,
    namespace: String,
    handlers: Arc<StdRwLock<HashMap<String, TaskHandler>>>,
    shutdown_tx: watch::Sender<bool>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl RedisBrokerQueue {
    /// Connect lazily to `url` and spawn `workers` consumer loops.
    pub fn new(url: &str, namespace: Option<&str>, workers: usize) -> StoreResult<Self> {
        let namespace = namespace.unwrap_or(DEFAULT_NAMESPACE).to_string();
        let guard = Arc::new(ConnectionGuard::new(url)?);
        let handlers: Arc<StdRwLock<HashMap<String, TaskHandler>>> =
            Arc::new(StdRwLock::new(HashMap::new()));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handles = (0..workers.max(1))
            .map(|worker| {
                tokio::spawn(broker_worker_loop(
                    worker,
                    guard.client.clone(),
                    namespace.clone(),
                    handlers.clone(),
                    shutdown_rx.clone(),
                ))
            })
            .collect();

        info!(workers, namespace = %namespace, "broker queue started");
        Ok(Self {
            guard,
            namespace,
            handlers,
            shutdown_tx,
            workers: Mutex::new(handles),
        })
    }

    fn queue_key(&self) -> String {
        format!("{}:queue", self.namespace)
    }

    fn result_key(&self, task_id: &str) -> String {
        format!("{}:result:{task_id}", self.namespace)
    }

    fn revoked_key(&self) -> String {
        format!("{}:revoked", self.namespace)
    }
}

#[async_trait]
impl TaskQueue for RedisBrokerQueue {
    fn register(&self, name: &str, handler: TaskHandler) {
        self.handlers
            .write()
            .unwrap()
            .insert(name.to_string(), handler);
        debug!(task = name, "broker task registered");
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

        let envelope = TaskEnvelope {
            task_id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            args,
            kwargs,
        };
        let payload =
            serde_json::to_string(&envelope).map_err(|e| StoreError::Serialize(e.to_string()))?;

        let mut conn = self.guard.ensure_connected().await?;
        let _: i64 = conn
            .lpush(self.queue_key(), payload)
            .await
            .map_err(backend_err)?;

        debug!(task_id = %envelope.task_id, task = name, "task queued on broker");
        Ok(envelope.task_id)
    }

    async fn get_result(&self, task_id: &str, timeout: Option<Duration>) -> StoreResult<Value> {
        let result_key = self.result_key(task_id);
        let guard = self.guard.clone();

        let wait = async move {
            loop {
                let mut conn = guard.ensure_connected().await?;
                let raw: Option<String> = conn.get(&result_key).await.map_err(backend_err)?;
                if let Some(payload) = raw {
                    let doc: ResultDoc = serde_json::from_str(&payload)
                        .map_err(|e| StoreError::Deserialize(e.to_string()))?;
                    return Ok::<ResultDoc, StoreError>(doc);
                }
                tokio::time::sleep(RESULT_POLL_INTERVAL).await;
            }
        };

        let doc = match timeout {
            Some(limit) => tokio::time::timeout(limit, wait)
                .await
                .map_err(|_| StoreError::Timeout(task_id.to_string()))??,
            None => wait.await?,
        };

        match doc {
            ResultDoc::Success { value } => Ok(value),
            ResultDoc::Failure { error } => Err(StoreError::TaskFailed(error)),
            ResultDoc::Revoked => Err(StoreError::Revoked(task_id.to_string())),
        }
    }

    async fn revoke(&self, task_id: &str) -> StoreResult<()> {
        let mut conn = self.guard.ensure_connected().await?;
        let _: i64 = conn
            .sadd(self.revoked_key(), task_id)
            .await
            .map_err(backend_err)?;
        debug!(%task_id, "task marked revoked on broker");
        Ok(())
    }

    async fn close(&self) -> StoreResult<()> {
        let _ = self.shutdown_tx.send(true);
        let handles: Vec<JoinHandle<()>> = self.workers.lock().await.drain(..).collect();
        for handle in handles {
            let _ = handle.await;
        }
        info!("broker queue closed");
        Ok(())
    }
}

/// One broker worker: BRPOP envelopes, skip revoked tasks, execute the
/// registered handler, store the terminal result document.
async fn broker_worker_loop(
    worker: usize,
    client: redis::Client,
    namespace: String,
    handlers: Arc<StdRwLock<HashMap<String, TaskHandler>>>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut conn = match client.get_multiplexed_tokio_connection().await {
        Ok(conn) => conn,
        Err(error) => {
            error!(worker, %error, "broker worker failed to connect");
            return;
        }
    };
    let queue_key = format!("{namespace}:queue");
    let revoked_key = format!("{namespace}:revoked");

    loop {
        if *shutdown.borrow() {
            break;
        }

        let popped = tokio::select! {
            item = conn.brpop::<_, Option<(String, String)>>(&queue_key, WORKER_POP_TIMEOUT_SECS) => item,
            _ = shutdown.changed() => break,
        };

        let envelope = match popped {
            Ok(Some((_, payload))) => match serde_json::from_str::<TaskEnvelope>(&payload) {
                Ok(envelope) => envelope,
                Err(error) => {
                    warn!(worker, %error, "dropping undecodable task envelope");
                    continue;
                }
            },
            Ok(None) => continue,
            Err(error) => {
                error!(worker, %error, "broker pop failed, worker exiting");
                break;
            }
        };

        let result_key = format!("{namespace}:result:{}", envelope.task_id);

        let revoked: bool = conn
            .sismember(&revoked_key, &envelope.task_id)
            .await
            .unwrap_or(false);
        if revoked {
            let doc = serde_json::to_string(&ResultDoc::Revoked).unwrap_or_default();
            let _: Result<(), _> = conn.set_ex(&result_key, doc, RESULT_TTL_SECS).await;
            debug!(worker, task_id = %envelope.task_id, "skipping revoked task");
            continue;
        }

        let handler = handlers.read().unwrap().get(&envelope.name).cloned();
        let doc = match handler {
            Some(handler) => {
                let invocation = TaskInvocation::new(envelope.args, envelope.kwargs);
                match handler(invocation).await {
                    Ok(value) => ResultDoc::Success { value },
                    Err(error) => ResultDoc::Failure {
                        error: format!("{error:#}"),
                    },
                }
            }
            None => ResultDoc::Failure {
                error: format!("no handler for task {:?}", envelope.name),
            },
        };

        let payload = serde_json::to_string(&doc).unwrap_or_default();
        if let Err(error) = conn
            .set_ex::<_, _, ()>(&result_key, payload, RESULT_TTL_SECS)
            .await
        {
            error!(worker, task_id = %envelope.task_id, %error, "failed to store task result");
        }
    }
    debug!(worker, "broker worker exited");
}
