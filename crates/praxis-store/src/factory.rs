//! Backend factory — the single decision point on backend identity.
//!
//! Given a `StoreConfig`, constructs the concrete adapter for each
//! protocol. Callers receive trait objects and never branch on backend
//! type themselves; unsupported backend/operation combinations fail here
//! with a descriptive configuration error instead of constructing a
//! partially-working adapter.

use std::sync::Arc;

use praxis_core::{BackendKind, StoreConfig};

use crate::embedded::EmbeddedKvStore;
use crate::error::{StoreError, StoreResult};
use crate::kv::KeyValueStore;
use crate::memory::{MemoryKvStore, MemoryPubSub, WorkerPoolQueue};
use crate::pubsub::PubSub;
use crate::queue::TaskQueue;
use crate::registry::{MemoryRunRegistry, RunRegistry};

/// Construct the key-value store for the configured backend.
///
/// Supported: in-memory, file-embedded, distributed-cache.
pub fn create_key_value_store(config: &StoreConfig) -> StoreResult<Arc<dyn KeyValueStore>> {
    match config.backend {
        BackendKind::InMemory => Ok(Arc::new(MemoryKvStore::new())),
        BackendKind::FileEmbedded => {
            let path = config.path.as_ref().ok_or_else(|| {
                StoreError::Config("file-embedded backend requires `path`".to_string())
            })?;
            Ok(Arc::new(EmbeddedKvStore::open(path)?))
        }
        BackendKind::DistributedCache => redis_kv(config),
        BackendKind::DistributedBroker => Err(StoreError::Config(
            "distributed-broker provides a task queue, not a key-value store".to_string(),
        )),
    }
}

/// Construct the pub/sub backend.
///
/// Supported: in-memory, distributed-cache.
pub fn create_pubsub(config: &StoreConfig) -> StoreResult<Arc<dyn PubSub>> {
    match config.backend {
        BackendKind::InMemory => Ok(Arc::new(MemoryPubSub::new())),
        BackendKind::DistributedCache => redis_pubsub(config),
        other => Err(StoreError::Config(format!(
            "backend {other} does not support pub/sub"
        ))),
    }
}

/// Construct the task queue.
///
/// Supported: in-memory (worker pool), distributed-broker.
pub fn create_task_queue(config: &StoreConfig) -> StoreResult<Arc<dyn TaskQueue>> {
    match config.backend {
        BackendKind::InMemory => Ok(Arc::new(WorkerPoolQueue::new(config.workers))),
        BackendKind::DistributedBroker => redis_broker(config),
        other => Err(StoreError::Config(format!(
            "backend {other} does not support task dispatch"
        ))),
    }
}

/// Construct the run-record registry (the persistence collaborator).
///
/// Supported: in-memory.
pub fn create_run_registry(config: &StoreConfig) -> StoreResult<Arc<dyn RunRegistry>> {
    match config.backend {
        BackendKind::InMemory => Ok(Arc::new(MemoryRunRegistry::new())),
        other => Err(StoreError::Config(format!(
            "backend {other} does not provide a run registry"
        ))),
    }
}

#[cfg(feature = "distributed")]
fn require_url(config: &StoreConfig) -> StoreResult<&str> {
    config.url.as_deref().ok_or_else(|| {
        StoreError::Config(format!("backend {} requires `url`", config.backend))
    })
}

#[cfg(feature = "distributed")]
fn redis_kv(config: &StoreConfig) -> StoreResult<Arc<dyn KeyValueStore>> {
    Ok(Arc::new(crate::distributed::RedisKvStore::new(
        require_url(config)?,
    )?))
}

#[cfg(feature = "distributed")]
fn redis_pubsub(config: &StoreConfig) -> StoreResult<Arc<dyn PubSub>> {
    Ok(Arc::new(crate::distributed::RedisPubSub::new(
        require_url(config)?,
    )?))
}

#[cfg(feature = "distributed")]
fn redis_broker(config: &StoreConfig) -> StoreResult<Arc<dyn TaskQueue>> {
    Ok(Arc::new(crate::distributed::RedisBrokerQueue::new(
        require_url(config)?,
        config.namespace.as_deref(),
        config.workers,
    )?))
}

#[cfg(not(feature = "distributed"))]
fn redis_kv(_config: &StoreConfig) -> StoreResult<Arc<dyn KeyValueStore>> {
    Err(distributed_disabled())
}

#[cfg(not(feature = "distributed"))]
fn redis_pubsub(_config: &StoreConfig) -> StoreResult<Arc<dyn PubSub>> {
    Err(distributed_disabled())
}

#[cfg(not(feature = "distributed"))]
fn redis_broker(_config: &StoreConfig) -> StoreResult<Arc<dyn TaskQueue>> {
    Err(distributed_disabled())
}

#[cfg(not(feature = "distributed"))]
fn distributed_disabled() -> StoreError {
    StoreError::Config(
        "distributed backends require the `distributed` cargo feature".to_string(),
    )
}
