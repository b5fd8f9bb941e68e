//! KeyValueStore protocol.
//!
//! Every backend stores JSON values under string keys with advisory TTL:
//! once a key's TTL elapses it must behave as absent on all read paths
//! (`get`, `exists`, `keys`), whether or not a sweep has physically
//! removed it yet.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::StoreResult;

/// Minimal key-value capability every backend must satisfy.
///
/// Reads and writes are race-free with respect to a single key: a reader
/// never observes a partial write.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Fetch a value, or `None` if the key is absent or expired.
    async fn get(&self, key: &str) -> StoreResult<Option<Value>>;

    /// Store a JSON value, optionally expiring after `ttl`.
    async fn set(&self, key: &str, value: Value, ttl: Option<Duration>) -> StoreResult<()>;

    /// Remove a key. Returns whether a live entry existed.
    async fn delete(&self, key: &str) -> StoreResult<bool>;

    /// Whether a live (non-expired) entry exists.
    async fn exists(&self, key: &str) -> StoreResult<bool>;

    /// List live keys matching a shell-glob pattern (`*` any run of
    /// characters, `?` exactly one).
    async fn keys(&self, pattern: &str) -> StoreResult<Vec<String>>;

    /// Release resources (background sweepers, connections).
    async fn close(&self) -> StoreResult<()>;
}
