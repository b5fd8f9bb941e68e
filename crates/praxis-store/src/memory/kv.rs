//! In-memory key-value store with TTL support.
//!
//! Entries carry an optional expiry instant. Reads treat expired entries
//! as absent immediately; a background sweep physically removes them so
//! the map does not grow without bound. The sweep only ever deletes
//! entries whose deadline has passed, never values recently refreshed.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{Mutex, RwLock, watch};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::kv::KeyValueStore;

/// How often the background sweep evicts expired entries.
const SWEEP_INTERVAL: Duration = Duration::from_millis(250);

struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|deadline| Instant::now() >= deadline)
    }
}

/// In-process `KeyValueStore` backed by a `HashMap`.
///
/// Must be created inside a Tokio runtime (it spawns the sweep task).
pub struct MemoryKvStore {
    entries: Arc<RwLock<HashMap<String, Entry>>>,
    shutdown_tx: watch::Sender<bool>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        let entries: Arc<RwLock<HashMap<String, Entry>>> = Arc::new(RwLock::new(HashMap::new()));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let sweeper = tokio::spawn(sweep_loop(entries.clone(), shutdown_rx));
        Self {
            entries,
            shutdown_tx,
            sweeper: Mutex::new(Some(sweeper)),
        }
    }
}

impl Default for MemoryKvStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KeyValueStore for MemoryKvStore {
    async fn get(&self, key: &str) -> StoreResult<Option<Value>> {
        let entries = self.entries.read().await;
        match entries.get(key) {
            Some(entry) if !entry.is_expired() => Ok(Some(entry.value.clone())),
            _ => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: Value, ttl: Option<Duration>) -> StoreResult<()> {
        let entry = Entry {
            value,
            expires_at: ttl.map(|d| Instant::now() + d),
        };
        self.entries.write().await.insert(key.to_string(), entry);
        Ok(())
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        let mut entries = self.entries.write().await;
        match entries.remove(key) {
            Some(entry) => Ok(!entry.is_expired()),
            None => Ok(false),
        }
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        let entries = self.entries.read().await;
        Ok(entries.get(key).is_some_and(|e| !e.is_expired()))
    }

    async fn keys(&self, pattern: &str) -> StoreResult<Vec<String>> {
        let matcher =
            glob::Pattern::new(pattern).map_err(|e| StoreError::InvalidPattern {
                pattern: pattern.to_string(),
                reason: e.to_string(),
            })?;
        let entries = self.entries.read().await;
        Ok(entries
            .iter()
            .filter(|(key, entry)| !entry.is_expired() && matcher.matches(key))
            .map(|(key, _)| key.clone())
            .collect())
    }

    async fn close(&self) -> StoreResult<()> {
        let _ = self.shutdown_tx.send(true);
        if let Some(handle) = self.sweeper.lock().await.take() {
            let _ = handle.await;
        }
        Ok(())
    }
}

/// Periodically remove entries whose TTL deadline has passed.
async fn sweep_loop(
    entries: Arc<RwLock<HashMap<String, Entry>>>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = tokio::time::sleep(SWEEP_INTERVAL) => {
                let mut entries = entries.write().await;
                let before = entries.len();
                entries.retain(|_, entry| !entry.is_expired());
                let evicted = before - entries.len();
                if evicted > 0 {
                    debug!(evicted, "swept expired keys");
                }
            }
            _ = shutdown.changed() => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn set_and_get() {
        let store = MemoryKvStore::new();
        store.set("k", json!({"a": 1}), None).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(json!({"a": 1})));
        assert!(store.exists("k").await.unwrap());
    }

    #[tokio::test]
    async fn get_missing_returns_none() {
        let store = MemoryKvStore::new();
        assert_eq!(store.get("nope").await.unwrap(), None);
        assert!(!store.exists("nope").await.unwrap());
    }

    #[tokio::test]
    async fn delete_reports_existence() {
        let store = MemoryKvStore::new();
        store.set("k", json!(1), None).await.unwrap();
        assert!(store.delete("k").await.unwrap());
        assert!(!store.delete("k").await.unwrap());
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn ttl_expiry_hides_key_before_sweep() {
        let store = MemoryKvStore::new();
        store
            .set("k", json!("v"), Some(Duration::from_millis(30)))
            .await
            .unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(json!("v")));

        // Well past the TTL but shorter than the sweep interval, so the
        // entry is still physically present — it must read as absent.
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(store.get("k").await.unwrap(), None);
        assert!(!store.exists("k").await.unwrap());
        assert!(store.keys("*").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn overwrite_refreshes_ttl() {
        let store = MemoryKvStore::new();
        store
            .set("k", json!(1), Some(Duration::from_millis(30)))
            .await
            .unwrap();
        store.set("k", json!(2), None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(store.get("k").await.unwrap(), Some(json!(2)));
    }

    #[tokio::test]
    async fn keys_glob_matching() {
        let store = MemoryKvStore::new();
        store.set("user:1", json!(1), None).await.unwrap();
        store.set("user:2", json!(2), None).await.unwrap();
        store.set("other", json!(3), None).await.unwrap();

        let mut users = store.keys("user:*").await.unwrap();
        users.sort();
        assert_eq!(users, vec!["user:1", "user:2"]);

        assert_eq!(store.keys("*").await.unwrap().len(), 3);
        assert_eq!(store.keys("user:?").await.unwrap().len(), 2);
        assert!(store.keys("missing:*").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn invalid_pattern_is_an_error() {
        let store = MemoryKvStore::new();
        assert!(matches!(
            store.keys("[").await,
            Err(StoreError::InvalidPattern { .. })
        ));
    }

    #[tokio::test]
    async fn close_stops_the_sweeper() {
        let store = MemoryKvStore::new();
        store.set("k", json!(1), None).await.unwrap();
        store.close().await.unwrap();
        // Reads still work; only the background sweep is gone.
        assert_eq!(store.get("k").await.unwrap(), Some(json!(1)));
    }
}
