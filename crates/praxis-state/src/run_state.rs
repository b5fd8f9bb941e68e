//! Per-run persisted key→value mapping.
//!
//! Backed by a single JSON object under `"{prefix}:{run_id}"` in the
//! key-value store. The in-memory mirror is authoritative for reads;
//! every mutation persists the whole mirror before returning, so there is
//! no partial persistence to observe after a crash.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{StateError, StateResult};
use praxis_store::KeyValueStore;

/// Default storage key prefix for run state blobs.
pub const DEFAULT_PREFIX: &str = "praxis_state";

/// Dictionary-like state for one protocol run.
pub struct RunState {
    store: Arc<dyn KeyValueStore>,
    run_id: String,
    key: String,
    mirror: serde_json::Map<String, Value>,
}

impl RunState {
    /// Load (or initialize) state for a run under the default prefix.
    ///
    /// A missing `run_id` gets a generated one. An absent, malformed, or
    /// non-object stored value initializes an empty mapping — a cold
    /// start never fails.
    pub async fn load(store: Arc<dyn KeyValueStore>, run_id: Option<String>) -> Self {
        Self::load_with_prefix(store, run_id, DEFAULT_PREFIX).await
    }

    /// Load with an explicit key prefix.
    pub async fn load_with_prefix(
        store: Arc<dyn KeyValueStore>,
        run_id: Option<String>,
        prefix: &str,
    ) -> Self {
        let run_id = run_id.unwrap_or_else(|| Uuid::new_v4().to_string());
        let key = format!("{prefix}:{run_id}");

        let mirror = match store.get(&key).await {
            Ok(Some(Value::Object(map))) => {
                debug!(%run_id, entries = map.len(), "run state loaded");
                map
            }
            Ok(Some(_)) => {
                warn!(%run_id, "stored run state is not an object, starting empty");
                serde_json::Map::new()
            }
            Ok(None) => serde_json::Map::new(),
            Err(error) => {
                warn!(%run_id, %error, "failed to load run state, starting empty");
                serde_json::Map::new()
            }
        };

        Self {
            store,
            run_id,
            key,
            mirror,
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Storage key this state persists under.
    pub fn storage_key(&self) -> &str {
        &self.key
    }

    // ── Reads (mirror only, no store round-trip) ───────────────────

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.mirror.get(key)
    }

    /// Read with a default; never fails.
    pub fn get_or<'a>(&'a self, key: &str, default: &'a Value) -> &'a Value {
        self.mirror.get(key).unwrap_or(default)
    }

    /// Indexed read: absent keys are an error.
    pub fn require(&self, key: &str) -> StateResult<&Value> {
        self.mirror
            .get(key)
            .ok_or_else(|| StateError::NotFound(key.to_string()))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.mirror.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.mirror.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mirror.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.mirror.keys()
    }

    /// A copy of the full mapping.
    pub fn snapshot(&self) -> serde_json::Map<String, Value> {
        self.mirror.clone()
    }

    // ── Mutations (mirror first, then persist the whole blob) ──────

    pub async fn set(&mut self, key: &str, value: Value) -> StateResult<()> {
        self.mirror.insert(key.to_string(), value);
        self.persist().await
    }

    /// Merge a mapping of entries, persisting once.
    pub async fn update(&mut self, entries: serde_json::Map<String, Value>) -> StateResult<()> {
        self.mirror.extend(entries);
        self.persist().await
    }

    /// Remove a key, returning its previous value. Removing an absent
    /// key is a not-found error.
    pub async fn remove(&mut self, key: &str) -> StateResult<Value> {
        let previous = self
            .mirror
            .remove(key)
            .ok_or_else(|| StateError::NotFound(key.to_string()))?;
        self.persist().await?;
        Ok(previous)
    }

    /// Empty the mapping and delete the stored blob.
    pub async fn clear(&mut self) -> StateResult<()> {
        self.mirror.clear();
        self.store.delete(&self.key).await?;
        Ok(())
    }

    async fn persist(&self) -> StateResult<()> {
        self.store
            .set(&self.key, Value::Object(self.mirror.clone()), None)
            .await?;
        Ok(())
    }
}
