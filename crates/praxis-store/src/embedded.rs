//! File-embedded key-value store backed by redb.
//!
//! Values are JSON-serialized into redb's `&[u8]` value column together
//! with an optional expiry timestamp. Expired rows are evicted lazily:
//! any read that touches one treats it as absent, and write transactions
//! clean them up as they are encountered.

use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::kv::KeyValueStore;

/// Key-value entries keyed by the caller's string key.
const ENTRIES: TableDefinition<&str, &[u8]> = TableDefinition::new("kv_entries");

/// Convert any `Display` error into a `StoreError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StoreError::$variant(e.to_string())
    };
}

/// On-disk representation of one entry.
#[derive(Debug, Serialize, Deserialize)]
struct StoredEntry {
    value: Value,
    /// Unix timestamp (milliseconds) after which the entry is absent.
    expires_at_ms: Option<u64>,
}

impl StoredEntry {
    fn is_expired(&self) -> bool {
        self.expires_at_ms
            .is_some_and(|deadline| epoch_millis() >= deadline)
    }
}

/// `KeyValueStore` persisted in a single redb file.
pub struct EmbeddedKvStore {
    db: Database,
}

impl EmbeddedKvStore {
    /// Open (or create) a store at the given path.
    pub fn open(path: &Path) -> StoreResult<Self> {
        let db = Database::create(path).map_err(map_err!(Backend))?;
        let store = Self { db };
        store.ensure_table()?;
        debug!(?path, "embedded store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory store (for testing).
    pub fn open_in_memory() -> StoreResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Backend))?;
        let store = Self { db };
        store.ensure_table()?;
        Ok(store)
    }

    fn ensure_table(&self) -> StoreResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Backend))?;
        txn.open_table(ENTRIES).map_err(map_err!(Backend))?;
        txn.commit().map_err(map_err!(Backend))?;
        Ok(())
    }

    /// Read a live entry, evicting it when expired.
    fn read_live(&self, key: &str) -> StoreResult<Option<StoredEntry>> {
        let entry = {
            let txn = self.db.begin_read().map_err(map_err!(Backend))?;
            let table = txn.open_table(ENTRIES).map_err(map_err!(Backend))?;
            match table.get(key).map_err(map_err!(Backend))? {
                Some(guard) => Some(
                    serde_json::from_slice::<StoredEntry>(guard.value())
                        .map_err(map_err!(Deserialize))?,
                ),
                None => None,
            }
        };

        match entry {
            Some(entry) if entry.is_expired() => {
                self.evict_if_expired(key)?;
                Ok(None)
            }
            other => Ok(other),
        }
    }

    /// Delete a row only if it is still expired at delete time.
    ///
    /// The expiry decision is re-made inside the write transaction: a
    /// value written for the same key after the reader's check is not
    /// expired and survives the eviction.
    fn evict_if_expired(&self, key: &str) -> StoreResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Backend))?;
        {
            let mut table = txn.open_table(ENTRIES).map_err(map_err!(Backend))?;
            let expired = match table.get(key).map_err(map_err!(Backend))? {
                Some(guard) => serde_json::from_slice::<StoredEntry>(guard.value())
                    .map_err(map_err!(Deserialize))?
                    .is_expired(),
                None => false,
            };
            if expired {
                table.remove(key).map_err(map_err!(Backend))?;
            }
        }
        txn.commit().map_err(map_err!(Backend))?;
        Ok(())
    }

    fn remove(&self, key: &str) -> StoreResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Backend))?;
        let existed;
        {
            let mut table = txn.open_table(ENTRIES).map_err(map_err!(Backend))?;
            existed = table.remove(key).map_err(map_err!(Backend))?.is_some();
        }
        txn.commit().map_err(map_err!(Backend))?;
        Ok(existed)
    }
}

#[async_trait]
impl KeyValueStore for EmbeddedKvStore {
    async fn get(&self, key: &str) -> StoreResult<Option<Value>> {
        Ok(self.read_live(key)?.map(|entry| entry.value))
    }

    async fn set(&self, key: &str, value: Value, ttl: Option<Duration>) -> StoreResult<()> {
        let entry = StoredEntry {
            value,
            expires_at_ms: ttl.map(|d| epoch_millis() + d.as_millis() as u64),
        };
        let bytes = serde_json::to_vec(&entry).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Backend))?;
        {
            let mut table = txn.open_table(ENTRIES).map_err(map_err!(Backend))?;
            table
                .insert(key, bytes.as_slice())
                .map_err(map_err!(Backend))?;
        }
        txn.commit().map_err(map_err!(Backend))?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        // An expired entry counts as already absent.
        let live = self.read_live(key)?.is_some();
        let existed = self.remove(key)?;
        Ok(live && existed)
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        Ok(self.read_live(key)?.is_some())
    }

    async fn keys(&self, pattern: &str) -> StoreResult<Vec<String>> {
        let matcher = glob::Pattern::new(pattern).map_err(|e| StoreError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })?;

        let txn = self.db.begin_read().map_err(map_err!(Backend))?;
        let table = txn.open_table(ENTRIES).map_err(map_err!(Backend))?;
        let mut keys = Vec::new();
        for row in table.iter().map_err(map_err!(Backend))? {
            let (key, value) = row.map_err(map_err!(Backend))?;
            let entry: StoredEntry =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            if !entry.is_expired() && matcher.matches(key.value()) {
                keys.push(key.value().to_string());
            }
        }
        Ok(keys)
    }

    async fn close(&self) -> StoreResult<()> {
        // The database flushes on drop; nothing to release eagerly.
        Ok(())
    }
}

fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
