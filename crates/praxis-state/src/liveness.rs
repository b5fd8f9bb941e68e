//! Instrument connection liveness beacon.
//!
//! A connected hardware instance advertises itself with a key under
//! `"{prefix}:{machine_id}"` carrying an advisory TTL: if the process
//! dies, the key expires and the connection reads as gone. A background
//! task refreshes the key well inside the TTL window.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::StateResult;
use praxis_store::KeyValueStore;

/// Default storage key prefix for connection liveness.
pub const DEFAULT_PREFIX: &str = "praxis_conn";

/// Default advisory TTL on the liveness key.
pub const DEFAULT_TTL: Duration = Duration::from_secs(120);

/// A TTL-refreshed liveness key for one connected instrument.
pub struct ConnectionBeacon {
    store: Arc<dyn KeyValueStore>,
    key: String,
    shutdown_tx: watch::Sender<bool>,
    refresher: JoinHandle<()>,
}

impl ConnectionBeacon {
    /// Register the connection and start refreshing its key.
    pub async fn start(
        store: Arc<dyn KeyValueStore>,
        machine_id: &str,
        details: Value,
    ) -> StateResult<Self> {
        Self::start_with(store, machine_id, details, DEFAULT_PREFIX, DEFAULT_TTL).await
    }

    /// Register with an explicit prefix and TTL.
    pub async fn start_with(
        store: Arc<dyn KeyValueStore>,
        machine_id: &str,
        details: Value,
        prefix: &str,
        ttl: Duration,
    ) -> StateResult<Self> {
        let key = format!("{prefix}:{machine_id}");
        store.set(&key, details.clone(), Some(ttl)).await?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let refresher = tokio::spawn(refresh_loop(
            store.clone(),
            key.clone(),
            details,
            ttl,
            shutdown_rx,
        ));

        info!(%machine_id, ttl_secs = ttl.as_secs(), "connection beacon started");
        Ok(Self {
            store,
            key,
            shutdown_tx,
            refresher,
        })
    }

    /// Storage key the beacon refreshes.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Stop refreshing and remove the liveness key.
    pub async fn stop(self) -> StateResult<()> {
        let _ = self.shutdown_tx.send(true);
        let _ = self.refresher.await;
        self.store.delete(&self.key).await?;
        debug!(key = %self.key, "connection beacon stopped");
        Ok(())
    }

    /// Whether a machine currently reads as connected.
    pub async fn is_alive(store: &Arc<dyn KeyValueStore>, machine_id: &str) -> StateResult<bool> {
        let key = format!("{DEFAULT_PREFIX}:{machine_id}");
        Ok(store.exists(&key).await?)
    }
}

/// Re-set the key every ttl/3 so it never expires while we live.
async fn refresh_loop(
    store: Arc<dyn KeyValueStore>,
    key: String,
    details: Value,
    ttl: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let interval = ttl / 3;
    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {
                if let Err(error) = store.set(&key, details.clone(), Some(ttl)).await {
                    warn!(%key, %error, "liveness refresh failed");
                }
            }
            _ = shutdown.changed() => break,
        }
    }
}
