//! Run-record registry — the persistence collaborator.
//!
//! The scheduler treats protocol/run metadata as opaque records owned by
//! an external persistence layer; this trait is the slice of it that
//! orchestration actually consumes (protocol lookup, run-status updates).

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::{StoreError, StoreResult};
use praxis_core::{ProtocolDefinition, RunRecord, RunStatus};

/// Read/write access to protocol definitions and run records.
#[async_trait]
pub trait RunRegistry: Send + Sync {
    /// Look up a protocol definition by name.
    async fn protocol(&self, name: &str) -> StoreResult<Option<ProtocolDefinition>>;

    /// Insert or replace a protocol definition.
    async fn put_protocol(&self, definition: ProtocolDefinition) -> StoreResult<()>;

    /// Look up a run record by id.
    async fn run(&self, run_id: &str) -> StoreResult<Option<RunRecord>>;

    /// Insert or replace a run record.
    async fn put_run(&self, record: RunRecord) -> StoreResult<()>;

    /// Persist a status transition on an existing run record.
    async fn update_run_status(&self, run_id: &str, status: RunStatus) -> StoreResult<()>;
}

/// In-process reference registry.
#[derive(Default)]
pub struct MemoryRunRegistry {
    protocols: RwLock<HashMap<String, ProtocolDefinition>>,
    runs: RwLock<HashMap<String, RunRecord>>,
}

impl MemoryRunRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RunRegistry for MemoryRunRegistry {
    async fn protocol(&self, name: &str) -> StoreResult<Option<ProtocolDefinition>> {
        Ok(self.protocols.read().await.get(name).cloned())
    }

    async fn put_protocol(&self, definition: ProtocolDefinition) -> StoreResult<()> {
        self.protocols
            .write()
            .await
            .insert(definition.name.clone(), definition);
        Ok(())
    }

    async fn run(&self, run_id: &str) -> StoreResult<Option<RunRecord>> {
        Ok(self.runs.read().await.get(run_id).cloned())
    }

    async fn put_run(&self, record: RunRecord) -> StoreResult<()> {
        self.runs
            .write()
            .await
            .insert(record.run_id.clone(), record);
        Ok(())
    }

    async fn update_run_status(&self, run_id: &str, status: RunStatus) -> StoreResult<()> {
        let mut runs = self.runs.write().await;
        let record = runs
            .get_mut(run_id)
            .ok_or_else(|| StoreError::NotFound(format!("run {run_id}")))?;
        record.status = status;
        debug!(%run_id, status = status.label(), "run status updated");
        Ok(())
    }
}
