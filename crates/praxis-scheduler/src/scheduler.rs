//! Protocol run scheduler.
//!
//! Orchestrates one scheduling attempt end to end: resolve the protocol
//! definition, derive asset requirements, reserve every asset
//! all-or-nothing, persist the status transition, and dispatch the
//! execution task. Collaborators arrive through constructor injection,
//! so tests wire in in-memory backends and production wires in whatever
//! the factory built.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use praxis_core::{epoch_secs, JsonMap, RunRecord, RunStatus};
use praxis_store::{RunRegistry, TaskQueue};

use crate::error::{SchedulerError, SchedulerResult};
use crate::requirements::{analyze_protocol_requirements, AssetRequirement};
use crate::reservations::ReservationTable;

/// Task name every run dispatch is submitted under. The execution side
/// registers its handler under the same name.
pub const EXECUTE_TASK: &str = "execute_protocol_run";

// ── Lifecycle ──────────────────────────────────────────────────────

/// Scheduler-side lifecycle of one run, from queueing to retirement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunLifecycle {
    /// Assets reserved, dispatch not yet attempted.
    Queued,
    /// Execution task accepted by the queue backend.
    Dispatched,
    /// Execution reported as started.
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl RunLifecycle {
    pub fn label(&self) -> &'static str {
        match self {
            RunLifecycle::Queued => "QUEUED",
            RunLifecycle::Dispatched => "DISPATCHED",
            RunLifecycle::Running => "RUNNING",
            RunLifecycle::Completed => "COMPLETED",
            RunLifecycle::Failed => "FAILED",
            RunLifecycle::Cancelled => "CANCELLED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunLifecycle::Completed | RunLifecycle::Failed | RunLifecycle::Cancelled
        )
    }
}

// ── Schedule bookkeeping ───────────────────────────────────────────

/// Internal bookkeeping for one scheduled run.
#[derive(Debug, Clone)]
struct ScheduleEntry {
    run_id: String,
    protocol_name: String,
    requirements: Vec<AssetRequirement>,
    estimated_duration: Option<Duration>,
    priority: u32,
    lifecycle: RunLifecycle,
    /// Task id returned by the queue backend, once dispatched.
    task_handle: Option<String>,
    /// Unix timestamp (seconds) of the scheduling attempt.
    scheduled_at: u64,
    /// Monotonic tiebreaker for entries scheduled in the same second.
    seq: u64,
}

/// Point-in-time view of a scheduled run, safe to hand to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleStatus {
    pub run_id: String,
    pub protocol_name: String,
    pub lifecycle: RunLifecycle,
    pub task_handle: Option<String>,
    pub asset_count: usize,
    pub estimated_duration_secs: Option<u64>,
    pub priority: u32,
    pub scheduled_at: u64,
}

impl ScheduleEntry {
    fn status(&self) -> ScheduleStatus {
        ScheduleStatus {
            run_id: self.run_id.clone(),
            protocol_name: self.protocol_name.clone(),
            lifecycle: self.lifecycle,
            task_handle: self.task_handle.clone(),
            asset_count: self.requirements.len(),
            estimated_duration_secs: self.estimated_duration.map(|d| d.as_secs()),
            priority: self.priority,
            scheduled_at: self.scheduled_at,
        }
    }
}

// ── Scheduler ──────────────────────────────────────────────────────

/// Schedules protocol runs against exclusive assets.
pub struct ProtocolScheduler {
    registry: Arc<dyn RunRegistry>,
    queue: Arc<dyn TaskQueue>,
    reservations: ReservationTable,
    active: Mutex<HashMap<String, ScheduleEntry>>,
    seq: AtomicU64,
}

impl ProtocolScheduler {
    pub fn new(registry: Arc<dyn RunRegistry>, queue: Arc<dyn TaskQueue>) -> Self {
        Self {
            registry,
            queue,
            reservations: ReservationTable::new(),
            active: Mutex::new(HashMap::new()),
            seq: AtomicU64::new(0),
        }
    }

    /// Schedule one run for execution.
    ///
    /// Resolves the definition, reserves every required asset
    /// all-or-nothing, persists the `Scheduled` status, and dispatches
    /// the execution task with `(run_id, user_params, initial_state)`.
    /// Any failure after reservation releases every asset before the
    /// error propagates, so a failed attempt leaves no residue.
    pub async fn schedule_protocol_execution(
        &self,
        record: &RunRecord,
        user_params: JsonMap,
        initial_state: Option<Value>,
    ) -> SchedulerResult<ScheduleStatus> {
        let run_id = record.run_id.clone();

        let definition = match &record.definition {
            Some(definition) => definition.clone(),
            None => self
                .registry
                .protocol(&record.protocol_name)
                .await?
                .ok_or_else(|| SchedulerError::ProtocolNotFound(record.protocol_name.clone()))?,
        };

        let mut requirements = analyze_protocol_requirements(&definition, &user_params);
        let asset_count = requirements.len();

        // The duplicate check, the reservation, and the entry insertion
        // are one atomic step under the active lock; a concurrent
        // schedule of the same run id cannot pass the guard while this
        // attempt is still between check and insert.
        {
            let mut active = self.active.lock().await;
            if active.contains_key(&run_id) {
                return Err(SchedulerError::AlreadyScheduled(run_id));
            }
            self.reservations
                .reserve_all(&mut requirements, &run_id)
                .await?;
            let entry = ScheduleEntry {
                run_id: run_id.clone(),
                protocol_name: definition.name.clone(),
                requirements,
                estimated_duration: definition.estimated_duration_secs.map(Duration::from_secs),
                priority: record.priority,
                lifecycle: RunLifecycle::Queued,
                task_handle: None,
                scheduled_at: epoch_secs(),
                seq: self.seq.fetch_add(1, Ordering::Relaxed),
            };
            active.insert(run_id.clone(), entry);
        }
        info!(
            %run_id,
            protocol = %definition.name,
            assets = asset_count,
            "assets reserved for run"
        );

        if let Err(error) = self
            .registry
            .update_run_status(&run_id, RunStatus::Scheduled)
            .await
        {
            self.discard(&run_id).await;
            return Err(error.into());
        }

        let args = vec![
            json!(run_id),
            Value::Object(user_params),
            initial_state.unwrap_or(Value::Null),
        ];
        match self.queue.send_task(EXECUTE_TASK, args, JsonMap::new()).await {
            Ok(task_handle) => {
                let mut active = self.active.lock().await;
                match active.get_mut(&run_id) {
                    Some(entry) => {
                        entry.task_handle = Some(task_handle.clone());
                        // A running acknowledgement may already have
                        // landed; never regress it to Dispatched.
                        if entry.lifecycle == RunLifecycle::Queued {
                            entry.lifecycle = RunLifecycle::Dispatched;
                        }
                        info!(%run_id, %task_handle, "run dispatched");
                        Ok(entry.status())
                    }
                    None => {
                        // Cancelled while dispatch was in flight; the
                        // cancel already released the reservations.
                        drop(active);
                        if let Err(error) = self.queue.revoke(&task_handle).await {
                            warn!(%run_id, %task_handle, %error, "task revocation failed");
                        }
                        Err(SchedulerError::RunNotActive(run_id))
                    }
                }
            }
            Err(error) => {
                // Dispatch never happened; undo everything this attempt did.
                self.discard(&run_id).await;
                if let Err(status_error) = self
                    .registry
                    .update_run_status(&run_id, RunStatus::Failed)
                    .await
                {
                    warn!(%run_id, error = %status_error, "failed to persist dispatch failure");
                }
                warn!(%run_id, %error, "dispatch failed, reservations released");
                Err(SchedulerError::Dispatch(error.to_string()))
            }
        }
    }

    /// Remove an entry and release everything it reserved.
    async fn discard(&self, run_id: &str) {
        let entry = self.active.lock().await.remove(run_id);
        if let Some(mut entry) = entry {
            self.reservations
                .release_all(&mut entry.requirements, run_id)
                .await;
        }
    }

    /// Cancel a scheduled run, releasing its assets.
    ///
    /// Revocation of the execution task is best-effort: a task already
    /// running is not interrupted. Returns `false` when the run is not
    /// currently scheduled.
    pub async fn cancel_scheduled_run(&self, run_id: &str) -> SchedulerResult<bool> {
        let entry = self.active.lock().await.remove(run_id);
        let Some(mut entry) = entry else {
            return Ok(false);
        };

        self.reservations
            .release_all(&mut entry.requirements, run_id)
            .await;

        if let Some(task_handle) = &entry.task_handle {
            if let Err(error) = self.queue.revoke(task_handle).await {
                warn!(%run_id, %task_handle, %error, "task revocation failed");
            }
        }

        if let Err(error) = self
            .registry
            .update_run_status(run_id, RunStatus::Cancelled)
            .await
        {
            warn!(%run_id, %error, "failed to persist cancellation");
        }

        info!(%run_id, "scheduled run cancelled");
        Ok(true)
    }

    /// Record that execution of a dispatched run has started.
    pub async fn mark_running(&self, run_id: &str) -> SchedulerResult<()> {
        {
            let mut active = self.active.lock().await;
            let entry = active
                .get_mut(run_id)
                .ok_or_else(|| SchedulerError::RunNotActive(run_id.to_string()))?;
            if entry.lifecycle.is_terminal() || entry.lifecycle == RunLifecycle::Running {
                return Err(SchedulerError::InvalidTransition {
                    run_id: run_id.to_string(),
                    from: entry.lifecycle.label(),
                    to: RunLifecycle::Running.label(),
                });
            }
            entry.lifecycle = RunLifecycle::Running;
        }
        self.registry
            .update_run_status(run_id, RunStatus::Running)
            .await?;
        debug!(%run_id, "run marked running");
        Ok(())
    }

    /// Retire a run that finished successfully.
    pub async fn mark_completed(&self, run_id: &str) -> SchedulerResult<()> {
        self.retire(run_id, RunLifecycle::Completed, RunStatus::Completed)
            .await
    }

    /// Retire a run that failed during execution.
    pub async fn mark_failed(&self, run_id: &str) -> SchedulerResult<()> {
        self.retire(run_id, RunLifecycle::Failed, RunStatus::Failed)
            .await
    }

    async fn retire(
        &self,
        run_id: &str,
        lifecycle: RunLifecycle,
        status: RunStatus,
    ) -> SchedulerResult<()> {
        let entry = self.active.lock().await.remove(run_id);
        let Some(mut entry) = entry else {
            return Err(SchedulerError::RunNotActive(run_id.to_string()));
        };

        self.reservations
            .release_all(&mut entry.requirements, run_id)
            .await;
        self.registry.update_run_status(run_id, status).await?;
        info!(%run_id, outcome = lifecycle.label(), "run retired");
        Ok(())
    }

    /// Snapshot of one scheduled run, if active.
    pub async fn get_schedule_status(&self, run_id: &str) -> Option<ScheduleStatus> {
        self.active
            .lock()
            .await
            .get(run_id)
            .map(ScheduleEntry::status)
    }

    /// Snapshots of every active run, in scheduling order.
    pub async fn list_active_schedules(&self) -> Vec<ScheduleStatus> {
        let active = self.active.lock().await;
        let mut entries: Vec<&ScheduleEntry> = active.values().collect();
        entries.sort_by_key(|entry| (entry.scheduled_at, entry.seq));
        entries.iter().map(|entry| entry.status()).collect()
    }

    /// Number of currently scheduled runs.
    pub async fn active_count(&self) -> usize {
        self.active.lock().await.len()
    }

    /// The run currently holding an asset key, if any.
    pub async fn asset_holder(&self, key: &str) -> Option<String> {
        self.reservations.holder(key).await
    }
}
