//! End-to-end scheduling tests over factory-built in-memory backends.
//!
//! These tests validate the full orchestration path:
//! - schedule → dispatch → execute → result retrieval → retirement
//! - exclusive asset reservation across competing runs
//! - cancellation and dispatch-failure rollback leaving no residue

use std::sync::Arc;
use std::sync::Once;
use std::time::Duration;

use serde_json::json;

use praxis_core::{
    AssetDeclaration, JsonMap, ProtocolDefinition, RunRecord, RunStatus, StoreConfig,
};
use praxis_scheduler::{ProtocolScheduler, RunLifecycle, SchedulerError, EXECUTE_TASK};
use praxis_state::RunState;
use praxis_store::{
    create_key_value_store, create_run_registry, create_task_queue, task_handler, KeyValueStore,
    RunRegistry, TaskQueue,
};

// ── Tracing setup ────────────────────────────────────────────────

static TRACING_INIT: Once = Once::new();

/// Initialize tracing for debug output, controlled by `RUST_LOG`.
fn init_tracing() {
    TRACING_INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init()
            .ok();
    });
}

// ── Build helpers ─────────────────────────────────────────────────

struct Harness {
    scheduler: ProtocolScheduler,
    registry: Arc<dyn RunRegistry>,
    queue: Arc<dyn TaskQueue>,
    kv: Arc<dyn KeyValueStore>,
}

/// Wire the whole stack from one in-memory config, the way production
/// wires it from a TOML file. The execution handler loads per-run state,
/// records a step, and echoes the run id.
fn harness() -> Harness {
    init_tracing();
    let config = StoreConfig::in_memory();
    let kv = create_key_value_store(&config).unwrap();
    let queue = create_task_queue(&config).unwrap();
    let registry = create_run_registry(&config).unwrap();

    let handler_kv = kv.clone();
    queue.register(
        EXECUTE_TASK,
        task_handler(move |inv| {
            let kv = handler_kv.clone();
            async move {
                let run_id = inv.args[0].as_str().unwrap_or_default().to_string();
                let mut state = RunState::load(kv, Some(run_id.clone())).await;
                state.set("steps_done", json!(1)).await?;
                Ok(json!({ "run_id": run_id, "outcome": "ok" }))
            }
        }),
    );

    Harness {
        scheduler: ProtocolScheduler::new(registry.clone(), queue.clone()),
        registry,
        queue,
        kv,
    }
}

fn dilution_definition() -> ProtocolDefinition {
    let mut def = ProtocolDefinition::new("serial_dilution");
    def.assets.push(AssetDeclaration::new("ot2_1", "liquid_handler"));
    def.assets.push(AssetDeclaration::new("plate_96", "plate"));
    def.estimated_duration_secs = Some(600);
    def
}

async fn seed_run(registry: &Arc<dyn RunRegistry>, run_id: &str) -> RunRecord {
    let record = RunRecord::new(run_id, "serial_dilution").with_definition(dilution_definition());
    registry.put_run(record.clone()).await.unwrap();
    record
}

// ── Full lifecycle ────────────────────────────────────────────────

#[tokio::test]
async fn schedule_execute_and_retire_a_run() {
    let h = harness();
    let record = seed_run(&h.registry, "run-e2e-1").await;

    let status = h
        .scheduler
        .schedule_protocol_execution(&record, JsonMap::new(), None)
        .await
        .unwrap();
    assert_eq!(status.lifecycle, RunLifecycle::Dispatched);
    let task_handle = status.task_handle.expect("dispatched run has a task handle");

    // The execution task ran on the worker pool and wrote per-run state.
    let result = h
        .queue
        .get_result(&task_handle, Some(Duration::from_secs(5)))
        .await
        .unwrap();
    assert_eq!(result["run_id"], json!("run-e2e-1"));

    let state = RunState::load(h.kv.clone(), Some("run-e2e-1".to_string())).await;
    assert_eq!(state.get("steps_done"), Some(&json!(1)));

    h.scheduler.mark_running("run-e2e-1").await.unwrap();
    h.scheduler.mark_completed("run-e2e-1").await.unwrap();

    let persisted = h.registry.run("run-e2e-1").await.unwrap().unwrap();
    assert_eq!(persisted.status, RunStatus::Completed);
    assert!(h.scheduler.get_schedule_status("run-e2e-1").await.is_none());
    assert!(h.scheduler.asset_holder("asset:ot2_1").await.is_none());
}

// ── Mutual exclusion ──────────────────────────────────────────────

#[tokio::test]
async fn competing_runs_share_no_assets() {
    let h = harness();
    let first = seed_run(&h.registry, "run-a").await;
    let second = seed_run(&h.registry, "run-b").await;

    h.scheduler
        .schedule_protocol_execution(&first, JsonMap::new(), None)
        .await
        .unwrap();
    let err = h
        .scheduler
        .schedule_protocol_execution(&second, JsonMap::new(), None)
        .await
        .unwrap_err();
    assert!(matches!(err, SchedulerError::AssetConflict { .. }));

    // Retiring the holder frees the assets for the loser.
    h.scheduler.mark_completed("run-a").await.unwrap();
    let status = h
        .scheduler
        .schedule_protocol_execution(&second, JsonMap::new(), None)
        .await
        .unwrap();
    assert_eq!(status.lifecycle, RunLifecycle::Dispatched);
}

// ── Cancellation ──────────────────────────────────────────────────

#[tokio::test]
async fn cancellation_leaves_no_residue() {
    let h = harness();
    let record = seed_run(&h.registry, "run-cancel").await;
    h.scheduler
        .schedule_protocol_execution(&record, JsonMap::new(), None)
        .await
        .unwrap();

    assert!(h.scheduler.cancel_scheduled_run("run-cancel").await.unwrap());
    assert!(h.scheduler.list_active_schedules().await.is_empty());
    assert!(h.scheduler.asset_holder("asset:plate_96").await.is_none());
    assert_eq!(
        h.registry.run("run-cancel").await.unwrap().unwrap().status,
        RunStatus::Cancelled
    );

    // Cancelling something never scheduled is a clean no.
    assert!(!h.scheduler.cancel_scheduled_run("run-ghost").await.unwrap());
}

// ── Dispatch failure rollback ─────────────────────────────────────

#[tokio::test]
async fn dispatch_failure_rolls_back_reservations() {
    init_tracing();
    // Queue with no handler registered: dispatch fails after reservation.
    let config = StoreConfig::in_memory();
    let queue = create_task_queue(&config).unwrap();
    let registry = create_run_registry(&config).unwrap();
    let scheduler = ProtocolScheduler::new(registry.clone(), queue);

    let record = seed_run(&registry, "run-nohandler").await;
    let err = scheduler
        .schedule_protocol_execution(&record, JsonMap::new(), None)
        .await
        .unwrap_err();
    assert!(matches!(err, SchedulerError::Dispatch(_)));
    assert!(scheduler.asset_holder("asset:ot2_1").await.is_none());
    assert!(scheduler.list_active_schedules().await.is_empty());
    assert_eq!(
        registry.run("run-nohandler").await.unwrap().unwrap().status,
        RunStatus::Failed
    );
}

// ── Listing ───────────────────────────────────────────────────────

#[tokio::test]
async fn active_schedules_listed_in_order() {
    let h = harness();
    for i in 0..3 {
        let mut def = ProtocolDefinition::new(format!("protocol_{i}"));
        def.assets
            .push(AssetDeclaration::new(format!("instrument_{i}"), "generic"));
        let record =
            RunRecord::new(format!("run-{i}"), def.name.clone()).with_definition(def);
        h.registry.put_run(record.clone()).await.unwrap();
        h.scheduler
            .schedule_protocol_execution(&record, JsonMap::new(), None)
            .await
            .unwrap();
    }

    let listed = h.scheduler.list_active_schedules().await;
    let ids: Vec<&str> = listed.iter().map(|s| s.run_id.as_str()).collect();
    assert_eq!(ids, vec!["run-0", "run-1", "run-2"]);
    assert!(listed.iter().all(|s| s.lifecycle == RunLifecycle::Dispatched));
}
