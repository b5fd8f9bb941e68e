//! Exclusive asset reservation table.
//!
//! Maps asset keys to the set of run ids holding them. A key's holder set
//! never contains two distinct runs; multiple entries only arise from the
//! same run's own re-entrant reservation. Every check-then-set happens
//! under one mutex hold.

use std::collections::{HashMap, HashSet};

use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{SchedulerError, SchedulerResult};
use crate::requirements::AssetRequirement;

/// In-memory reservation table guarded by a single mutex.
#[derive(Default)]
pub struct ReservationTable {
    inner: Mutex<HashMap<String, HashSet<String>>>,
}

impl ReservationTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve one key for `run_id`. Conflict error if a different run
    /// holds it; idempotent when this run already does.
    pub async fn acquire(&self, key: &str, run_id: &str) -> SchedulerResult<()> {
        let mut table = self.inner.lock().await;
        acquire_holder(&mut table, key, run_id)?;
        Ok(())
    }

    /// Reserve every requirement for `run_id`, all-or-nothing.
    ///
    /// On the first conflict, every key acquired earlier in this same
    /// call is released before the error propagates. Reserving a key the
    /// run already holds is idempotent. Successful requirements get their
    /// reservation identifier stamped.
    pub async fn reserve_all(
        &self,
        requirements: &mut [AssetRequirement],
        run_id: &str,
    ) -> SchedulerResult<()> {
        let mut table = self.inner.lock().await;
        let mut acquired: Vec<String> = Vec::new();

        for requirement in requirements.iter_mut() {
            let key = requirement.asset_key();
            match acquire_holder(&mut table, &key, run_id) {
                Ok(newly_inserted) => {
                    // Only newly-inserted keys participate in rollback; a
                    // key the run held before this call stays held.
                    if newly_inserted {
                        acquired.push(key.clone());
                    }
                    requirement.reservation = Some(format!("{key}::{run_id}"));
                }
                Err(conflict) => {
                    // Roll back everything this call acquired.
                    for key in &acquired {
                        release_holder(&mut table, key, run_id);
                    }
                    for requirement in requirements.iter_mut() {
                        if acquired.contains(&requirement.asset_key()) {
                            requirement.reservation = None;
                        }
                    }
                    debug!(%key, rolled_back = acquired.len(), "reservation conflict");
                    return Err(conflict);
                }
            }
        }

        debug!(%run_id, reserved = requirements.len(), "assets reserved");
        Ok(())
    }

    /// Release one key/run pair. Unknown pairs are a silent no-op so
    /// cleanup paths stay idempotent.
    pub async fn release(&self, key: &str, run_id: &str) {
        let mut table = self.inner.lock().await;
        release_holder(&mut table, key, run_id);
    }

    /// Release every reservation stamped on the requirements.
    pub async fn release_all(&self, requirements: &mut [AssetRequirement], run_id: &str) {
        let mut table = self.inner.lock().await;
        for requirement in requirements.iter_mut() {
            if requirement.reservation.take().is_some() {
                release_holder(&mut table, &requirement.asset_key(), run_id);
            }
        }
        debug!(%run_id, "reservations released");
    }

    /// The run currently holding `key`, if any.
    pub async fn holder(&self, key: &str) -> Option<String> {
        let table = self.inner.lock().await;
        table.get(key).and_then(|set| set.iter().next().cloned())
    }

    /// Whether `run_id` holds `key`.
    pub async fn is_held_by(&self, key: &str, run_id: &str) -> bool {
        let table = self.inner.lock().await;
        table.get(key).is_some_and(|set| set.contains(run_id))
    }

    /// Number of reserved asset keys.
    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.is_empty()
    }
}

/// Add `run_id` to a key's holder set. Returns whether the holder was
/// newly inserted; a different run already holding the key is a conflict.
fn acquire_holder(
    table: &mut HashMap<String, HashSet<String>>,
    key: &str,
    run_id: &str,
) -> SchedulerResult<bool> {
    let holders = table.entry(key.to_string()).or_default();
    if !holders.is_empty() && !holders.contains(run_id) {
        let holder = holders.iter().next().cloned().unwrap_or_default();
        return Err(SchedulerError::AssetConflict {
            key: key.to_string(),
            holder,
        });
    }
    Ok(holders.insert(run_id.to_string()))
}

/// Remove `run_id` from a key's holder set, deleting the key once empty.
fn release_holder(table: &mut HashMap<String, HashSet<String>>, key: &str, run_id: &str) {
    if let Some(holders) = table.get_mut(key) {
        holders.remove(run_id);
        if holders.is_empty() {
            table.remove(key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::requirements::AssetRequirement;

    fn requirements(names: &[&str]) -> Vec<AssetRequirement> {
        names
            .iter()
            .map(|name| AssetRequirement::new(*name, "instrument"))
            .collect()
    }

    #[tokio::test]
    async fn reserve_and_release_round_trip() {
        let table = ReservationTable::new();
        let mut reqs = requirements(&["a", "b"]);
        table.reserve_all(&mut reqs, "run-1").await.unwrap();

        assert!(table.is_held_by("asset:a", "run-1").await);
        assert!(table.is_held_by("asset:b", "run-1").await);
        assert!(reqs.iter().all(|r| r.reservation.is_some()));

        table.release_all(&mut reqs, "run-1").await;
        assert!(table.is_empty().await);
        assert!(reqs.iter().all(|r| r.reservation.is_none()));
    }

    #[tokio::test]
    async fn empty_requirement_list_trivially_succeeds() {
        let table = ReservationTable::new();
        table.reserve_all(&mut [], "run-1").await.unwrap();
        assert!(table.is_empty().await);
    }

    #[tokio::test]
    async fn mutual_exclusion_between_distinct_runs() {
        let table = ReservationTable::new();
        table
            .reserve_all(&mut requirements(&["shared"]), "run-1")
            .await
            .unwrap();

        let err = table
            .reserve_all(&mut requirements(&["shared"]), "run-2")
            .await
            .unwrap_err();
        match err {
            SchedulerError::AssetConflict { key, holder } => {
                assert_eq!(key, "asset:shared");
                assert_eq!(holder, "run-1");
            }
            other => panic!("expected AssetConflict, got {other:?}"),
        }
        assert!(table.is_held_by("asset:shared", "run-1").await);
        assert!(!table.is_held_by("asset:shared", "run-2").await);
    }

    #[tokio::test]
    async fn all_or_nothing_rollback_on_conflict() {
        let table = ReservationTable::new();
        table
            .reserve_all(&mut requirements(&["c"]), "run-1")
            .await
            .unwrap();

        let mut reqs = requirements(&["a", "b", "c"]);
        let err = table.reserve_all(&mut reqs, "run-2").await.unwrap_err();
        assert!(matches!(err, SchedulerError::AssetConflict { .. }));

        // Neither a nor b remains held by run-2.
        assert!(!table.is_held_by("asset:a", "run-2").await);
        assert!(!table.is_held_by("asset:b", "run-2").await);
        assert_eq!(table.len().await, 1);
        assert!(reqs.iter().all(|r| r.reservation.is_none()));
    }

    #[tokio::test]
    async fn re_reserving_for_the_same_run_is_idempotent() {
        let table = ReservationTable::new();
        let mut first = requirements(&["a"]);
        table.reserve_all(&mut first, "run-1").await.unwrap();
        let mut again = requirements(&["a"]);
        table.reserve_all(&mut again, "run-1").await.unwrap();
        assert_eq!(table.len().await, 1);
    }

    #[tokio::test]
    async fn conflict_rollback_preserves_previously_held_keys() {
        let table = ReservationTable::new();
        table
            .reserve_all(&mut requirements(&["a"]), "run-1")
            .await
            .unwrap();
        table
            .reserve_all(&mut requirements(&["blocker"]), "run-2")
            .await
            .unwrap();

        // run-1 re-reserves "a" plus a conflicting key; the rollback must
        // not release the "a" it held from the earlier call.
        let mut reqs = requirements(&["a", "blocker"]);
        let err = table.reserve_all(&mut reqs, "run-1").await.unwrap_err();
        assert!(matches!(err, SchedulerError::AssetConflict { .. }));
        assert!(table.is_held_by("asset:a", "run-1").await);
    }

    #[tokio::test]
    async fn single_key_acquire_follows_the_same_rules() {
        let table = ReservationTable::new();
        table.acquire("asset:a", "run-1").await.unwrap();
        // Idempotent for the holder, a conflict for anyone else.
        table.acquire("asset:a", "run-1").await.unwrap();
        let err = table.acquire("asset:a", "run-2").await.unwrap_err();
        assert!(matches!(err, SchedulerError::AssetConflict { .. }));
        assert_eq!(table.holder("asset:a").await.as_deref(), Some("run-1"));
    }

    #[tokio::test]
    async fn release_is_idempotent() {
        let table = ReservationTable::new();
        table
            .reserve_all(&mut requirements(&["a"]), "run-1")
            .await
            .unwrap();

        table.release("asset:a", "run-1").await;
        assert!(table.is_empty().await);
        // Releasing again, or releasing a pair that never existed, is a no-op.
        table.release("asset:a", "run-1").await;
        table.release("asset:ghost", "run-9").await;
        assert!(table.is_empty().await);
    }
}
