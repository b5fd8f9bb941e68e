//! Scheduler error types.

use thiserror::Error;

/// Errors that can occur during scheduling operations.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("protocol not found: {0}")]
    ProtocolNotFound(String),

    #[error("run already scheduled: {0}")]
    AlreadyScheduled(String),

    /// Exclusive reservation conflict; the whole attempt was rolled back.
    #[error("asset {key} already reserved by run {holder}")]
    AssetConflict { key: String, holder: String },

    #[error("run not active: {0}")]
    RunNotActive(String),

    #[error("invalid lifecycle transition for run {run_id}: {from} -> {to}")]
    InvalidTransition {
        run_id: String,
        from: &'static str,
        to: &'static str,
    },

    /// Task backend rejected the dispatch; reservations were released.
    #[error("dispatch failed: {0}")]
    Dispatch(String),

    #[error("storage error: {0}")]
    Store(#[from] praxis_store::StoreError),
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;
