//! Error types for the Praxis storage layer.
//!
//! The taxonomy matters to callers: configuration errors fail fast at
//! construction, conflicts and not-found conditions are distinct, and a
//! task-body failure is re-raised verbatim to whoever awaits the result.

use thiserror::Error;

/// Result type alias for storage operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur in the storage abstraction layer.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Unsupported backend/operation combination or missing setting.
    #[error("configuration error: {0}")]
    Config(String),

    /// Underlying backend failure (redb, redis, channel plumbing).
    #[error("backend error: {0}")]
    Backend(String),

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("deserialization error: {0}")]
    Deserialize(String),

    #[error("invalid key pattern {pattern:?}: {reason}")]
    InvalidPattern { pattern: String, reason: String },

    /// Task name not registered with this backend instance.
    #[error("unknown task: {0}")]
    UnknownTask(String),

    /// Key, task id, or run that was never there.
    #[error("not found: {0}")]
    NotFound(String),

    /// Result not ready within the requested timeout.
    #[error("timed out waiting for task {0}")]
    Timeout(String),

    /// The task body failed; the message carries its error content.
    #[error("task failed: {0}")]
    TaskFailed(String),

    /// The task was revoked before it started.
    #[error("task revoked: {0}")]
    Revoked(String),

    /// The queue or store is closed and no longer accepts work.
    #[error("store closed")]
    Closed,
}
