//! Error types for run-scoped state.

use thiserror::Error;

/// Result type alias for state operations.
pub type StateResult<T> = Result<T, StateError>;

/// Errors that can occur while reading or persisting run state.
#[derive(Debug, Error)]
pub enum StateError {
    /// Indexed read or delete of a key that is not in the state.
    #[error("state key not found: {0}")]
    NotFound(String),

    #[error("storage error: {0}")]
    Store(#[from] praxis_store::StoreError),
}
