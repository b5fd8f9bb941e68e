//! praxis-state — run-scoped state persisted through the key-value store.
//!
//! A `RunState` is a dictionary-like object holding one protocol run's
//! mutable execution state. Reads come from an in-memory mirror; every
//! mutation persists the whole mirror back to the store before returning,
//! so the state survives process restarts. `ConnectionBeacon` is a second
//! consumer of the same store: a TTL-refreshed liveness key per connected
//! instrument.

pub mod error;
pub mod liveness;
pub mod run_state;

pub use error::{StateError, StateResult};
pub use liveness::ConnectionBeacon;
pub use run_state::RunState;
