//! praxis-core — shared domain types and configuration for Praxis.
//!
//! Holds the protocol/run domain model consumed by the scheduler and the
//! TOML configuration layer that selects a storage backend. No I/O lives
//! here; the storage adapters are in `praxis-store` and orchestration in
//! `praxis-scheduler`.

pub mod config;
pub mod types;

pub use config::{BackendKind, ConfigError, PraxisConfig, StoreConfig};
pub use types::*;
