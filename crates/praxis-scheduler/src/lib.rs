//! praxis-scheduler — protocol run scheduling with exclusive assets.
//!
//! Maps run records (from `praxis-core`) to dispatched execution tasks
//! (via `praxis-store`). The scheduler:
//!
//! - Derives asset requirements from a protocol definition plus params
//! - Reserves every required asset all-or-nothing, with rollback
//! - Persists run status transitions through the run registry
//! - Dispatches and cancels execution tasks on the task queue
//!
//! # Architecture
//!
//! ```text
//! ProtocolScheduler
//!   ├── RunRegistry (resolve ProtocolDefinition, persist RunStatus)
//!   ├── TaskQueue (dispatch / revoke execution tasks)
//!   └── ReservationTable (exclusive asset keys, single mutex)
//! ```

pub mod error;
pub mod requirements;
pub mod reservations;
pub mod scheduler;

pub use error::{SchedulerError, SchedulerResult};
pub use requirements::{AssetRequirement, analyze_protocol_requirements};
pub use reservations::ReservationTable;
pub use scheduler::{EXECUTE_TASK, ProtocolScheduler, RunLifecycle, ScheduleStatus};
