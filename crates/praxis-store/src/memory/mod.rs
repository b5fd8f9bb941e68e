//! In-memory reference adapters.
//!
//! One implementation of each storage protocol using only in-process
//! primitives, behaviorally indistinguishable (to a caller) from a
//! distributed backend. Single-process only; cross-machine locking
//! correctness is explicitly out of scope.

mod kv;
mod pubsub;
mod queue;

pub use kv::MemoryKvStore;
pub use pubsub::MemoryPubSub;
pub use queue::WorkerPoolQueue;
