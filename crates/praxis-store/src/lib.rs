//! praxis-store — storage abstraction layer for Praxis.
//!
//! Three small capability protocols — key-value store, publish/subscribe,
//! task queue — plus adapters that satisfy them:
//!
//! ```text
//! KeyValueStore       PubSub            TaskQueue
//!   ├── MemoryKvStore   ├── MemoryPubSub  ├── WorkerPoolQueue
//!   ├── EmbeddedKvStore │                 │
//!   └── RedisKvStore*   └── RedisPubSub*  └── RedisBrokerQueue*
//!                                           (* feature = "distributed")
//! ```
//!
//! The in-memory adapters are the behavioral reference: a caller must not
//! be able to tell them apart from a distributed backend. The factory
//! module is the only place in the system that branches on backend
//! identity; everything else depends solely on the protocols.

pub mod embedded;
pub mod error;
pub mod factory;
pub mod kv;
pub mod memory;
pub mod pubsub;
pub mod queue;
pub mod registry;

#[cfg(feature = "distributed")]
pub mod distributed;

pub use embedded::EmbeddedKvStore;
pub use error::{StoreError, StoreResult};
pub use factory::{
    create_key_value_store, create_pubsub, create_run_registry, create_task_queue,
};
pub use kv::KeyValueStore;
pub use memory::{MemoryKvStore, MemoryPubSub, WorkerPoolQueue};
pub use pubsub::{PubSub, Subscription, SubscriptionHandle};
pub use queue::{TaskFuture, TaskHandler, TaskInvocation, TaskQueue, task_handler};
pub use registry::{MemoryRunRegistry, RunRegistry};
