//! PubSub protocol and the shared `Subscription` type.
//!
//! A subscription only sees publishes that happen after `subscribe`
//! returns — there is no backlog replay. Unsubscribing terminates
//! consumption cleanly (end of sequence), never with an error or a hang.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{Notify, mpsc};

use crate::error::StoreResult;

/// Buffer size between a backend's forwarder task and the subscriber.
const SUBSCRIPTION_BUFFER: usize = 64;

/// Publish/subscribe capability.
#[async_trait]
pub trait PubSub: Send + Sync {
    /// Deliver a message to current subscribers of `channel`.
    ///
    /// Publishing to a channel with no subscribers is not an error and
    /// reports zero delivered.
    async fn publish(&self, channel: &str, message: Value) -> StoreResult<usize>;

    /// Open a fresh subscription that sees only future publishes.
    async fn subscribe(&self, channel: &str) -> StoreResult<Subscription>;

    /// Shut the backend down; open subscriptions end their sequences.
    async fn close(&self) -> StoreResult<()>;
}

/// A lazy sequence of messages on one channel.
///
/// Backends feed it through the paired [`SubscriptionFeed`]; consumers
/// call [`recv`](Subscription::recv) until it yields `None`.
pub struct Subscription {
    messages: mpsc::Receiver<Value>,
    cancel: Arc<Notify>,
}

impl Subscription {
    /// Create a subscription plus the feed half a backend writes into.
    pub(crate) fn pair() -> (SubscriptionFeed, Subscription) {
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let cancel = Arc::new(Notify::new());
        (
            SubscriptionFeed {
                messages: tx,
                cancel: cancel.clone(),
            },
            Subscription {
                messages: rx,
                cancel,
            },
        )
    }

    /// Wait for the next message; `None` means the sequence has ended
    /// (unsubscribed or backend closed).
    pub async fn recv(&mut self) -> Option<Value> {
        self.messages.recv().await
    }

    /// Terminate this subscription. In-progress and future `recv` calls
    /// complete with `None` once buffered messages drain.
    pub fn unsubscribe(&self) {
        self.cancel.notify_one();
    }

    /// A cloneable handle that can unsubscribe from another task.
    pub fn handle(&self) -> SubscriptionHandle {
        SubscriptionHandle {
            cancel: self.cancel.clone(),
        }
    }
}

/// Detached unsubscribe handle for a [`Subscription`].
#[derive(Clone)]
pub struct SubscriptionHandle {
    cancel: Arc<Notify>,
}

impl SubscriptionHandle {
    pub fn unsubscribe(&self) {
        self.cancel.notify_one();
    }
}

/// Backend half of a subscription: a message sink plus the cancel signal
/// the forwarder task selects on.
pub(crate) struct SubscriptionFeed {
    pub(crate) messages: mpsc::Sender<Value>,
    pub(crate) cancel: Arc<Notify>,
}
