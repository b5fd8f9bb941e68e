//! In-memory publish/subscribe.
//!
//! One `tokio::sync::broadcast` channel per subject channel. Each
//! subscription runs a forwarder task bridging the broadcast receiver to
//! the subscription's mpsc buffer, so unsubscribing can cut delivery even
//! while the consumer is blocked in `recv`.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{RwLock, broadcast};
use tracing::debug;

use crate::error::StoreResult;
use crate::pubsub::{PubSub, Subscription};

/// Broadcast capacity per channel; a subscriber this far behind loses
/// the oldest messages (same advisory delivery a cache backend gives).
const CHANNEL_CAPACITY: usize = 256;

/// In-process `PubSub` backed by broadcast channels.
pub struct MemoryPubSub {
    channels: Arc<RwLock<HashMap<String, broadcast::Sender<Value>>>>,
}

impl MemoryPubSub {
    pub fn new() -> Self {
        Self {
            channels: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for MemoryPubSub {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PubSub for MemoryPubSub {
    async fn publish(&self, channel: &str, message: Value) -> StoreResult<usize> {
        let mut channels = self.channels.write().await;
        let Some(tx) = channels.get(channel) else {
            return Ok(0);
        };
        // Prune channels whose last subscriber detached.
        if tx.receiver_count() == 0 {
            channels.remove(channel);
            return Ok(0);
        }
        let delivered = tx.send(message).unwrap_or(0);
        Ok(delivered)
    }

    async fn subscribe(&self, channel: &str) -> StoreResult<Subscription> {
        let mut channels = self.channels.write().await;
        let tx = channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        let mut rx = tx.subscribe();
        drop(channels);

        let (feed, subscription) = Subscription::pair();
        let channel = channel.to_string();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = feed.cancel.notified() => break,
                    received = rx.recv() => match received {
                        Ok(message) => {
                            if feed.messages.send(message).await.is_err() {
                                break;
                            }
                        }
                        // Lagged subscribers skip to the oldest retained
                        // message rather than ending the sequence.
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            debug!(%channel, skipped, "subscriber lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
        });

        Ok(subscription)
    }

    async fn close(&self) -> StoreResult<()> {
        // Dropping the senders closes every broadcast stream; forwarders
        // exit and subscriptions end their sequences.
        self.channels.write().await.clear();
        Ok(())
    }
}
