//! Topic registry for the broker.
//!
//! Maintains an in-memory map from topic string to the set of connections
//! subscribed to it. Entries are ephemeral — lost on broker restart, which
//! is why clients keep their own subscription intents and re-subscribe
//! after reconnecting.

use std::collections::HashMap;

use axum::extract::ws::Message;
use tokio::sync::{RwLock, mpsc};

/// Maximum number of distinct topics the registry will hold.
const MAX_TOPICS: usize = 100_000;

/// Errors that can occur during topic registry operations.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// The registry has reached its maximum topic capacity.
    #[error("topic registry is full (max {MAX_TOPICS} topics)")]
    CapacityReached,
}

/// In-memory directory of topic subscriptions.
///
/// Thread-safe via [`RwLock`]. A connection is identified by the numeric id
/// the broker assigns at accept time; its value is the sender half of the
/// connection's writer channel.
pub struct TopicRegistry {
    topics: RwLock<HashMap<String, HashMap<u64, mpsc::UnboundedSender<Message>>>>,
}

impl Default for TopicRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TopicRegistry {
    /// Creates a new, empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            topics: RwLock::new(HashMap::new()),
        }
    }

    /// Subscribes a connection to a topic.
    ///
    /// Subscribing the same connection twice is a no-op beyond refreshing
    /// the stored sender.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::CapacityReached`] if the topic is new and
    /// the registry is at capacity.
    pub async fn subscribe(
        &self,
        conn_id: u64,
        topic: &str,
        sender: mpsc::UnboundedSender<Message>,
    ) -> Result<(), RegistryError> {
        let mut topics = self.topics.write().await;
        if !topics.contains_key(topic) && topics.len() >= MAX_TOPICS {
            return Err(RegistryError::CapacityReached);
        }
        topics
            .entry(topic.to_string())
            .or_default()
            .insert(conn_id, sender);
        Ok(())
    }

    /// Removes a connection's subscription to a topic.
    ///
    /// Returns whether the subscription existed. Empty topics are pruned.
    pub async fn unsubscribe(&self, conn_id: u64, topic: &str) -> bool {
        let mut topics = self.topics.write().await;
        let Some(subs) = topics.get_mut(topic) else {
            return false;
        };
        let existed = subs.remove(&conn_id).is_some();
        if subs.is_empty() {
            topics.remove(topic);
        }
        existed
    }

    /// Removes a connection from every topic it is subscribed to.
    ///
    /// Called when a connection closes. Returns the number of
    /// subscriptions dropped.
    pub async fn drop_connection(&self, conn_id: u64) -> usize {
        let mut topics = self.topics.write().await;
        let mut dropped = 0;
        topics.retain(|_, subs| {
            if subs.remove(&conn_id).is_some() {
                dropped += 1;
            }
            !subs.is_empty()
        });
        dropped
    }

    /// Fans a pre-encoded frame out to every subscriber of a topic.
    ///
    /// Returns the number of subscribers the frame was handed to. Dead
    /// senders (whose writer task has exited) are pruned as they are
    /// encountered.
    pub async fn publish(&self, topic: &str, frame: &Message) -> usize {
        let mut topics = self.topics.write().await;
        let Some(subs) = topics.get_mut(topic) else {
            return 0;
        };

        let mut delivered = 0;
        subs.retain(|conn_id, sender| {
            if sender.send(frame.clone()).is_ok() {
                delivered += 1;
                true
            } else {
                tracing::debug!(conn_id, topic, "pruning dead subscriber");
                false
            }
        });
        if subs.is_empty() {
            topics.remove(topic);
        }
        delivered
    }

    /// Returns the number of subscribers a topic currently has.
    pub async fn subscriber_count(&self, topic: &str) -> usize {
        let topics = self.topics.read().await;
        topics.get(topic).map_or(0, HashMap::len)
    }
}
