//! Local Pub/Sub
//!
//! In-process topic fan-out: a registry of subscriber channels keyed by
//! topic. Registration, removal, and the snapshot taken for dispatch are
//! all serialized through one mutex; the actual delivery to each subscriber
//! runs on its own task so a blocked subscriber cannot stall the others.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{PubSub, PubSubError, Publication, Subscription};

struct SubscriberEntry {
    id: u64,
    sender: mpsc::Sender<Publication>,
    partition_key: Option<String>,
}

type TopicRegistry = HashMap<String, Vec<SubscriberEntry>>;

/// In-process publish/subscribe backend
pub struct LocalPubSub {
    subscribers: Arc<Mutex<TopicRegistry>>,
    next_id: AtomicU64,
}

impl LocalPubSub {
    /// Create a new local pub/sub backend
    pub fn new() -> Self {
        Self {
            subscribers: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(0),
        }
    }

    fn registry(subscribers: &Mutex<TopicRegistry>) -> MutexGuard<'_, TopicRegistry> {
        subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Number of subscribers currently registered for a topic
    pub fn subscriber_count(&self, topic: &str) -> usize {
        Self::registry(&self.subscribers)
            .get(topic)
            .map(|entries| entries.len())
            .unwrap_or(0)
    }
}

impl Default for LocalPubSub {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PubSub for LocalPubSub {
    async fn connect(&self) -> Result<(), PubSubError> {
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), PubSubError> {
        // Dropping the senders closes every subscriber channel.
        Self::registry(&self.subscribers).clear();
        Ok(())
    }

    async fn publish(&self, publication: Publication) -> Result<(), PubSubError> {
        let matching: Vec<mpsc::Sender<Publication>> = {
            let registry = Self::registry(&self.subscribers);
            registry
                .get(&publication.topic)
                .map(|entries| {
                    entries
                        .iter()
                        .filter(|entry| match &entry.partition_key {
                            None => true,
                            Some(key) => publication.partition_key.as_deref() == Some(key),
                        })
                        .map(|entry| entry.sender.clone())
                        .collect()
                })
                .unwrap_or_default()
        };

        // Fan-out is dispatched independently per subscriber.
        for sender in matching {
            let publication = publication.clone();
            tokio::spawn(async move {
                if sender.send(publication).await.is_err() {
                    tracing::debug!("subscriber channel closed during delivery");
                }
            });
        }

        Ok(())
    }

    async fn subscribe(
        &self,
        sender: mpsc::Sender<Publication>,
        topic: &str,
        partition_key: Option<&str>,
    ) -> Result<Subscription, PubSubError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        Self::registry(&self.subscribers)
            .entry(topic.to_string())
            .or_default()
            .push(SubscriberEntry {
                id,
                sender,
                partition_key: partition_key.map(str::to_string),
            });

        tracing::debug!(topic = %topic, "subscribed channel");

        let subscribers = Arc::clone(&self.subscribers);
        let topic = topic.to_string();
        Ok(Subscription::new(move || {
            let mut registry = Self::registry(&subscribers);
            if let Some(entries) = registry.get_mut(&topic) {
                // Removing the entry drops its sender, which closes the
                // subscriber channel once in-flight deliveries finish.
                entries.retain(|entry| entry.id != id);
                if entries.is_empty() {
                    registry.remove(&topic);
                }
            }
        }))
    }
}
