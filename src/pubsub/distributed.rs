//! Distributed Pub/Sub
//!
//! The same publish/subscribe contract as [`LocalPubSub`], carried over an
//! external broker so every subscribed server instance observes the same
//! publications. The broker itself is reached through the
//! [`BrokerTransport`] trait; concrete client libraries (addresses,
//! credentials, partition counts) live outside this crate. [`MemoryBroker`]
//! is an in-process loopback transport proving the contract.
//!
//! Delivery is best-effort: publish failures are returned to the caller
//! and never retried here, since a blind retry could duplicate delivery.
//!
//! [`LocalPubSub`]: super::LocalPubSub

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{PubSub, PubSubError, Publication, Subscription};

/// Abstract broker connection used by [`DistributedPubSub`].
///
/// `send` takes an opaque payload, a topic, and a routing/partition key;
/// `consume` returns a channel of raw payloads for a topic. Implementations
/// own their own timeout and acknowledgment semantics.
#[async_trait]
pub trait BrokerTransport: Send + Sync {
    /// Establish the broker session
    async fn connect(&self) -> Result<(), PubSubError>;

    /// Tear down the broker session
    async fn disconnect(&self) -> Result<(), PubSubError>;

    /// Send one payload to a topic with the given routing key
    async fn send(&self, topic: &str, key: &str, payload: Vec<u8>) -> Result<(), PubSubError>;

    /// Start consuming a topic, returning the inbound payload channel
    async fn consume(&self, topic: &str) -> Result<mpsc::Receiver<Vec<u8>>, PubSubError>;
}

/// Publish/subscribe backend over an external broker
pub struct DistributedPubSub {
    transport: Arc<dyn BrokerTransport>,
}

impl DistributedPubSub {
    /// Create a distributed backend over the given transport
    pub fn new(transport: Arc<dyn BrokerTransport>) -> Self {
        Self { transport }
    }
}

#[async_trait]
impl PubSub for DistributedPubSub {
    async fn connect(&self) -> Result<(), PubSubError> {
        self.transport.connect().await
    }

    async fn disconnect(&self) -> Result<(), PubSubError> {
        self.transport.disconnect().await
    }

    async fn publish(&self, publication: Publication) -> Result<(), PubSubError> {
        // A serialization failure drops the publication; the error is the
        // caller's to handle.
        let payload = serde_json::to_vec(&publication).map_err(PubSubError::Encode)?;
        self.transport
            .send(&publication.topic, publication.routing_key(), payload)
            .await
    }

    async fn subscribe(
        &self,
        sender: mpsc::Sender<Publication>,
        topic: &str,
        partition_key: Option<&str>,
    ) -> Result<Subscription, PubSubError> {
        let mut inbound = self.transport.consume(topic).await?;
        let filter = partition_key.map(str::to_string);
        let cancel = CancellationToken::new();
        let consumer_cancel = cancel.clone();
        let topic = topic.to_string();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = consumer_cancel.cancelled() => break,
                    payload = inbound.recv() => {
                        let Some(payload) = payload else { break };
                        let publication = match serde_json::from_slice::<Publication>(&payload) {
                            Ok(publication) => publication,
                            Err(error) => {
                                // One bad message never tears down the consumer.
                                tracing::warn!(
                                    topic = %topic,
                                    error = %error,
                                    "dropping malformed publication payload"
                                );
                                continue;
                            }
                        };
                        if let Some(key) = &filter {
                            if publication.partition_key.as_deref() != Some(key) {
                                continue;
                            }
                        }
                        if sender.send(publication).await.is_err() {
                            break;
                        }
                    }
                }
            }
            // Dropping `sender` here closes the delivery channel.
        });

        Ok(Subscription::new(move || cancel.cancel()))
    }
}

type ConsumerRegistry = HashMap<String, Vec<mpsc::Sender<Vec<u8>>>>;

/// In-process loopback broker.
///
/// Every payload sent to a topic is forwarded to all consumers of that
/// topic, including consumers created by the sending instance. Used in
/// tests and single-process setups standing in for a real broker.
pub struct MemoryBroker {
    consumers: Mutex<ConsumerRegistry>,
    capacity: usize,
}

impl MemoryBroker {
    /// Create a loopback broker whose consumer channels hold `capacity`
    /// undelivered payloads
    pub fn new(capacity: usize) -> Self {
        Self {
            consumers: Mutex::new(HashMap::new()),
            capacity,
        }
    }

    fn registry(&self) -> MutexGuard<'_, ConsumerRegistry> {
        self.consumers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl BrokerTransport for MemoryBroker {
    async fn connect(&self) -> Result<(), PubSubError> {
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), PubSubError> {
        self.registry().clear();
        Ok(())
    }

    async fn send(&self, topic: &str, _key: &str, payload: Vec<u8>) -> Result<(), PubSubError> {
        let senders: Vec<mpsc::Sender<Vec<u8>>> = {
            let mut registry = self.registry();
            if let Some(senders) = registry.get_mut(topic) {
                senders.retain(|sender| !sender.is_closed());
            }
            registry.get(topic).cloned().unwrap_or_default()
        };

        for sender in senders {
            if sender.send(payload.clone()).await.is_err() {
                tracing::debug!(topic = %topic, "consumer channel closed during send");
            }
        }
        Ok(())
    }

    async fn consume(&self, topic: &str) -> Result<mpsc::Receiver<Vec<u8>>, PubSubError> {
        let (tx, rx) = mpsc::channel(self.capacity);
        self.registry().entry(topic.to_string()).or_default().push(tx);
        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn distributed() -> DistributedPubSub {
        DistributedPubSub::new(Arc::new(MemoryBroker::default()))
    }

    #[tokio::test]
    async fn test_publish_round_trip() {
        let pubsub = distributed();
        pubsub.connect().await.unwrap();

        let (tx, mut rx) = mpsc::channel(8);
        let _subscription = pubsub.subscribe(tx, "activity", None).await.unwrap();

        let publication = Publication::encode("activity", &"payload").unwrap();
        pubsub.publish(publication).await.unwrap();

        let received = rx.recv().await.unwrap();
        assert_eq!(received.topic, "activity");
        assert_eq!(received.decode::<String>().unwrap(), "payload");
    }

    #[tokio::test]
    async fn test_topic_isolation() {
        let broker = Arc::new(MemoryBroker::default());
        let pubsub = DistributedPubSub::new(broker);

        let (tx, mut rx) = mpsc::channel(8);
        let _subscription = pubsub.subscribe(tx, "other", None).await.unwrap();

        pubsub
            .publish(Publication::new("activity"))
            .await
            .unwrap();

        tokio::task::yield_now().await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_malformed_payload_is_dropped_not_fatal() {
        let broker = Arc::new(MemoryBroker::default());
        let pubsub = DistributedPubSub::new(Arc::clone(&broker) as Arc<dyn BrokerTransport>);

        let (tx, mut rx) = mpsc::channel(8);
        let _subscription = pubsub.subscribe(tx, "activity", None).await.unwrap();

        // Garbage straight through the transport, then a valid publication.
        broker
            .send("activity", "activity", b"not json".to_vec())
            .await
            .unwrap();
        pubsub
            .publish(Publication::new("activity"))
            .await
            .unwrap();

        // The consumer survives the bad payload and delivers the good one.
        let received = rx.recv().await.unwrap();
        assert_eq!(received.topic, "activity");
    }

    #[tokio::test]
    async fn test_partition_filter_applies_to_inbound() {
        let pubsub = distributed();

        let (tx, mut rx) = mpsc::channel(8);
        let _subscription = pubsub
            .subscribe(tx, "activity", Some("tenant-a"))
            .await
            .unwrap();

        pubsub
            .publish(Publication::new("activity").with_partition_key("tenant-b"))
            .await
            .unwrap();
        pubsub
            .publish(Publication::new("activity").with_partition_key("tenant-a"))
            .await
            .unwrap();

        let received = rx.recv().await.unwrap();
        assert_eq!(received.partition_key.as_deref(), Some("tenant-a"));
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_consumer_and_closes_channel() {
        let pubsub = distributed();

        let (tx, mut rx) = mpsc::channel(8);
        let subscription = pubsub.subscribe(tx, "activity", None).await.unwrap();

        subscription.unsubscribe();
        assert!(rx.recv().await.is_none());

        subscription.unsubscribe();
    }
}
