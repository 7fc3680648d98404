//! Publish/Subscribe Layer
//!
//! Topic-based fan-out of opaque publications, behind one contract with two
//! implementations:
//!
//! - [`LocalPubSub`]: in-process fan-out for single-instance deployments
//! - [`DistributedPubSub`]: the same contract over a [`BrokerTransport`],
//!   so multiple server instances observe the same publications
//!
//! Publications carry an opaque serialized body and an optional partition
//! key. Subscribers receive publications on their own channel; a slow
//! subscriber never stalls delivery to the others.

mod distributed;
mod local;

pub use distributed::{BrokerTransport, DistributedPubSub, MemoryBroker};
pub use local::LocalPubSub;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use thiserror::Error;
use tokio::sync::mpsc;

/// One message unit submitted to the pub/sub layer.
///
/// The body is an opaque serialized blob; the pub/sub layer never inspects
/// it. A publication is never mutated after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Publication {
    /// Topic this publication is delivered on
    pub topic: String,
    /// Optional partition key, matched against subscriber filters
    pub partition_key: Option<String>,
    /// Opaque serialized body
    pub data: Vec<u8>,
}

impl Publication {
    /// Create an empty publication for a topic
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            partition_key: None,
            data: Vec::new(),
        }
    }

    /// Create a publication carrying `value` serialized as JSON
    pub fn encode<T: Serialize>(topic: impl Into<String>, value: &T) -> Result<Self, PubSubError> {
        let data = serde_json::to_vec(value).map_err(PubSubError::Encode)?;
        Ok(Self {
            topic: topic.into(),
            partition_key: None,
            data,
        })
    }

    /// Set the partition key
    pub fn with_partition_key(mut self, key: impl Into<String>) -> Self {
        self.partition_key = Some(key.into());
        self
    }

    /// Deserialize the body
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, PubSubError> {
        serde_json::from_slice(&self.data).map_err(PubSubError::Decode)
    }

    /// Key used to route this publication through a broker: the partition
    /// key when set, otherwise the topic itself.
    pub fn routing_key(&self) -> &str {
        self.partition_key.as_deref().unwrap_or(&self.topic)
    }
}

/// Handle owning one topic subscription.
///
/// Unsubscribing removes exactly one registry entry and closes the channel
/// it owns; calling [`unsubscribe`](Subscription::unsubscribe) more than
/// once is a no-op. Dropping the handle unsubscribes as well, so a
/// forgotten handle cannot leak its registry entry.
pub struct Subscription {
    unsub: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl Subscription {
    pub(crate) fn new(unsub: impl FnOnce() + Send + 'static) -> Self {
        Self {
            unsub: Mutex::new(Some(Box::new(unsub))),
        }
    }

    /// Remove the subscription and close its delivery channel. Idempotent.
    pub fn unsubscribe(&self) {
        let unsub = self
            .unsub
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(unsub) = unsub {
            unsub();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").finish_non_exhaustive()
    }
}

/// The publish/subscribe contract shared by the local and distributed
/// implementations.
///
/// `publish` is best-effort: implementations surface serialization and
/// transport failures to the caller and never retry internally, since a
/// blind retry could duplicate delivery. Callers owning stronger delivery
/// requirements must layer them on top.
#[async_trait]
pub trait PubSub: Send + Sync {
    /// Establish the backend session. Returns once the backend is ready to
    /// accept publications.
    async fn connect(&self) -> Result<(), PubSubError>;

    /// Release all resources held by the backend. Always succeeds for the
    /// local implementation.
    async fn disconnect(&self) -> Result<(), PubSubError>;

    /// Deliver a publication to all current subscribers of its topic.
    async fn publish(&self, publication: Publication) -> Result<(), PubSubError>;

    /// Register `sender` as a subscriber of `topic`.
    ///
    /// With a `partition_key` filter the subscriber receives only
    /// publications whose partition key matches; without one it receives
    /// every publication for the topic.
    async fn subscribe(
        &self,
        sender: mpsc::Sender<Publication>,
        topic: &str,
        partition_key: Option<&str>,
    ) -> Result<Subscription, PubSubError>;
}

/// Errors surfaced by the pub/sub layer
#[derive(Debug, Error)]
pub enum PubSubError {
    /// A publication body could not be serialized
    #[error("Failed to encode publication: {0}")]
    Encode(#[source] serde_json::Error),

    /// An inbound payload could not be deserialized
    #[error("Failed to decode publication: {0}")]
    Decode(#[source] serde_json::Error),

    /// The broker transport reported a failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// The backend is not connected
    #[error("Pub/sub backend is disconnected")]
    Disconnected,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_routing_key_defaults_to_topic() {
        let publication = Publication::new("activity");
        assert_eq!(publication.routing_key(), "activity");

        let keyed = Publication::new("activity").with_partition_key("tenant-a");
        assert_eq!(keyed.routing_key(), "tenant-a");
    }

    #[test]
    fn test_encode_decode_body() {
        let publication = Publication::encode("activity", &vec!["a", "b"]).unwrap();
        let body: Vec<String> = publication.decode().unwrap();
        assert_eq!(body, vec!["a", "b"]);
    }

    #[test]
    fn test_decode_malformed_body_fails() {
        let mut publication = Publication::new("activity");
        publication.data = b"not json".to_vec();
        assert!(publication.decode::<Vec<String>>().is_err());
    }

    #[test]
    fn test_double_unsubscribe_is_noop() {
        let subscription = Subscription::new(|| {});
        subscription.unsubscribe();
        subscription.unsubscribe();
    }
}
