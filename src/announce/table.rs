//! Service Table
//!
//! Gateway-side view of announced backend instances, keyed by each
//! announcement's routing key. `hello` upserts an entry, `goodbye` removes
//! it; duplicates and out-of-order messages are tolerated by construction.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::pubsub::{PubSub, PubSubError};

use super::types::{ServiceAnnouncement, Status};

type Services = HashMap<String, ServiceAnnouncement>;

/// Routing table built from service announcements
#[derive(Default)]
pub struct ServiceTable {
    services: RwLock<Services>,
}

impl ServiceTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Services> {
        self.services
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Services> {
        self.services
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Apply one announcement: `hello` upserts the entry under its key,
    /// `goodbye` removes it. A `goodbye` with no matching entry is a no-op.
    pub fn observe(&self, announcement: ServiceAnnouncement) {
        let key = announcement.key();
        match announcement.status {
            Status::Hello => {
                tracing::debug!(key = %key, load = announcement.load, "service hello");
                self.write().insert(key, announcement);
            }
            Status::Goodbye => {
                if self.write().remove(&key).is_some() {
                    tracing::info!(key = %key, "service withdrew");
                }
            }
        }
    }

    /// Look up the announcement registered under `key`
    pub fn get(&self, key: &str) -> Option<ServiceAnnouncement> {
        self.read().get(key).cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.read().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Keys of all currently registered services
    pub fn keys(&self) -> Vec<String> {
        self.read().keys().cloned().collect()
    }

    /// Subscribe the table to `topic` and feed it until cancelled.
    ///
    /// Malformed payloads are logged and dropped; one bad message never
    /// tears down the subscription.
    pub async fn watch(
        self: Arc<Self>,
        pubsub: Arc<dyn PubSub>,
        topic: &str,
        cancel: CancellationToken,
    ) -> Result<JoinHandle<()>, PubSubError> {
        let (tx, mut rx) = mpsc::channel(64);
        let subscription = pubsub.subscribe(tx, topic, None).await?;
        let topic = topic.to_string();

        Ok(tokio::spawn(async move {
            let _subscription = subscription;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    publication = rx.recv() => {
                        let Some(publication) = publication else { break };
                        match publication.decode::<ServiceAnnouncement>() {
                            Ok(announcement) => self.observe(announcement),
                            Err(error) => {
                                tracing::warn!(
                                    topic = %topic,
                                    error = %error,
                                    "dropping malformed announcement"
                                );
                            }
                        }
                    }
                }
            }
        }))
    }
}

impl std::fmt::Debug for ServiceTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceTable")
            .field("services", &self.keys())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pubsub::{LocalPubSub, Publication};

    fn announcement(name: &str, prefix: &str, status: Status, load: f64) -> ServiceAnnouncement {
        ServiceAnnouncement {
            name: name.to_string(),
            endpoint: "https://10.0.0.1:443".to_string(),
            push_endpoint: "https://10.0.0.1:443/events".to_string(),
            status,
            routes: HashMap::new(),
            versions: HashMap::new(),
            load,
            api_limiters: HashMap::new(),
            prefix: prefix.to_string(),
        }
    }

    #[test]
    fn test_hello_then_goodbye_removes_entry() {
        let table = ServiceTable::new();

        table.observe(announcement("api", "", Status::Hello, 0.4));
        assert!(table.contains("api"));

        table.observe(announcement("api", "", Status::Goodbye, 0.4));
        assert!(!table.contains("api"));
        assert!(table.is_empty());
    }

    #[test]
    fn test_duplicate_hello_is_idempotent_upsert() {
        let table = ServiceTable::new();

        table.observe(announcement("api", "", Status::Hello, 0.4));
        table.observe(announcement("api", "", Status::Hello, 0.9));

        assert_eq!(table.len(), 1);
        assert_eq!(table.get("api").unwrap().load, 0.9);
    }

    #[test]
    fn test_goodbye_without_entry_is_noop() {
        let table = ServiceTable::new();
        table.observe(announcement("ghost", "", Status::Goodbye, 0.0));
        assert!(table.is_empty());
    }

    #[test]
    fn test_prefixed_services_key_separately() {
        let table = ServiceTable::new();

        table.observe(announcement("svc", "", Status::Hello, 0.1));
        table.observe(announcement("svc", "v1", Status::Hello, 0.2));

        assert_eq!(table.len(), 2);
        assert!(table.contains("svc"));
        assert!(table.contains("v1/svc"));

        table.observe(announcement("svc", "v1", Status::Goodbye, 0.2));
        assert!(table.contains("svc"));
        assert!(!table.contains("v1/svc"));
    }

    #[tokio::test]
    async fn test_watch_feeds_table_and_survives_garbage() {
        let pubsub: Arc<dyn PubSub> = Arc::new(LocalPubSub::new());
        let table = Arc::new(ServiceTable::new());
        let cancel = CancellationToken::new();

        let task = Arc::clone(&table)
            .watch(Arc::clone(&pubsub), "services", cancel.clone())
            .await
            .unwrap();

        // A malformed payload first, then a valid hello.
        let mut garbage = Publication::new("services");
        garbage.data = b"not an announcement".to_vec();
        pubsub.publish(garbage).await.unwrap();

        let hello =
            Publication::encode("services", &announcement("api", "", Status::Hello, 0.4)).unwrap();
        pubsub.publish(hello).await.unwrap();

        // Wait for the hello to land.
        while !table.contains("api") {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }

        let goodbye =
            Publication::encode("services", &announcement("api", "", Status::Goodbye, 0.4))
                .unwrap();
        pubsub.publish(goodbye).await.unwrap();

        while table.contains("api") {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }

        cancel.cancel();
        task.await.unwrap();
    }
}
