//! Service Announcer
//!
//! Periodic snapshot producer: each tick builds a `hello` announcement with
//! the instance's current load and admission descriptors and publishes it
//! on the announce topic. Runs alongside the push hub but is decoupled from
//! its event path. On cancellation it publishes exactly one `goodbye` and
//! returns.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::pubsub::{PubSub, PubSubError, Publication};

use super::types::{IdentityLimiters, RouteInfo, ServiceAnnouncement, Status};

/// Callback sampling the instance's current load metric
pub type LoadSampler = Arc<dyn Fn() -> f64 + Send + Sync>;

/// Periodic producer of service announcements
pub struct Announcer {
    pubsub: Arc<dyn PubSub>,
    topic: String,
    interval: Duration,
    name: String,
    prefix: String,
    endpoint: String,
    push_endpoint: String,
    routes: HashMap<i32, Vec<RouteInfo>>,
    versions: HashMap<String, serde_json::Value>,
    limiters: IdentityLimiters,
    load: LoadSampler,
}

impl Announcer {
    /// Create an announcer publishing on `topic` for the instance `name`
    pub fn new(
        pubsub: Arc<dyn PubSub>,
        topic: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            pubsub,
            topic: topic.into(),
            interval: Duration::from_secs(5),
            name: name.into(),
            prefix: String::new(),
            endpoint: String::new(),
            push_endpoint: String::new(),
            routes: HashMap::new(),
            versions: HashMap::new(),
            limiters: IdentityLimiters::new(),
            load: Arc::new(|| 0.0),
        }
    }

    /// Set the announce interval
    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Set the routing prefix (part of the gateway key)
    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Set the reachable API and push endpoints
    pub fn endpoints(mut self, endpoint: impl Into<String>, push_endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self.push_endpoint = push_endpoint.into();
        self
    }

    /// Set the announced route table
    pub fn routes(mut self, routes: HashMap<i32, Vec<RouteInfo>>) -> Self {
        self.routes = routes;
        self
    }

    /// Set the supported version map
    pub fn versions(mut self, versions: HashMap<String, serde_json::Value>) -> Self {
        self.versions = versions;
        self
    }

    /// Set the per-identity admission descriptors
    pub fn limiters(mut self, limiters: IdentityLimiters) -> Self {
        self.limiters = limiters;
        self
    }

    /// Set the load sampling callback
    pub fn load_sampler(mut self, sampler: LoadSampler) -> Self {
        self.load = sampler;
        self
    }

    fn snapshot(&self, status: Status) -> ServiceAnnouncement {
        ServiceAnnouncement {
            name: self.name.clone(),
            endpoint: self.endpoint.clone(),
            push_endpoint: self.push_endpoint.clone(),
            status,
            routes: self.routes.clone(),
            versions: self.versions.clone(),
            load: (self.load)(),
            api_limiters: self.limiters.clone(),
            prefix: self.prefix.clone(),
        }
    }

    async fn announce(&self, status: Status) -> Result<(), PubSubError> {
        let announcement = self.snapshot(status);
        let publication = Publication::encode(&self.topic, &announcement)?;
        self.pubsub.publish(publication).await
    }

    /// Spawn the announce loop
    pub fn start(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(cancel).await })
    }

    /// Publish `hello` every tick until cancelled, then one `goodbye`.
    ///
    /// Announcing is best-effort: a failed publish is logged and the loop
    /// keeps ticking.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        tracing::info!(
            topic = %self.topic,
            name = %self.name,
            interval = ?self.interval,
            "service announcer started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(error) = self.announce(Status::Hello).await {
                        tracing::warn!(
                            topic = %self.topic,
                            error = %error,
                            "failed to publish hello announcement"
                        );
                    }
                }
                _ = cancel.cancelled() => {
                    if let Err(error) = self.announce(Status::Goodbye).await {
                        tracing::warn!(
                            topic = %self.topic,
                            error = %error,
                            "failed to publish goodbye announcement"
                        );
                    }
                    tracing::info!(name = %self.name, "service announcer stopped");
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pubsub::LocalPubSub;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_hello_every_tick_then_goodbye_once() {
        let pubsub: Arc<dyn PubSub> = Arc::new(LocalPubSub::new());

        let (tx, mut rx) = mpsc::channel(16);
        let _subscription = pubsub.subscribe(tx, "services", None).await.unwrap();

        let announcer = Arc::new(
            Announcer::new(Arc::clone(&pubsub), "services", "api")
                .interval(Duration::from_millis(10))
                .endpoints("https://10.0.0.1:443", "https://10.0.0.1:443/events")
                .load_sampler(Arc::new(|| 0.4)),
        );

        let cancel = CancellationToken::new();
        let task = Arc::clone(&announcer).start(cancel.clone());

        // First tick fires immediately.
        let first = rx.recv().await.unwrap();
        let hello: ServiceAnnouncement = first.decode().unwrap();
        assert_eq!(hello.status, Status::Hello);
        assert_eq!(hello.name, "api");
        assert_eq!(hello.load, 0.4);

        cancel.cancel();
        task.await.unwrap();

        // The goodbye was published before the loop returned; drain until
        // it arrives.
        loop {
            let publication = rx.recv().await.unwrap();
            let announcement: ServiceAnnouncement = publication.decode().unwrap();
            if announcement.status == Status::Goodbye {
                break;
            }
        }
    }
}
