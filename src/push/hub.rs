//! Push Hub
//!
//! The central coordinator for live sessions. All mutations of the session
//! registry flow as [`HubCommand`]s through one bounded channel into a
//! single control loop, which is what makes the registry safe without a
//! lock: every read and write happens on one logical thread of control, and
//! commands apply in submission order across all command kinds.
//!
//! Backpressure: the command channel is bounded and senders await when it
//! is full; commands are never dropped. Event fan-out to an individual
//! session is non-blocking instead: a session whose outbound buffer is
//! full misses that event (logged and skipped) so it cannot stall delivery
//! to the others.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::pubsub::{PubSub, PubSubError, Publication};

use super::event::Event;
use super::session::PushSession;

/// Commands processed by the hub's control loop
pub(crate) enum HubCommand {
    Register(Arc<PushSession>),
    Unregister(Arc<PushSession>),
    Event(Arc<Event>),
    Close,
}

/// Lifecycle states of a hub
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HubState {
    Idle,
    Running,
    Stopped,
}

/// Where pushed events fan out.
///
/// Selected once at construction. With a distributed backend an event is
/// published to the broker instead of fanned out locally; local sessions
/// then receive it through the hub's own subscription to the events topic,
/// exactly like sessions on every other instance.
pub enum EventBackend {
    Local,
    Distributed(Arc<dyn PubSub>),
}

/// Configuration for the push hub
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Topic events travel on when a distributed backend is configured
    pub events_topic: String,
    /// Capacity of the command channel
    pub command_capacity: usize,
    /// Outbound frame buffer per session
    pub session_buffer: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            events_topic: "beacon.events".to_string(),
            command_capacity: 256,
            session_buffer: 64,
        }
    }
}

/// Central coordinator owning session registration and event fan-out
pub struct PushHub {
    commands: mpsc::Sender<HubCommand>,
    receiver: Mutex<Option<mpsc::Receiver<HubCommand>>>,
    backend: EventBackend,
    config: HubConfig,
    state: watch::Sender<HubState>,
}

impl PushHub {
    /// Create a hub in the `Idle` state
    pub fn new(config: HubConfig, backend: EventBackend) -> Self {
        let (commands, receiver) = mpsc::channel(config.command_capacity.max(1));
        let (state, _) = watch::channel(HubState::Idle);

        Self {
            commands,
            receiver: Mutex::new(Some(receiver)),
            backend,
            config,
            state,
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> HubState {
        *self.state.borrow()
    }

    /// Observe lifecycle state changes
    pub fn subscribe_state(&self) -> watch::Receiver<HubState> {
        self.state.subscribe()
    }

    /// Hub configuration
    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    /// Enqueue a session registration.
    ///
    /// Registering an identifier that is already present is a no-op.
    pub async fn register(&self, session: Arc<PushSession>) -> Result<(), PushError> {
        self.commands
            .send(HubCommand::Register(session))
            .await
            .map_err(|_| PushError::NotRunning)
    }

    /// Enqueue a session unregistration. Unknown sessions are a no-op.
    pub async fn unregister(&self, session: Arc<PushSession>) -> Result<(), PushError> {
        self.commands
            .send(HubCommand::Unregister(session))
            .await
            .map_err(|_| PushError::NotRunning)
    }

    /// Push events to all live sessions.
    ///
    /// Without a distributed backend each event is enqueued for local
    /// fan-out. With one, each event is serialized and published to the
    /// broker instead, best-effort: the first failure is returned and the
    /// remaining events are not sent, with no internal retry.
    pub async fn push_events(&self, events: Vec<Event>) -> Result<(), PushError> {
        match &self.backend {
            EventBackend::Local => {
                for event in events {
                    self.commands
                        .send(HubCommand::Event(Arc::new(event)))
                        .await
                        .map_err(|_| PushError::NotRunning)?;
                }
            }
            EventBackend::Distributed(pubsub) => {
                for event in events {
                    let publication = Publication::encode(&self.config.events_topic, &event)?;
                    pubsub.publish(publication).await?;
                }
            }
        }
        Ok(())
    }

    /// Spawn the control loop
    pub fn start(self: &Arc<Self>) -> JoinHandle<Result<(), PushError>> {
        let hub = Arc::clone(self);
        tokio::spawn(async move { hub.run().await })
    }

    /// Run the control loop until a `Close` command arrives.
    ///
    /// Calling `run` on a hub that already ran is a configuration error.
    pub async fn run(&self) -> Result<(), PushError> {
        let mut receiver = self
            .receiver
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
            .ok_or(PushError::AlreadyRunning)?;

        // With a distributed backend the hub consumes its own events topic;
        // inbound publications re-enter the loop as Event commands.
        let _subscription = match &self.backend {
            EventBackend::Distributed(pubsub) => {
                let (tx, mut rx) = mpsc::channel(self.config.command_capacity.max(1));
                let subscription = match pubsub.subscribe(tx, &self.config.events_topic, None).await
                {
                    Ok(subscription) => subscription,
                    Err(error) => {
                        self.state.send_replace(HubState::Stopped);
                        return Err(PushError::PubSub(error));
                    }
                };
                let commands = self.commands.clone();
                tokio::spawn(async move {
                    while let Some(publication) = rx.recv().await {
                        let event = match publication.decode::<Event>() {
                            Ok(event) => event,
                            Err(error) => {
                                tracing::warn!(error = %error, "dropping malformed event publication");
                                continue;
                            }
                        };
                        if commands.send(HubCommand::Event(Arc::new(event))).await.is_err() {
                            break;
                        }
                    }
                });
                Some(subscription)
            }
            EventBackend::Local => None,
        };

        self.state.send_replace(HubState::Running);
        tracing::info!(topic = %self.config.events_topic, "push hub started");

        let mut sessions: HashMap<String, Arc<PushSession>> = HashMap::new();

        while let Some(command) = receiver.recv().await {
            match command {
                HubCommand::Register(session) => {
                    if sessions.contains_key(session.identifier()) {
                        continue;
                    }
                    tracing::info!(
                        session_id = %session.identifier(),
                        remote_addr = ?session.remote_addr(),
                        total = sessions.len() + 1,
                        "push session registered"
                    );
                    sessions.insert(session.identifier().to_string(), session);
                }
                HubCommand::Unregister(session) => {
                    if sessions.remove(session.identifier()).is_none() {
                        continue;
                    }
                    tracing::info!(
                        session_id = %session.identifier(),
                        total = sessions.len(),
                        "push session unregistered"
                    );
                }
                HubCommand::Event(event) => {
                    for session in sessions.values() {
                        let frame = match event.encode() {
                            Ok(frame) => frame,
                            Err(error) => {
                                tracing::error!(
                                    session_id = %session.identifier(),
                                    error = %error,
                                    "unable to encode event, skipping session"
                                );
                                continue;
                            }
                        };
                        if let Err(error) = session.enqueue_frame(frame) {
                            tracing::warn!(
                                session_id = %session.identifier(),
                                error = %error,
                                "session outbound buffer unavailable, skipping event"
                            );
                        }
                    }
                }
                HubCommand::Close => {
                    for session in sessions.values() {
                        session.close();
                    }
                    sessions.clear();
                    break;
                }
            }
        }

        self.state.send_replace(HubState::Stopped);
        tracing::info!("push hub stopped");
        Ok(())
    }

    /// Signal termination and wait for the control loop to finish.
    ///
    /// When `stop` returns, the session registry is empty and every
    /// previously registered session has been asked to close.
    pub async fn stop(&self) -> Result<(), PushError> {
        if self.state() == HubState::Stopped {
            return Ok(());
        }
        self.commands
            .send(HubCommand::Close)
            .await
            .map_err(|_| PushError::NotRunning)?;

        let mut state = self.state.subscribe();
        state
            .wait_for(|state| *state == HubState::Stopped)
            .await
            .map_err(|_| PushError::NotRunning)?;
        Ok(())
    }
}

/// Errors surfaced by the push layer
#[derive(Debug, Error)]
pub enum PushError {
    /// An event could not be serialized
    #[error("Failed to encode event: {0}")]
    Encode(#[from] serde_json::Error),

    /// The hub's control loop is not accepting commands
    #[error("Push hub is not running")]
    NotRunning,

    /// `run` was called on a hub that already ran
    #[error("Push hub is already running")]
    AlreadyRunning,

    /// The distributed backend reported a failure
    #[error("Pub/sub error: {0}")]
    PubSub(#[from] PubSubError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pubsub::{LocalPubSub, Subscription};
    use axum::http::HeaderMap;
    use std::collections::HashMap as StdHashMap;
    use tokio::sync::mpsc::Receiver;

    fn test_session() -> (Arc<PushSession>, Receiver<String>) {
        PushSession::new(StdHashMap::new(), HeaderMap::new(), None, 8)
    }

    fn test_event(name: &str) -> Event {
        Event::new(
            crate::push::EventKind::Create,
            "list",
            &serde_json::json!({ "name": name }),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_local_fanout_in_publish_order() {
        let hub = Arc::new(PushHub::new(HubConfig::default(), EventBackend::Local));
        let task = hub.start();

        let (a, mut rx_a) = test_session();
        let (b, mut rx_b) = test_session();
        hub.register(Arc::clone(&a)).await.unwrap();
        hub.register(Arc::clone(&b)).await.unwrap();

        hub.push_events(vec![test_event("first"), test_event("second")])
            .await
            .unwrap();

        for rx in [&mut rx_a, &mut rx_b] {
            let first = rx.recv().await.unwrap();
            let second = rx.recv().await.unwrap();
            assert!(first.contains("first"));
            assert!(second.contains("second"));
        }

        hub.stop().await.unwrap();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_duplicate_registration_is_noop() {
        let hub = Arc::new(PushHub::new(HubConfig::default(), EventBackend::Local));
        let task = hub.start();

        let (session, mut rx) = test_session();
        hub.register(Arc::clone(&session)).await.unwrap();
        hub.register(Arc::clone(&session)).await.unwrap();

        hub.push_events(vec![test_event("only-once")]).await.unwrap();

        // One registry entry means exactly one delivery.
        assert!(rx.recv().await.is_some());
        tokio::task::yield_now().await;
        assert!(rx.try_recv().is_err());

        hub.stop().await.unwrap();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_unregistered_session_receives_nothing() {
        let hub = Arc::new(PushHub::new(HubConfig::default(), EventBackend::Local));
        let task = hub.start();

        let (session, mut rx) = test_session();
        hub.register(Arc::clone(&session)).await.unwrap();
        hub.unregister(Arc::clone(&session)).await.unwrap();

        // Unregistering twice is a no-op.
        hub.unregister(Arc::clone(&session)).await.unwrap();

        hub.push_events(vec![test_event("missed")]).await.unwrap();

        // Commands apply in submission order, so a probe event delivered to
        // a fresh session proves the earlier event was already fanned out.
        let (probe, mut probe_rx) = test_session();
        hub.register(Arc::clone(&probe)).await.unwrap();
        hub.push_events(vec![test_event("probe")]).await.unwrap();
        assert!(probe_rx.recv().await.is_some());

        assert!(rx.try_recv().is_err());

        hub.stop().await.unwrap();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_stop_closes_every_session() {
        let hub = Arc::new(PushHub::new(HubConfig::default(), EventBackend::Local));
        let task = hub.start();

        let (a, _rx_a) = test_session();
        let (b, _rx_b) = test_session();
        hub.register(Arc::clone(&a)).await.unwrap();
        hub.register(Arc::clone(&b)).await.unwrap();

        hub.stop().await.unwrap();
        task.await.unwrap().unwrap();

        assert!(a.is_closed());
        assert!(b.is_closed());
        assert_eq!(hub.state(), HubState::Stopped);

        // The control loop is gone; registration now fails explicitly.
        let (late, _rx_late) = test_session();
        assert!(matches!(
            hub.register(late).await,
            Err(PushError::NotRunning)
        ));
    }

    #[tokio::test]
    async fn test_stop_twice_is_ok() {
        let hub = Arc::new(PushHub::new(HubConfig::default(), EventBackend::Local));
        let task = hub.start();

        hub.stop().await.unwrap();
        hub.stop().await.unwrap();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_run_twice_is_a_configuration_error() {
        let hub = Arc::new(PushHub::new(HubConfig::default(), EventBackend::Local));
        let task = hub.start();

        // Wait for the first loop to take the receiver.
        let mut state = hub.subscribe_state();
        state
            .wait_for(|state| *state == HubState::Running)
            .await
            .unwrap();

        assert!(matches!(hub.run().await, Err(PushError::AlreadyRunning)));

        hub.stop().await.unwrap();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_distributed_backend_routes_through_broker() {
        let pubsub: Arc<dyn PubSub> = Arc::new(LocalPubSub::new());
        pubsub.connect().await.unwrap();

        let hub = Arc::new(PushHub::new(
            HubConfig::default(),
            EventBackend::Distributed(Arc::clone(&pubsub)),
        ));
        let task = hub.start();

        // Wait until the hub's own subscription is in place.
        let mut state = hub.subscribe_state();
        state
            .wait_for(|state| *state == HubState::Running)
            .await
            .unwrap();

        let (session, mut rx) = test_session();
        hub.register(Arc::clone(&session)).await.unwrap();

        // An independent subscriber proves the event went through the
        // backend rather than the local fan-out path.
        let (observer_tx, mut observer_rx) = mpsc::channel(8);
        let _observer: Subscription = pubsub
            .subscribe(observer_tx, &hub.config().events_topic, None)
            .await
            .unwrap();

        hub.push_events(vec![test_event("relayed")]).await.unwrap();

        let frame = rx.recv().await.unwrap();
        assert!(frame.contains("relayed"));

        let publication = observer_rx.recv().await.unwrap();
        assert!(publication.decode::<Event>().is_ok());

        hub.stop().await.unwrap();
        task.await.unwrap().unwrap();
    }
}
