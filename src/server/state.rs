//! Application State
//!
//! The explicit server handle threaded through routes and embedding code.
//! There is no process-wide default instance: everything that needs the
//! server receives this state.

use std::sync::Arc;
use std::time::Instant;

use crate::config::Config;
use crate::push::{EventBackend, HubConfig, PushError, PushHub};

use super::processor::ProcessorRegistry;
use super::security::{Authenticator, Authorizer};

/// Health check callback: `Ok` means the instance is healthy
pub type HealthHandler = Arc<dyn Fn() -> Result<(), String> + Send + Sync>;

/// Shared server state for all handlers and embedding code
pub struct AppState {
    config: Config,
    hub: Option<Arc<PushHub>>,
    processors: ProcessorRegistry,
    authenticator: Option<Arc<dyn Authenticator>>,
    authorizer: Option<Arc<dyn Authorizer>>,
    health: Option<HealthHandler>,
    start_time: Instant,
}

impl AppState {
    /// Create server state. With push enabled in the config the hub fans
    /// out locally; use [`with_backend`](AppState::with_backend) to relay
    /// through a distributed backend instead.
    pub fn new(config: Config) -> Self {
        let backend = EventBackend::Local;
        Self::with_backend(config, backend)
    }

    /// Create server state with an explicit event backend
    pub fn with_backend(config: Config, backend: EventBackend) -> Self {
        let hub = if config.push.enabled {
            let hub_config = HubConfig {
                events_topic: config.push.events_topic.clone(),
                command_capacity: config.push.command_capacity,
                session_buffer: config.push.session_buffer,
            };
            Some(Arc::new(PushHub::new(hub_config, backend)))
        } else {
            None
        };

        Self {
            config,
            hub,
            processors: ProcessorRegistry::new(),
            authenticator: None,
            authorizer: None,
            health: None,
            start_time: Instant::now(),
        }
    }

    /// Set the authenticator invoked before dispatch
    pub fn set_authenticator(&mut self, authenticator: Arc<dyn Authenticator>) {
        self.authenticator = Some(authenticator);
    }

    /// Set the authorizer invoked before dispatch
    pub fn set_authorizer(&mut self, authorizer: Arc<dyn Authorizer>) {
        self.authorizer = Some(authorizer);
    }

    /// Set the liveness callback backing `/health`
    pub fn set_health_handler(&mut self, handler: HealthHandler) {
        self.health = Some(handler);
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The push hub, when push is enabled
    pub fn hub(&self) -> Option<&Arc<PushHub>> {
        self.hub.as_ref()
    }

    pub fn processors(&self) -> &ProcessorRegistry {
        &self.processors
    }

    pub fn authenticator(&self) -> Option<&Arc<dyn Authenticator>> {
        self.authenticator.as_ref()
    }

    pub fn authorizer(&self) -> Option<&Arc<dyn Authorizer>> {
        self.authorizer.as_ref()
    }

    pub(crate) fn health_handler(&self) -> Option<&HealthHandler> {
        self.health.as_ref()
    }

    /// Push events to all live sessions.
    ///
    /// # Panics
    ///
    /// Panics when push is disabled in the configuration: pushing events on
    /// a server that never delivers them is a programming error, not a
    /// runtime condition.
    pub async fn push_events(&self, events: Vec<crate::push::Event>) -> Result<(), PushError> {
        let hub = self
            .hub
            .as_ref()
            .expect("push_events called but push is not enabled");
        hub.push_events(events).await
    }

    /// Server uptime in seconds
    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}
