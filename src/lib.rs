//! # Beacon
//!
//! Real-time event delivery for service backends: a WebSocket push hub, a
//! pluggable publish/subscribe layer, and a service-announcement protocol
//! for gateway routing and admission control.
//!
//! ## Features
//!
//! - **Push hub**: single-control-loop fan-out of events to live sessions
//! - **Pluggable pub/sub**: in-process fan-out, or broker-backed so
//!   multiple instances stay consistent
//! - **Session actors**: per-connection read/write loops with structured
//!   cancellation
//! - **Announcements**: periodic `hello`/`goodbye` snapshots with load and
//!   per-identity rate-limit descriptors
//!
//! ## Modules
//!
//! - [`push`]: the hub, sessions, events, and the `/events` endpoint
//! - [`pubsub`]: the publish/subscribe contract and both backends
//! - [`announce`]: announcement types, producer, and gateway-side table
//! - [`server`]: the Axum surface, state, security hooks, registry
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use beacon::config::Config;
//! use beacon::push::{Event, EventKind};
//! use beacon::server::AppState;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let state = Arc::new(AppState::new(Config::default()));
//!
//!     // Run the hub's control loop
//!     let hub = Arc::clone(state.hub().expect("push enabled"));
//!     let hub_task = hub.start();
//!
//!     // Push an event to every live session
//!     let event = Event::new(EventKind::Create, "list", &serde_json::json!({"name": "groceries"}))?;
//!     state.push_events(vec![event]).await?;
//!
//!     // Serve /events and /health until shutdown
//!     beacon::server::serve(Arc::clone(&state), "0.0.0.0:8087").await?;
//!
//!     hub.stop().await?;
//!     hub_task.await??;
//!     Ok(())
//! }
//! ```

pub mod announce;
pub mod config;
pub mod pubsub;
pub mod push;
pub mod server;

// Re-export top-level types for convenience
pub use announce::{
    Announcer, ApiLimiter, IdentityLimiters, PeerAnnouncement, RouteInfo, ServiceAnnouncement,
    ServiceTable, Status,
};

pub use config::{Config, ConfigError};

pub use pubsub::{
    BrokerTransport, DistributedPubSub, LocalPubSub, MemoryBroker, PubSub, PubSubError,
    Publication, Subscription,
};

pub use push::{Event, EventBackend, EventKind, HubConfig, HubState, PushError, PushHub, PushSession};

pub use server::{
    ApiError, ApiResult, AppState, Authenticator, Authorizer, HealthHandler, Identity, Processor,
    ProcessorRegistry, RegistryError, RequestContext, SecurityError,
};
