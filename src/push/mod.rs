//! Real-Time Push Delivery
//!
//! Fans application events out to live WebSocket sessions.
//!
//! ## Architecture
//!
//! - **PushHub**: single control loop owning the session registry,
//!   consuming register/unregister/event/close commands
//! - **PushSession**: one live connection: identity claims, handshake
//!   parameters, cancellation for its read and write loops
//! - **Handler**: the `/events` upgrade endpoint and the connection loops
//! - **Event**: an opaque serialized payload plus identity and change kind
//!
//! Events pushed through a hub with a distributed backend travel through
//! the broker and come back through the hub's own subscription, so every
//! instance, including the publishing one, delivers them the same way.

mod event;
mod handler;
mod hub;
mod session;

pub use event::{Event, EventKind};
pub use handler::events_handler;
pub use hub::{EventBackend, HubConfig, HubState, PushError, PushHub};
pub use session::PushSession;
