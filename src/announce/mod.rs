//! Service Announcement Protocol
//!
//! Periodic serialized snapshots describing a backend instance (identity,
//! endpoints, load, route table, and per-identity admission limits), used
//! by an upstream gateway to build its routing and admission tables.
//!
//! - **Announcer**: publishes `hello` on a timer and one `goodbye` at
//!   graceful shutdown
//! - **ServiceTable**: the gateway-side consumer, keyed by
//!   [`ServiceAnnouncement::key`]
//! - **Types**: the wire structures, with stable field names
//!
//! Announcements travel through the pub/sub layer and never touch the push
//! hub's event path.

mod announcer;
mod table;
mod types;

pub use announcer::{Announcer, LoadSampler};
pub use table::ServiceTable;
pub use types::{
    ApiLimiter, IdentityLimiters, PeerAnnouncement, RouteInfo, ServiceAnnouncement, Status,
};
