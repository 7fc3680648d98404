//! Event Types
//!
//! An event pairs an opaque serialized entity with the identity it concerns
//! and the kind of change. Events are immutable once created; fan-out paths
//! share them read-only.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::PushError;

/// Kind of change an event describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Create,
    Update,
    Delete,
}

/// One unit of change pushed to live sessions.
///
/// The entity payload is opaque to the delivery path: it is captured as
/// serialized JSON at construction time and re-emitted verbatim.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    kind: EventKind,
    identity: String,
    entity: serde_json::Value,
    timestamp: DateTime<Utc>,
}

impl Event {
    /// Create an event for `identity` carrying `entity` serialized as JSON
    pub fn new<T: Serialize>(
        kind: EventKind,
        identity: impl Into<String>,
        entity: &T,
    ) -> Result<Self, PushError> {
        Ok(Self {
            kind,
            identity: identity.into(),
            entity: serde_json::to_value(entity)?,
            timestamp: Utc::now(),
        })
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    /// Name of the resource identity this event concerns
    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn entity(&self) -> &serde_json::Value {
        &self.entity
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Serialize this event as one discrete wire message
    pub fn encode(&self) -> Result<String, PushError> {
        Ok(serde_json::to_string(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_event_captures_entity_as_json() {
        let mut entity = HashMap::new();
        entity.insert("name", "reader");

        let event = Event::new(EventKind::Create, "list", &entity).unwrap();
        assert_eq!(event.identity(), "list");
        assert_eq!(event.kind(), EventKind::Create);
        assert_eq!(event.entity()["name"], "reader");
    }

    #[test]
    fn test_encode_is_one_discrete_message() {
        let event = Event::new(EventKind::Delete, "task", &serde_json::json!({"id": "42"})).unwrap();
        let frame = event.encode().unwrap();

        assert!(frame.contains("\"type\":\"delete\""));
        assert!(frame.contains("\"identity\":\"task\""));
        assert!(!frame.contains('\n'));
    }
}
