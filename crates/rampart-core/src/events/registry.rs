//! Decrypted events and the type registry that constructs them.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::EventError;

/// A decrypted room event.
///
/// The content stays schemaless JSON; typing it further is the
/// application's concern, hooked in through [`EventCatalog`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomEvent {
    /// Event type, e.g. `m.room.message`
    #[serde(rename = "type")]
    pub event_type: String,
    /// Server-assigned event id, absent before the event is sent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    /// Sending user
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<String>,
    /// Server timestamp, milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin_server_ts: Option<u64>,
    /// Event content
    pub content: Value,
    /// Cleartext metadata carried over from the envelope
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unsigned: Option<Value>,
}

/// Construction of decrypted events from their payload JSON.
///
/// The codec is generic over this, so applications can plug in their own
/// event model. [`TypeRegistry`] is the default implementation.
pub trait EventCatalog {
    /// Build an event from a decrypted payload.
    ///
    /// The payload must carry at least `type` and `content`.
    fn construct(&self, payload: &Value) -> Result<RoomEvent, EventError>;

    /// Serialize an event to the payload that gets encrypted.
    ///
    /// Only `type` and `content` belong in the payload; routing metadata
    /// travels on the envelope.
    fn serialize(&self, event: &RoomEvent) -> Value;
}

type EventFactory = Box<dyn Fn(RoomEvent) -> RoomEvent + Send + Sync>;

/// A table of per-type factories with a pass-through fallback.
///
/// Registered factories get to normalize or validate events of their
/// type; any type without a factory constructs as-is, so unknown event
/// types are never lost.
#[derive(Default)]
pub struct TypeRegistry {
    factories: HashMap<String, EventFactory>,
}

impl TypeRegistry {
    /// Create a registry with no per-type factories.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory for an event type, replacing any previous one.
    pub fn register(
        &mut self,
        event_type: impl Into<String>,
        factory: impl Fn(RoomEvent) -> RoomEvent + Send + Sync + 'static,
    ) {
        self.factories.insert(event_type.into(), Box::new(factory));
    }
}

impl std::fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut types: Vec<_> = self.factories.keys().collect();
        types.sort();
        f.debug_struct("TypeRegistry").field("types", &types).finish()
    }
}

impl EventCatalog for TypeRegistry {
    fn construct(&self, payload: &Value) -> Result<RoomEvent, EventError> {
        let event: RoomEvent = serde_json::from_value(payload.clone())
            .map_err(|e| EventError::MalformedEvent { reason: e.to_string() })?;

        Ok(match self.factories.get(&event.event_type) {
            Some(factory) => factory(event),
            None => event,
        })
    }

    fn serialize(&self, event: &RoomEvent) -> Value {
        serde_json::json!({ "type": event.event_type, "content": event.content })
    }
}
