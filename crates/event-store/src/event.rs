use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Metadata key carrying the id of the aggregate that recorded an event.
pub const AGGREGATE_ID: &str = "_aggregate_id";
/// Metadata key carrying the aggregate type.
pub const AGGREGATE_TYPE: &str = "_aggregate_type";
/// Metadata key carrying the aggregate version after the event.
pub const AGGREGATE_VERSION: &str = "_aggregate_version";

/// Unique identifier for an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(Uuid);

impl EventId {
    /// Creates a new random event ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates an event ID from an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for EventId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl From<EventId> for Uuid {
    fn from(id: EventId) -> Self {
        id.0
    }
}

/// Sequence number of an event within its stream (`no`).
///
/// Numbers start at 1 for the first event of a stream and increase with
/// every append. `Version::initial()` (0) means "nothing read yet".
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Version(i64);

impl Version {
    /// The largest representable position, used as the open end of reverse reads.
    pub const MAX: Version = Version(i64::MAX);

    /// Creates a new version from a raw value.
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    /// Returns the initial version (0), before any event.
    pub fn initial() -> Self {
        Self(0)
    }

    /// Returns the first version (1) for the first event.
    pub fn first() -> Self {
        Self(1)
    }

    /// Returns the next version.
    pub fn next(&self) -> Self {
        Self(self.0.saturating_add(1))
    }

    /// Returns the previous version.
    pub fn prev(&self) -> Self {
        Self(self.0.saturating_sub(1))
    }

    /// Returns the raw version value.
    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for Version {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl From<Version> for i64 {
    fn from(version: Version) -> Self {
        version.0
    }
}

/// A stored (or to-be-stored) event.
///
/// `no` is assigned by the store when the event is appended; whatever value
/// an envelope carries on the way in is ignored unless the persistence
/// strategy derives the number from `_aggregate_version` metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Unique identifier for this event.
    pub event_id: EventId,

    /// The message name (e.g., "OrderPlaced").
    pub event_name: String,

    /// The event payload as JSON.
    pub payload: serde_json::Value,

    /// Flat metadata map, stored as a JSON object.
    pub metadata: HashMap<String, serde_json::Value>,

    /// Position of the event in its stream.
    pub no: Version,

    /// When the event was created.
    pub created_at: DateTime<Utc>,
}

impl EventEnvelope {
    /// Creates a new event envelope builder.
    pub fn builder() -> EventEnvelopeBuilder {
        EventEnvelopeBuilder::default()
    }

    /// Deserializes the payload into a concrete type.
    pub fn decode_payload<T: for<'de> Deserialize<'de>>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.payload.clone())
    }

    /// Returns the `_aggregate_version` metadata entry when it is an integer.
    pub fn aggregate_version(&self) -> Option<Version> {
        self.metadata
            .get(AGGREGATE_VERSION)
            .and_then(serde_json::Value::as_i64)
            .map(Version::new)
    }
}

/// Builder for constructing event envelopes.
#[derive(Debug, Default)]
pub struct EventEnvelopeBuilder {
    event_id: Option<EventId>,
    event_name: Option<String>,
    payload: Option<serde_json::Value>,
    metadata: HashMap<String, serde_json::Value>,
    no: Option<Version>,
    created_at: Option<DateTime<Utc>>,
}

impl EventEnvelopeBuilder {
    /// Sets the event ID. If not set, a new ID will be generated.
    pub fn event_id(mut self, id: EventId) -> Self {
        self.event_id = Some(id);
        self
    }

    /// Sets the message name.
    pub fn event_name(mut self, event_name: impl Into<String>) -> Self {
        self.event_name = Some(event_name.into());
        self
    }

    /// Sets the payload from a serializable value.
    pub fn payload<T: Serialize>(mut self, payload: &T) -> Result<Self, serde_json::Error> {
        self.payload = Some(serde_json::to_value(payload)?);
        Ok(self)
    }

    /// Sets the payload from a raw JSON value.
    pub fn payload_raw(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Adds a metadata entry.
    pub fn metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Records the aggregate that produced the event.
    pub fn aggregate(
        self,
        aggregate_type: impl Into<String>,
        aggregate_id: impl Into<String>,
        version: Version,
    ) -> Self {
        self.metadata(AGGREGATE_TYPE, serde_json::Value::String(aggregate_type.into()))
            .metadata(AGGREGATE_ID, serde_json::Value::String(aggregate_id.into()))
            .metadata(AGGREGATE_VERSION, serde_json::Value::from(version.as_i64()))
    }

    /// Sets the stream position. Only meaningful for envelopes read back from a store.
    pub fn no(mut self, no: Version) -> Self {
        self.no = Some(no);
        self
    }

    /// Sets the creation time. If not set, the current time will be used.
    pub fn created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = Some(created_at);
        self
    }

    /// Builds the event envelope.
    ///
    /// # Panics
    ///
    /// Panics if `event_name` or `payload` is not set.
    pub fn build(self) -> EventEnvelope {
        EventEnvelope {
            event_id: self.event_id.unwrap_or_default(),
            event_name: self.event_name.expect("event_name is required"),
            payload: self.payload.expect("payload is required"),
            metadata: self.metadata,
            no: self.no.unwrap_or_default(),
            created_at: self.created_at.unwrap_or_else(Utc::now),
        }
    }

    /// Tries to build the event envelope, returning None if required fields are missing.
    pub fn try_build(self) -> Option<EventEnvelope> {
        Some(EventEnvelope {
            event_id: self.event_id.unwrap_or_default(),
            event_name: self.event_name?,
            payload: self.payload?,
            metadata: self.metadata,
            no: self.no.unwrap_or_default(),
            created_at: self.created_at.unwrap_or_else(Utc::now),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_id_new_creates_unique_ids() {
        let id1 = EventId::new();
        let id2 = EventId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn version_ordering() {
        let v1 = Version::new(1);
        let v2 = Version::new(2);
        assert!(v1 < v2);
        assert_eq!(v1.next(), v2);
        assert_eq!(v2.prev(), v1);
    }

    #[test]
    fn version_initial_and_first() {
        assert_eq!(Version::initial().as_i64(), 0);
        assert_eq!(Version::first().as_i64(), 1);
        assert_eq!(Version::initial().next(), Version::first());
        assert_eq!(Version::MAX.next(), Version::MAX);
    }

    #[test]
    fn event_envelope_builder() {
        let payload = serde_json::json!({"item": "test"});

        let envelope = EventEnvelope::builder()
            .event_name("OrderPlaced")
            .payload_raw(payload.clone())
            .metadata("correlation_id", serde_json::json!("123"))
            .build();

        assert_eq!(envelope.event_name, "OrderPlaced");
        assert_eq!(envelope.payload, payload);
        assert_eq!(envelope.no, Version::initial());
        assert_eq!(
            envelope.metadata.get("correlation_id"),
            Some(&serde_json::json!("123"))
        );
    }

    #[test]
    fn aggregate_metadata_is_recorded() {
        let envelope = EventEnvelope::builder()
            .event_name("OrderPlaced")
            .payload_raw(serde_json::json!({}))
            .aggregate("order", "o-1", Version::new(3))
            .build();

        assert_eq!(envelope.aggregate_version(), Some(Version::new(3)));
        assert_eq!(
            envelope.metadata.get(AGGREGATE_ID),
            Some(&serde_json::json!("o-1"))
        );
        assert_eq!(
            envelope.metadata.get(AGGREGATE_TYPE),
            Some(&serde_json::json!("order"))
        );
    }

    #[test]
    fn decode_payload_into_type() {
        #[derive(Deserialize, PartialEq, Debug)]
        struct Placed {
            total: i64,
        }

        let envelope = EventEnvelope::builder()
            .event_name("OrderPlaced")
            .payload_raw(serde_json::json!({"total": 42}))
            .build();

        assert_eq!(envelope.decode_payload::<Placed>().unwrap(), Placed { total: 42 });
    }

    #[test]
    fn event_envelope_try_build_returns_none_on_missing_fields() {
        let result = EventEnvelope::builder().try_build();
        assert!(result.is_none());
    }
}
