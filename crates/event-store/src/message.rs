//! Conversion of stored rows into envelopes.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{EventEnvelope, EventId, Result, Version};

/// An event row as read from a stream table.
#[derive(Debug, Clone)]
pub struct StoredEvent {
    pub no: i64,
    pub event_id: Uuid,
    pub event_name: String,
    pub payload: serde_json::Value,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Builds the envelope handed to readers from a stored row.
///
/// Plug in a custom factory to upcast or enrich events on the way out.
pub trait MessageFactory: Send + Sync + std::fmt::Debug {
    fn create_message(&self, row: StoredEvent) -> Result<EventEnvelope>;
}

/// Maps every column one to one.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvelopeMessageFactory;

impl MessageFactory for EnvelopeMessageFactory {
    fn create_message(&self, row: StoredEvent) -> Result<EventEnvelope> {
        let metadata: HashMap<String, serde_json::Value> = serde_json::from_value(row.metadata)?;

        Ok(EventEnvelope {
            event_id: EventId::from_uuid(row.event_id),
            event_name: row.event_name,
            payload: row.payload,
            metadata,
            no: Version::new(row.no),
            created_at: row.created_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_row_to_envelope() {
        let id = Uuid::new_v4();
        let row = StoredEvent {
            no: 7,
            event_id: id,
            event_name: "OrderShipped".to_string(),
            payload: serde_json::json!({"carrier": "ups"}),
            metadata: serde_json::json!({"_aggregate_version": 7}),
            created_at: Utc::now(),
        };

        let envelope = EnvelopeMessageFactory.create_message(row).unwrap();
        assert_eq!(envelope.no, Version::new(7));
        assert_eq!(envelope.event_id.as_uuid(), id);
        assert_eq!(envelope.aggregate_version(), Some(Version::new(7)));
    }

    #[test]
    fn rejects_non_object_metadata() {
        let row = StoredEvent {
            no: 1,
            event_id: Uuid::new_v4(),
            event_name: "X".to_string(),
            payload: serde_json::json!({}),
            metadata: serde_json::json!([1, 2]),
            created_at: Utc::now(),
        };

        assert!(EnvelopeMessageFactory.create_message(row).is_err());
    }
}
