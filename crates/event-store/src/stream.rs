use std::collections::HashMap;

use crate::{EventEnvelope, StreamName};

/// A stream to be created: its name, catalog metadata and initial events.
#[derive(Debug, Clone)]
pub struct Stream {
    pub name: StreamName,
    pub metadata: HashMap<String, serde_json::Value>,
    pub events: Vec<EventEnvelope>,
}

impl Stream {
    /// Creates an empty stream without metadata.
    pub fn new(name: StreamName) -> Self {
        Self {
            name,
            metadata: HashMap::new(),
            events: Vec::new(),
        }
    }

    /// Sets the initial events appended right after the stream is created.
    pub fn with_events(mut self, events: Vec<EventEnvelope>) -> Self {
        self.events = events;
        self
    }

    /// Adds a catalog metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}
