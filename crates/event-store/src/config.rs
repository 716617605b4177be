//! Store configuration.

use crate::{EventStoreError, Result};

/// Default number of rows fetched per page when reading a stream.
pub const DEFAULT_LOAD_BATCH_SIZE: usize = 1000;

/// Default name of the stream catalog table.
pub const DEFAULT_EVENT_STREAMS_TABLE: &str = "event_streams";

/// Settings shared by the store implementations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventStoreConfig {
    /// Upper bound on rows per page; must be at least 1.
    pub load_batch_size: usize,

    /// Name of the catalog table. Interpolated into SQL, so it must be a
    /// plain identifier.
    pub event_streams_table: String,
}

impl EventStoreConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load_batch_size(mut self, load_batch_size: usize) -> Self {
        self.load_batch_size = load_batch_size;
        self
    }

    pub fn event_streams_table(mut self, table: impl Into<String>) -> Self {
        self.event_streams_table = table.into();
        self
    }

    /// Checks the invariants above.
    pub fn validate(&self) -> Result<()> {
        if self.load_batch_size < 1 {
            return Err(EventStoreError::InvalidArgument(
                "load_batch_size must be at least 1".to_string(),
            ));
        }
        validate_identifier(&self.event_streams_table)
    }
}

impl Default for EventStoreConfig {
    fn default() -> Self {
        Self {
            load_batch_size: DEFAULT_LOAD_BATCH_SIZE,
            event_streams_table: DEFAULT_EVENT_STREAMS_TABLE.to_string(),
        }
    }
}

/// Accepts `[A-Za-z_][A-Za-z0-9_]*`, optionally schema-qualified with one dot.
pub fn validate_identifier(name: &str) -> Result<()> {
    let valid_part = |part: &str| {
        let mut chars = part.chars();
        matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
            && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
    };

    let valid = match name.split_once('.') {
        Some((schema, table)) => valid_part(schema) && valid_part(table),
        None => valid_part(name),
    };

    if valid {
        Ok(())
    } else {
        Err(EventStoreError::InvalidArgument(format!(
            "invalid table name `{name}`"
        )))
    }
}
