use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Returned when an identifier is constructed from an empty string.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind} must not be empty")]
pub struct InvalidName {
    pub kind: &'static str,
}

/// Name of a logical event stream.
///
/// The name is stored verbatim in the catalog (`real_stream_name`). A stream
/// belongs to every category `c` for which its name starts with `c-`, so
/// `foo-bar-1` is in both `foo` and `foo-bar`. Names starting with `$` are
/// internal and never picked up by `from_all` projections.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct StreamName(String);

impl StreamName {
    /// Creates a stream name, rejecting empty input.
    pub fn new(name: impl Into<String>) -> Result<Self, InvalidName> {
        let name = name.into();
        if name.is_empty() {
            return Err(InvalidName {
                kind: "stream name",
            });
        }
        Ok(Self(name))
    }

    /// Returns the name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the top-level category (everything before the first `-`), if
    /// any. This is the value stored in the catalog's `category` column.
    pub fn category(&self) -> Option<&str> {
        self.0
            .split_once('-')
            .map(|(category, _)| category)
            .filter(|category| !category.is_empty())
    }

    /// Whether this is an internal stream (`$` prefix).
    pub fn is_internal(&self) -> bool {
        self.0.starts_with('$')
    }
}

impl std::fmt::Display for StreamName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for StreamName {
    type Error = InvalidName;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl TryFrom<&str> for StreamName {
    type Error = InvalidName;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<StreamName> for String {
    fn from(name: StreamName) -> Self {
        name.0
    }
}

impl AsRef<str> for StreamName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Name of a projection; the key of its checkpoint row.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ProjectionName(String);

impl ProjectionName {
    /// Creates a projection name, rejecting empty input.
    pub fn new(name: impl Into<String>) -> Result<Self, InvalidName> {
        let name = name.into();
        if name.is_empty() {
            return Err(InvalidName {
                kind: "projection name",
            });
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ProjectionName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ProjectionName {
    type Error = InvalidName;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl TryFrom<&str> for ProjectionName {
    type Error = InvalidName;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ProjectionName> for String {
    fn from(name: ProjectionName) -> Self {
        name.0
    }
}

impl AsRef<str> for ProjectionName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_name_rejects_empty() {
        let err = StreamName::new("").unwrap_err();
        assert_eq!(err.kind, "stream name");
    }

    #[test]
    fn stream_name_category() {
        assert_eq!(StreamName::new("orders-1").unwrap().category(), Some("orders"));
        assert_eq!(
            StreamName::new("orders-1-a").unwrap().category(),
            Some("orders")
        );
        assert_eq!(StreamName::new("orders").unwrap().category(), None);
        assert_eq!(StreamName::new("-x").unwrap().category(), None);
    }

    #[test]
    fn internal_streams_start_with_dollar() {
        assert!(StreamName::new("$projections").unwrap().is_internal());
        assert!(!StreamName::new("orders-1").unwrap().is_internal());
    }

    #[test]
    fn stream_name_serialization_roundtrip() {
        let name = StreamName::new("orders-1").unwrap();
        let json = serde_json::to_string(&name).unwrap();
        assert_eq!(json, "\"orders-1\"");
        let deserialized: StreamName = serde_json::from_str(&json).unwrap();
        assert_eq!(name, deserialized);
    }

    #[test]
    fn empty_stream_name_fails_to_deserialize() {
        assert!(serde_json::from_str::<StreamName>("\"\"").is_err());
    }

    #[test]
    fn projection_name_rejects_empty() {
        assert!(ProjectionName::new("").is_err());
        assert_eq!(ProjectionName::new("order_totals").unwrap().as_str(), "order_totals");
    }
}
