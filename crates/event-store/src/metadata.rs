use std::cmp::Ordering;
use std::collections::HashMap;

use regex::Regex;
use serde_json::Value;

use crate::{EventStoreError, Result};

/// Comparison applied between an event's metadata field and a match value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    Equals,
    GreaterThan,
    GreaterThanEquals,
    In,
    LowerThan,
    LowerThanEquals,
    NotEquals,
    Regex,
}

impl Operator {
    /// The SQL operator used for scalar comparisons.
    pub fn as_sql(&self) -> &'static str {
        match self {
            Operator::Equals => "=",
            Operator::GreaterThan => ">",
            Operator::GreaterThanEquals => ">=",
            Operator::In => "= ANY",
            Operator::LowerThan => "<",
            Operator::LowerThanEquals => "<=",
            Operator::NotEquals => "<>",
            Operator::Regex => "~",
        }
    }
}

/// A single `(field, operator, value)` condition.
#[derive(Debug, Clone)]
pub struct MetadataMatch {
    pub field: String,
    pub operator: Operator,
    pub value: Value,
    regex: Option<Regex>,
}

impl MetadataMatch {
    /// Evaluates the condition against a metadata map.
    ///
    /// A missing field behaves like SQL `NULL`: it only satisfies
    /// `Equals` against a `null` value.
    pub fn matches(&self, metadata: &HashMap<String, Value>) -> bool {
        let actual = match metadata.get(&self.field) {
            Some(Value::Null) | None => {
                return self.value.is_null() && self.operator == Operator::Equals;
            }
            Some(actual) => actual,
        };

        if self.value.is_null() {
            return self.operator == Operator::NotEquals;
        }

        match self.operator {
            Operator::In => self.value.as_array().is_some_and(|candidates| {
                candidates
                    .iter()
                    .any(|candidate| compare(actual, candidate) == Some(Ordering::Equal))
            }),
            Operator::Regex => self
                .regex
                .as_ref()
                .is_some_and(|regex| regex.is_match(&as_text(actual))),
            op => match compare(actual, &self.value) {
                Some(ordering) => match op {
                    Operator::Equals => ordering == Ordering::Equal,
                    Operator::NotEquals => ordering != Ordering::Equal,
                    Operator::GreaterThan => ordering == Ordering::Greater,
                    Operator::GreaterThanEquals => ordering != Ordering::Less,
                    Operator::LowerThan => ordering == Ordering::Less,
                    Operator::LowerThanEquals => ordering != Ordering::Greater,
                    Operator::In | Operator::Regex => false,
                },
                None => false,
            },
        }
    }
}

/// An ordered list of metadata conditions combined with AND.
///
/// Built once per read call and handed to `load` / `load_reverse`.
#[derive(Debug, Clone, Default)]
pub struct MetadataMatcher {
    matches: Vec<MetadataMatch>,
}

impl MetadataMatcher {
    /// Creates a matcher without conditions; it matches every event.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a condition.
    ///
    /// `In` needs an array value, `Regex` a string holding a valid pattern;
    /// `null` is only accepted with `Equals` / `NotEquals`; objects are never
    /// accepted.
    pub fn with(
        mut self,
        field: impl Into<String>,
        operator: Operator,
        value: impl Into<Value>,
    ) -> Result<Self> {
        let field = field.into();
        let value = value.into();

        if field.is_empty() {
            return Err(EventStoreError::InvalidArgument(
                "metadata field must not be empty".to_string(),
            ));
        }

        let mut regex = None;
        match (&operator, &value) {
            (_, Value::Object(_)) => {
                return Err(invalid(&field, "object values cannot be matched"));
            }
            (Operator::In, Value::Array(_)) => {}
            (Operator::In, _) => return Err(invalid(&field, "`In` expects an array")),
            (_, Value::Array(_)) => {
                return Err(invalid(&field, "arrays are only allowed with `In`"));
            }
            (Operator::Regex, Value::String(pattern)) => {
                regex = Some(
                    Regex::new(pattern).map_err(|e| invalid(&field, &e.to_string()))?,
                );
            }
            (Operator::Regex, _) => return Err(invalid(&field, "`Regex` expects a string")),
            (Operator::Equals | Operator::NotEquals, Value::Null) => {}
            (_, Value::Null) => {
                return Err(invalid(&field, "null is only allowed with equality"));
            }
            _ => {}
        }

        self.matches.push(MetadataMatch {
            field,
            operator,
            value,
            regex,
        });
        Ok(self)
    }

    /// Returns the conditions in insertion order.
    pub fn data(&self) -> &[MetadataMatch] {
        &self.matches
    }

    pub fn is_empty(&self) -> bool {
        self.matches.is_empty()
    }

    /// Whether all conditions hold for the given metadata.
    pub fn matches(&self, metadata: &HashMap<String, Value>) -> bool {
        self.matches.iter().all(|m| m.matches(metadata))
    }
}

fn invalid(field: &str, reason: &str) -> EventStoreError {
    EventStoreError::InvalidArgument(format!("metadata match on `{field}`: {reason}"))
}

fn as_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Compares like the SQL backend does: numerically when the match value is a
/// number, as booleans for booleans, textually otherwise.
fn compare(actual: &Value, expected: &Value) -> Option<Ordering> {
    match expected {
        Value::Number(expected) => {
            let actual = match actual {
                Value::Number(n) => n.as_f64(),
                Value::String(s) => s.parse::<f64>().ok(),
                _ => None,
            }?;
            actual.partial_cmp(&expected.as_f64()?)
        }
        Value::Bool(expected) => actual.as_bool().map(|actual| actual.cmp(expected)),
        other => Some(as_text(actual).cmp(&as_text(other))),
    }
}
