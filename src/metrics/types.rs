//! Core value types shared by metric definitions, collectors and the engine

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Aggregation strategy applied to a metric during a batch window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationKind {
    /// Number of events seen in the window (ignores the measurement)
    Counter,

    /// Arithmetic sum of the measurements
    Sum,

    /// Running mean of the measurements
    Average,

    /// Every measurement with the time it was observed, newest first
    RawList,
}

impl AggregationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AggregationKind::Counter => "counter",
            AggregationKind::Sum => "sum",
            AggregationKind::Average => "average",
            AggregationKind::RawList => "raw_list",
        }
    }

    /// Whether the collector reads the measurement value at all
    pub fn needs_value(&self) -> bool {
        !matches!(self, AggregationKind::Counter)
    }
}

impl fmt::Display for AggregationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A measurement, tag value or emitted value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricValue {
    Integer(i64),
    Float(f64),
    Boolean(bool),
    String(String),
}

impl MetricValue {
    /// Numeric view of the value, `None` for strings and booleans
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            MetricValue::Integer(i) => Some(*i as f64),
            MetricValue::Float(f) => Some(*f),
            MetricValue::Boolean(_) | MetricValue::String(_) => None,
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, MetricValue::Integer(_) | MetricValue::Float(_))
    }

    /// Add two numeric values. Integers stay integers until a float shows up
    /// or the integer sum overflows.
    pub fn checked_add(&self, other: &MetricValue) -> Option<MetricValue> {
        match (self, other) {
            (MetricValue::Integer(a), MetricValue::Integer(b)) => Some(
                a.checked_add(*b)
                    .map(MetricValue::Integer)
                    .unwrap_or(MetricValue::Float(*a as f64 + *b as f64)),
            ),
            _ => Some(MetricValue::Float(self.as_f64()? + other.as_f64()?)),
        }
    }
}

impl fmt::Display for MetricValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricValue::Integer(i) => write!(f, "{}", i),
            MetricValue::Float(v) => write!(f, "{}", v),
            MetricValue::Boolean(b) => write!(f, "{}", b),
            MetricValue::String(s) => f.write_str(s),
        }
    }
}

impl From<i64> for MetricValue {
    fn from(v: i64) -> Self {
        MetricValue::Integer(v)
    }
}

impl From<i32> for MetricValue {
    fn from(v: i32) -> Self {
        MetricValue::Integer(v as i64)
    }
}

impl From<u32> for MetricValue {
    fn from(v: u32) -> Self {
        MetricValue::Integer(v as i64)
    }
}

impl From<f64> for MetricValue {
    fn from(v: f64) -> Self {
        MetricValue::Float(v)
    }
}

impl From<bool> for MetricValue {
    fn from(v: bool) -> Self {
        MetricValue::Boolean(v)
    }
}

impl From<String> for MetricValue {
    fn from(v: String) -> Self {
        MetricValue::String(v)
    }
}

impl From<&str> for MetricValue {
    fn from(v: &str) -> Self {
        MetricValue::String(v.to_string())
    }
}

/// Numeric (or other) readings carried by an event
pub type Measurements = BTreeMap<String, MetricValue>;

/// Free-form context carried by an event, used for tags and filtering
pub type Metadata = BTreeMap<String, MetricValue>;

/// Build a `Measurements`/`Metadata` map from literal pairs
pub fn value_map<V: Into<MetricValue>>(
    pairs: impl IntoIterator<Item = (&'static str, V)>,
) -> BTreeMap<String, MetricValue> {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.into()))
        .collect()
}

/// Failure while evaluating one metric against one event
#[derive(Debug, Clone, PartialEq)]
pub enum MetricError {
    /// The event carried no value for a collector that needs one
    MissingValue,
    /// The collector needs a number but got something else
    NotNumeric(MetricValue),
    /// A user-supplied extractor, tag resolver or predicate failed
    Extractor(String),
}

impl fmt::Display for MetricError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricError::MissingValue => write!(f, "event carried no value for this metric"),
            MetricError::NotNumeric(value) => write!(f, "expected a numeric value, got {:?}", value),
            MetricError::Extractor(msg) => write!(f, "extractor failed: {}", msg),
        }
    }
}

impl std::error::Error for MetricError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_display() {
        assert_eq!(MetricValue::Integer(42).to_string(), "42");
        assert_eq!(MetricValue::Float(88.5).to_string(), "88.5");
        assert_eq!(MetricValue::Boolean(true).to_string(), "true");
        assert_eq!(MetricValue::from("GET").to_string(), "GET");
    }

    #[test]
    fn test_checked_add_keeps_integers() {
        let sum = MetricValue::Integer(2).checked_add(&MetricValue::Integer(3));
        assert_eq!(sum, Some(MetricValue::Integer(5)));
    }

    #[test]
    fn test_checked_add_promotes_to_float() {
        let sum = MetricValue::Integer(2).checked_add(&MetricValue::Float(0.5));
        assert_eq!(sum, Some(MetricValue::Float(2.5)));
    }

    #[test]
    fn test_checked_add_rejects_strings() {
        assert_eq!(MetricValue::Integer(2).checked_add(&MetricValue::from("x")), None);
    }

    #[test]
    fn test_value_serializes_untagged() {
        let json = serde_json::to_string(&vec![
            MetricValue::Integer(1),
            MetricValue::Float(1.5),
            MetricValue::from("ok"),
        ])
        .unwrap();
        assert_eq!(json, r#"[1,1.5,"ok"]"#);
    }

    #[test]
    fn test_aggregation_kind_names() {
        assert_eq!(AggregationKind::RawList.as_str(), "raw_list");
        assert!(!AggregationKind::Counter.needs_value());
        assert!(AggregationKind::Average.needs_value());
    }
}
