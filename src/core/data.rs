//! Data types carried between South and North connectors.
//!
//! The engine treats measurement payloads as opaque: a South connector
//! produces [`DataValue`]s, the cache persists them, and a North connector
//! receives them unchanged. The wire shape follows the gateway's JSON
//! convention: `{ "pointId": ..., "timestamp": ..., "data": { "value": ...,
//! "quality": ... } }`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A protocol-agnostic value representation.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// Integer value. Tried before `Float` when deserializing so whole
    /// numbers keep their exact representation.
    Integer(i64),

    /// Floating-point number (most common for analog measurements)
    Float(f64),

    /// Boolean value (common for digital I/O)
    Bool(bool),

    /// String value
    String(String),

    /// Null/missing value
    #[default]
    Null,
}

impl Value {
    /// Try to get the value as f64.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            Self::Integer(v) => Some(*v as f64),
            Self::Bool(v) => Some(if *v { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    /// Try to get the value as i64.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(v) => Some(*v),
            Self::Float(v) => Some(*v as i64),
            Self::Bool(v) => Some(if *v { 1 } else { 0 }),
            _ => None,
        }
    }

    /// Try to get the value as bool.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            Self::Integer(v) => Some(*v != 0),
            Self::Float(v) => Some(*v != 0.0),
            _ => None,
        }
    }

    /// Try to get the value as string.
    pub fn as_string(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Check if this is a null value.
    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Self::Float(v as f64)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Integer(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Integer(v as i64)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

/// Data quality marker attached to each measurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    /// The value is trustworthy.
    #[default]
    Good,

    /// The value may be stale or out of range.
    Uncertain,

    /// The value could not be read correctly.
    Bad,
}

impl Quality {
    /// Check if the quality is good.
    #[inline]
    pub const fn is_good(&self) -> bool {
        matches!(self, Self::Good)
    }
}

impl std::fmt::Display for Quality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Good => "good",
            Self::Uncertain => "uncertain",
            Self::Bad => "bad",
        };
        write!(f, "{}", s)
    }
}

/// The typed payload of a measurement.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DataPayload {
    /// The measured value.
    pub value: Value,

    /// Quality marker.
    #[serde(default)]
    pub quality: Quality,
}

/// A single timestamped measurement.
///
/// Uniqueness is not required: delivery is at-least-once, so duplicates
/// produced by retries are acceptable. Ordering within a cache is by
/// timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataValue {
    /// Point identifier (application-level reference).
    pub point_id: String,

    /// When the measurement was taken or received.
    pub timestamp: DateTime<Utc>,

    /// The typed payload.
    pub data: DataPayload,
}

impl DataValue {
    /// Create a new value with the current timestamp and good quality.
    pub fn new(point_id: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            point_id: point_id.into(),
            timestamp: Utc::now(),
            data: DataPayload {
                value: value.into(),
                quality: Quality::Good,
            },
        }
    }

    /// Set the timestamp.
    #[must_use]
    pub fn with_timestamp(mut self, ts: DateTime<Utc>) -> Self {
        self.timestamp = ts;
        self
    }

    /// Set the quality.
    #[must_use]
    pub fn with_quality(mut self, quality: Quality) -> Self {
        self.data.quality = quality;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_conversions() {
        let v = Value::from(42.5);
        assert_eq!(v.as_f64(), Some(42.5));
        assert_eq!(v.as_i64(), Some(42));

        let v = Value::from(true);
        assert_eq!(v.as_bool(), Some(true));
        assert_eq!(v.as_f64(), Some(1.0));
    }

    #[test]
    fn test_data_value_builder() {
        let value = DataValue::new("p1", 25.5).with_quality(Quality::Uncertain);
        assert_eq!(value.point_id, "p1");
        assert_eq!(value.data.value.as_f64(), Some(25.5));
        assert_eq!(value.data.quality, Quality::Uncertain);
    }

    #[test]
    fn test_wire_format() {
        let ts: DateTime<Utc> = "2024-01-01T00:00:00Z".parse().unwrap();
        let value = DataValue::new("p1", 42i64).with_timestamp(ts);
        let json = serde_json::to_value(&value).unwrap();

        assert_eq!(json["pointId"], "p1");
        assert_eq!(json["timestamp"], "2024-01-01T00:00:00Z");
        assert_eq!(json["data"]["value"], 42);
        assert_eq!(json["data"]["quality"], "good");
    }

    #[test]
    fn test_wire_format_missing_quality() {
        let raw = r#"{"pointId":"p1","timestamp":"2024-01-01T00:00:00Z","data":{"value":42}}"#;
        let value: DataValue = serde_json::from_str(raw).unwrap();
        assert_eq!(value.point_id, "p1");
        assert_eq!(value.data.value.as_i64(), Some(42));
        assert_eq!(value.data.quality, Quality::Good);
    }
}
