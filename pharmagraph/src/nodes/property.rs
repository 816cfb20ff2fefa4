//! Property values carried by staged nodes and relationships.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::utils::text;

/// Ordered property map, so serialised output and generated queries are deterministic.
pub type Properties = BTreeMap<String, PropertyValue>;

/// A property value as the graph store understands it.
///
/// Nested maps are not representable: graph stores only accept scalars and
/// homogeneous lists as property values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    List(Vec<PropertyValue>),
}

impl PropertyValue {
    /// `Null`, or text that reads as "no value" (`""`, `"Unknown"`, `"N/A"` …).
    pub fn is_placeholder(&self) -> bool {
        match self {
            PropertyValue::Null => true,
            PropertyValue::Text(s) => text::is_placeholder(s),
            _ => false,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropertyValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Numeric view. Text is not coerced.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            PropertyValue::Int(i) => Some(*i as f64),
            PropertyValue::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[PropertyValue]> {
        match self {
            PropertyValue::List(items) => Some(items),
            _ => None,
        }
    }

    /// Text used for fingerprint key values. Lists and nulls contribute nothing.
    pub fn key_text(&self) -> String {
        match self {
            PropertyValue::Null | PropertyValue::List(_) => String::new(),
            other => other.to_string(),
        }
    }

    /// Total ordering key across variants, used to sort unioned lists.
    pub fn sort_key(&self) -> String {
        let tag = match self {
            PropertyValue::Null => 0,
            PropertyValue::Bool(_) => 1,
            PropertyValue::Int(_) | PropertyValue::Float(_) => 2,
            PropertyValue::Text(_) => 3,
            PropertyValue::List(_) => 4,
        };
        format!("{tag}:{self}")
    }

    /// Convert a decoded JSON value. Objects, and lists containing objects or
    /// lists, have no property representation and yield `None`.
    pub fn from_json(value: &serde_json::Value) -> Option<PropertyValue> {
        use serde_json::Value;
        match value {
            Value::Null => Some(PropertyValue::Null),
            Value::Bool(b) => Some(PropertyValue::Bool(*b)),
            Value::Number(n) => n
                .as_i64()
                .map(PropertyValue::Int)
                .or_else(|| n.as_f64().map(PropertyValue::Float)),
            Value::String(s) => Some(PropertyValue::Text(s.clone())),
            Value::Array(items) => items
                .iter()
                .map(|item| match item {
                    Value::Array(_) | Value::Object(_) => None,
                    scalar => PropertyValue::from_json(scalar),
                })
                .collect::<Option<Vec<_>>>()
                .map(PropertyValue::List),
            Value::Object(_) => None,
        }
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyValue::Null => f.write_str("null"),
            PropertyValue::Bool(b) => write!(f, "{b}"),
            PropertyValue::Int(i) => write!(f, "{i}"),
            PropertyValue::Float(x) => write!(f, "{x}"),
            PropertyValue::Text(s) => f.write_str(s),
            PropertyValue::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
        }
    }
}

impl From<&str> for PropertyValue {
    fn from(s: &str) -> Self {
        PropertyValue::Text(s.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(s: String) -> Self {
        PropertyValue::Text(s)
    }
}

impl From<i64> for PropertyValue {
    fn from(i: i64) -> Self {
        PropertyValue::Int(i)
    }
}

impl From<f64> for PropertyValue {
    fn from(x: f64) -> Self {
        PropertyValue::Float(x)
    }
}

impl From<bool> for PropertyValue {
    fn from(b: bool) -> Self {
        PropertyValue::Bool(b)
    }
}

impl From<Vec<String>> for PropertyValue {
    fn from(items: Vec<String>) -> Self {
        PropertyValue::List(items.into_iter().map(PropertyValue::Text).collect())
    }
}

impl<T: Into<PropertyValue>> From<Option<T>> for PropertyValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(PropertyValue::Null, Into::into)
    }
}
