use std::cmp::Ordering;
use std::collections::HashMap;

use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;

/// A runtime value bound into an evaluation context or produced by the
/// partial evaluator.
///
/// The type distinguishes integers from exact decimals: arithmetic widens
/// both to [`Decimal`] before combining, and narrows the result back to
/// `Integer` when it is exact.
///
/// # Examples
///
/// ```
/// use warden_ql::Value;
///
/// let name = Value::from("Alice");
/// let age = Value::from(30);
/// let tags = Value::Collection(vec![Value::from("admin"), Value::from("user")]);
/// assert!(!tags.is_empty_collection().unwrap());
/// let _ = (name, age);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// The SQL NULL value.
    Null,

    /// TRUE or FALSE.
    Boolean(bool),

    /// Integer number (preserved separately from decimals).
    Integer(i64),

    /// Exact decimal number.
    Decimal(Decimal),

    /// UTF-8 string.
    String(String),

    /// A collection-valued attribute (bag semantics, order preserved).
    Collection(Vec<Value>),

    /// A map-valued attribute as ordered key/value pairs.
    Map(Vec<(Value, Value)>),

    /// An entity or embeddable instance: attribute name to value.
    Object(HashMap<String, Value>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Get as boolean, when the value is one.
    pub fn as_boolean(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Widen to decimal, when the value is numeric.
    pub fn as_decimal(&self) -> Option<Decimal> {
        match self {
            Value::Integer(n) => Decimal::from_i64(*n),
            Value::Decimal(d) => Some(*d),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_collection(&self) -> Option<&[Value]> {
        match self {
            Value::Collection(items) => Some(items),
            _ => None,
        }
    }

    /// Whether a collection- or map-valued value has no elements; `None`
    /// for values that are neither.
    pub fn is_empty_collection(&self) -> Option<bool> {
        match self {
            Value::Collection(items) => Some(items.is_empty()),
            Value::Map(entries) => Some(entries.is_empty()),
            _ => None,
        }
    }

    /// Attribute lookup on an object value.
    pub fn attribute(&self, name: &str) -> Option<&Value> {
        match self {
            Value::Object(attributes) => attributes.get(name),
            _ => None,
        }
    }

    /// Equality with numeric widening: `Integer(2)` equals `Decimal(2.0)`.
    ///
    /// Returns `None` when the two values are of incomparable types
    /// (e.g. a string against a collection); NULL handling is the
    /// evaluator's concern, not this method's.
    pub fn equals(&self, other: &Value) -> Option<bool> {
        match (self, other) {
            (Value::Null, _) | (_, Value::Null) => None,
            _ => {
                if let (Some(a), Some(b)) = (self.as_decimal(), other.as_decimal()) {
                    return Some(a == b);
                }
                match (self, other) {
                    (Value::Boolean(a), Value::Boolean(b)) => Some(a == b),
                    (Value::String(a), Value::String(b)) => Some(a == b),
                    (Value::Collection(a), Value::Collection(b)) => Some(a == b),
                    (Value::Map(a), Value::Map(b)) => Some(a == b),
                    (Value::Object(a), Value::Object(b)) => Some(a == b),
                    _ => None,
                }
            }
        }
    }

    /// Ordering for the relational operators: numerics compare as
    /// decimals, strings lexicographically. Other pairings have no order.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        if let (Some(a), Some(b)) = (self.as_decimal(), other.as_decimal()) {
            return Some(a.cmp(&b));
        }
        match (self, other) {
            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    /// Lossy conversion for floating-point callers; `None` for NaN and
    /// values outside the decimal range.
    pub fn from_f64(value: f64) -> Option<Value> {
        Decimal::from_f64(value).map(Value::Decimal)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Value {
        Value::Boolean(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Value {
        Value::Integer(value)
    }
}

impl From<Decimal> for Value {
    fn from(value: Decimal) -> Value {
        Value::Decimal(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Value {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Value {
        Value::String(value)
    }
}

impl From<serde_json::Value> for Value {
    /// Bind values straight from JSON: objects become attribute maps,
    /// arrays become collections, numbers become integers when exact.
    fn from(value: serde_json::Value) -> Value {
        match value {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Boolean(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Integer(i)
                } else {
                    n.as_f64()
                        .and_then(Value::from_f64)
                        .unwrap_or(Value::Null)
                }
            }
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::Collection(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(entries) => Value::Object(
                entries
                    .into_iter()
                    .map(|(k, v)| (k, Value::from(v)))
                    .collect(),
            ),
        }
    }
}
