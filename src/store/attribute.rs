//! Attribute value types.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};

/// Attribute set of one record (or of one caller), keyed by field name.
pub type Attributes = HashMap<String, AttributeValue>;

/// A value attached to a record and referenced by security policies.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    /// Boolean value.
    Boolean(bool),
    /// 64-bit signed integer.
    Integer(i64),
    /// 64-bit floating point number.
    Float(f64),
    /// String value.
    String(String),
    /// Array of values (a record tagged with several groups, for instance).
    Array(Vec<AttributeValue>),
    /// Null/missing value.
    Null,
}

impl Eq for AttributeValue {}

impl Hash for AttributeValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);

        match self {
            AttributeValue::String(s) => s.hash(state),
            AttributeValue::Integer(i) => i.hash(state),
            // Bit pattern keeps hashing consistent with `==` for non-NaN floats.
            AttributeValue::Float(f) => f.to_bits().hash(state),
            AttributeValue::Boolean(b) => b.hash(state),
            AttributeValue::Array(arr) => {
                arr.len().hash(state);
                for item in arr {
                    item.hash(state);
                }
            }
            AttributeValue::Null => {}
        }
    }
}

impl AttributeValue {
    /// Check if this value is null.
    pub fn is_null(&self) -> bool {
        matches!(self, AttributeValue::Null)
    }

    fn as_number(&self) -> Option<f64> {
        match self {
            AttributeValue::Integer(i) => Some(*i as f64),
            AttributeValue::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Order of two values for range rules; `None` across incomparable types.
    ///
    /// Integers compare exactly with each other and as `f64` against floats.
    pub fn partial_cmp_value(&self, other: &AttributeValue) -> Option<Ordering> {
        match (self, other) {
            (AttributeValue::Integer(a), AttributeValue::Integer(b)) => Some(a.cmp(b)),
            (AttributeValue::String(a), AttributeValue::String(b)) => Some(a.cmp(b)),
            (AttributeValue::Boolean(a), AttributeValue::Boolean(b)) => Some(a.cmp(b)),
            _ => self.as_number()?.partial_cmp(&other.as_number()?),
        }
    }

    /// Whether this value equals `other` or, if this is an array, contains it.
    ///
    /// Lets a caller attribute like `tenant = "acme"` match a record tagged
    /// `tenant = ["acme", "globex"]`.
    pub fn matches(&self, other: &AttributeValue) -> bool {
        if self.is_null() || other.is_null() {
            return false;
        }
        match self {
            AttributeValue::Array(items) => items.iter().any(|item| item.matches(other)),
            _ => match other {
                AttributeValue::Array(items) => items.iter().any(|item| self.matches(item)),
                _ => self.partial_cmp_value(other) == Some(Ordering::Equal),
            },
        }
    }
}

impl From<String> for AttributeValue {
    fn from(s: String) -> Self {
        AttributeValue::String(s)
    }
}

impl From<&str> for AttributeValue {
    fn from(s: &str) -> Self {
        AttributeValue::String(s.to_string())
    }
}

impl From<i64> for AttributeValue {
    fn from(i: i64) -> Self {
        AttributeValue::Integer(i)
    }
}

impl From<i32> for AttributeValue {
    fn from(i: i32) -> Self {
        AttributeValue::Integer(i as i64)
    }
}

impl From<f64> for AttributeValue {
    fn from(f: f64) -> Self {
        AttributeValue::Float(f)
    }
}

impl From<bool> for AttributeValue {
    fn from(b: bool) -> Self {
        AttributeValue::Boolean(b)
    }
}

impl<T: Into<AttributeValue>> From<Vec<T>> for AttributeValue {
    fn from(v: Vec<T>) -> Self {
        AttributeValue::Array(v.into_iter().map(Into::into).collect())
    }
}
