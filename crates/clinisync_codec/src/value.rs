//! Dynamic value tree.

use crate::encoder::to_canonical_cbor;
use std::cmp::Ordering;

/// A dynamic CBOR value.
///
/// Maps keep their pairs in a `Vec`; the encoder sorts them, so two maps
/// built in different insertion orders still encode identically.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Null value.
    Null,
    /// Boolean value.
    Bool(bool),
    /// Signed integer (full i64 range).
    Integer(i64),
    /// Unsigned integer above `i64::MAX`. Smaller values are `Integer`.
    Unsigned(u64),
    /// 64-bit float. NaN cannot be encoded.
    Float(f64),
    /// Byte string.
    Bytes(Vec<u8>),
    /// UTF-8 text string.
    Text(String),
    /// Array of values.
    Array(Vec<Value>),
    /// Map of key-value pairs.
    Map(Vec<(Value, Value)>),
    /// Tagged item (major type 6).
    Tag(u64, Box<Value>),
}

impl Value {
    /// Creates a map value with its pairs already in canonical key order.
    pub fn map(mut pairs: Vec<(Value, Value)>) -> Self {
        pairs.sort_by(|a, b| a.0.cmp_canonical(&b.0));
        Value::Map(pairs)
    }

    /// Creates a text value.
    pub fn text(s: impl Into<String>) -> Self {
        Value::Text(s.into())
    }

    /// Orders two values by their canonical encodings.
    ///
    /// Values that cannot be encoded (NaN floats) compare equal to everything,
    /// and the encoder rejects them later anyway.
    pub fn cmp_canonical(&self, other: &Self) -> Ordering {
        match (to_canonical_cbor(self), to_canonical_cbor(other)) {
            (Ok(a), Ok(b)) => a.len().cmp(&b.len()).then_with(|| a.cmp(&b)),
            _ => Ordering::Equal,
        }
    }

    /// Returns true for `Null`.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Returns the integer, if this is one.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(n) => Some(*n),
            _ => None,
        }
    }

    /// Returns the byte string, if this is one.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// Returns the text, if this is a text string.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Integer(n)
    }
}

impl From<u32> for Value {
    fn from(n: u32) -> Self {
        Value::Integer(i64::from(n))
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Value::Bytes(b)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(opt: Option<T>) -> Self {
        opt.map_or(Value::Null, Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_sorts_shorter_keys_first() {
        let map = Value::map(vec![
            (Value::text("priority"), Value::Integer(1)),
            (Value::text("id"), Value::Integer(2)),
            (Value::text("type"), Value::Integer(3)),
        ]);

        let Value::Map(pairs) = map else {
            panic!("expected map");
        };
        let keys: Vec<_> = pairs.iter().filter_map(|(k, _)| k.as_text()).collect();
        assert_eq!(keys, vec!["id", "type", "priority"]);
    }

    #[test]
    fn integers_sort_before_text() {
        let mut values = vec![Value::text("a"), Value::Integer(-1), Value::Integer(7)];
        values.sort_by(Value::cmp_canonical);
        assert_eq!(
            values,
            vec![Value::Integer(7), Value::Integer(-1), Value::text("a")]
        );
    }

    #[test]
    fn option_conversion() {
        assert_eq!(Value::from(None::<String>), Value::Null);
        assert_eq!(Value::from(Some("x")), Value::text("x"));
    }
}
