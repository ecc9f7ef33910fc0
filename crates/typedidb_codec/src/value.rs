//! Dynamic record value.

use std::cmp::Ordering;

use crate::encoder::to_canonical_cbor;

/// A dynamically typed record value.
///
/// This is the structured-clone model used by the storage engine: every
/// record is converted to a `Value` before it is stored and is persisted as
/// canonical CBOR. Floats are not representable. Dates are carried as
/// milliseconds since the Unix epoch and are encoded with CBOR tag 1.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// Null value.
    Null,
    /// Boolean value.
    Bool(bool),
    /// Signed integer.
    Integer(i64),
    /// Point in time, in milliseconds since the Unix epoch.
    Date(i64),
    /// Byte string.
    Bytes(Vec<u8>),
    /// Text string (UTF-8).
    Text(String),
    /// Array of values.
    Array(Vec<Value>),
    /// Map of key-value pairs, kept in canonical key order.
    Map(Vec<(Value, Value)>),
}

impl Value {
    /// Create a map value with canonically sorted keys.
    pub fn map(mut pairs: Vec<(Value, Value)>) -> Self {
        pairs.sort_by(|a, b| a.0.cmp_canonical(&b.0));
        Value::Map(pairs)
    }

    /// Create a map value from text field names.
    ///
    /// ```
    /// use typedidb_codec::Value;
    ///
    /// let record = Value::object([("name", Value::from("Ada")), ("age", Value::from(36))]);
    /// assert_eq!(record.field("age"), Some(&Value::Integer(36)));
    /// ```
    pub fn object<K, I>(fields: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        Value::map(
            fields
                .into_iter()
                .map(|(name, value)| (Value::Text(name.into()), value))
                .collect(),
        )
    }

    /// Compare two values by their canonical CBOR encodings.
    ///
    /// Encodings are ordered length-first, then bytewise.
    pub fn cmp_canonical(&self, other: &Self) -> Ordering {
        let a = to_canonical_cbor(self);
        let b = to_canonical_cbor(other);
        a.len().cmp(&b.len()).then_with(|| a.cmp(&b))
    }

    /// Short name of this value's type, for diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Integer(_) => "integer",
            Value::Date(_) => "date",
            Value::Bytes(_) => "bytes",
            Value::Text(_) => "text",
            Value::Array(_) => "array",
            Value::Map(_) => "map",
        }
    }

    /// Check if this value is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Get this value as a boolean, if it is one.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Get this value as an integer, if it is one.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(n) => Some(*n),
            _ => None,
        }
    }

    /// Get this value as epoch milliseconds, if it is a date.
    pub fn as_date(&self) -> Option<i64> {
        match self {
            Value::Date(ms) => Some(*ms),
            _ => None,
        }
    }

    /// Get this value as bytes, if it is a byte string.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// Get this value as a string, if it is a text string.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Get this value as an array, if it is one.
    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }

    /// Get this value as a map, if it is one.
    pub fn as_map(&self) -> Option<&[(Value, Value)]> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Look up a text-named field of a map value.
    pub fn field(&self, name: &str) -> Option<&Value> {
        match self {
            Value::Map(pairs) => pairs
                .iter()
                .find(|(k, _)| k.as_text() == Some(name))
                .map(|(_, v)| v),
            _ => None,
        }
    }

    /// Mutable access to a text-named field of a map value.
    pub fn field_mut(&mut self, name: &str) -> Option<&mut Value> {
        match self {
            Value::Map(pairs) => pairs
                .iter_mut()
                .find(|(k, _)| k.as_text() == Some(name))
                .map(|(_, v)| v),
            _ => None,
        }
    }

    /// Set a text-named field of a map value, keeping canonical order.
    ///
    /// Returns `false` without changing anything if this is not a map.
    pub fn set_field(&mut self, name: &str, value: Value) -> bool {
        let Value::Map(pairs) = self else {
            return false;
        };
        if let Some(slot) = pairs.iter_mut().find(|(k, _)| k.as_text() == Some(name)) {
            slot.1 = value;
        } else {
            pairs.push((Value::Text(name.to_string()), value));
            pairs.sort_by(|a, b| a.0.cmp_canonical(&b.0));
        }
        true
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

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Integer(i64::from(n))
    }
}

impl From<u32> for Value {
    fn from(n: u32) -> Self {
        Value::Integer(i64::from(n))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Value::Bytes(b)
    }
}

impl From<&[u8]> for Value {
    fn from(b: &[u8]) -> Self {
        Value::Bytes(b.to_vec())
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::Array(items)
    }
}

impl From<()> for Value {
    fn from((): ()) -> Self {
        Value::Null
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_sorts_field_names() {
        let record = Value::object([
            ("zeta", Value::Integer(1)),
            ("a", Value::Integer(2)),
            ("mid", Value::Integer(3)),
        ]);

        let names: Vec<_> = record
            .as_map()
            .unwrap()
            .iter()
            .map(|(k, _)| k.as_text().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["a", "mid", "zeta"]);
    }

    #[test]
    fn shorter_keys_sort_first() {
        let map = Value::map(vec![
            (Value::from("abc"), Value::Integer(1)),
            (Value::from("a"), Value::Integer(2)),
            (Value::from("ab"), Value::Integer(3)),
        ]);

        let Value::Map(pairs) = map else {
            panic!("expected map");
        };
        assert_eq!(pairs[0].0, Value::from("a"));
        assert_eq!(pairs[1].0, Value::from("ab"));
        assert_eq!(pairs[2].0, Value::from("abc"));
    }

    #[test]
    fn nested_field_access() {
        let record = Value::object([
            ("key1", Value::object([("key2", Value::from("hello"))])),
            ("key3", Value::Integer(5)),
        ]);

        let inner = record.field("key1").unwrap();
        assert_eq!(inner.field("key2"), Some(&Value::from("hello")));
        assert_eq!(record.field("missing"), None);
        assert_eq!(Value::Integer(1).field("key1"), None);
    }

    #[test]
    fn set_field_inserts_and_replaces() {
        let mut record = Value::object([("b", Value::Integer(1))]);
        assert!(record.set_field("a", Value::Integer(2)));
        assert!(record.set_field("b", Value::Integer(3)));

        assert_eq!(record.field("a"), Some(&Value::Integer(2)));
        assert_eq!(record.field("b"), Some(&Value::Integer(3)));
        assert_eq!(record.as_map().unwrap()[0].0, Value::from("a"));

        let mut scalar = Value::Integer(7);
        assert!(!scalar.set_field("a", Value::Null));
    }

    #[test]
    fn accessors() {
        assert!(Value::Null.is_null());
        assert_eq!(Value::Bool(true).as_bool(), Some(true));
        assert_eq!(Value::Integer(42).as_integer(), Some(42));
        assert_eq!(Value::Date(1_000).as_date(), Some(1_000));
        assert_eq!(Value::Integer(1_000).as_date(), None);
        assert_eq!(Value::from("x").as_text(), Some("x"));
        assert_eq!(Value::Bytes(vec![1, 2]).as_bytes(), Some(&[1, 2][..]));
        assert_eq!(Value::Date(0).type_name(), "date");
    }

    #[test]
    fn from_impls() {
        assert_eq!(Value::from(true), Value::Bool(true));
        assert_eq!(Value::from(42i32), Value::Integer(42));
        assert_eq!(Value::from(42u32), Value::Integer(42));
        assert_eq!(Value::from("hi".to_string()), Value::Text("hi".into()));
        assert_eq!(Value::from(vec![1u8, 2]), Value::Bytes(vec![1, 2]));
        assert_eq!(
            Value::from(vec![Value::Integer(1)]),
            Value::Array(vec![Value::Integer(1)])
        );
        assert_eq!(Value::from(()), Value::Null);
    }
}
