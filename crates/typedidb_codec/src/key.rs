//! Storage keys.
//!
//! Only a subset of values can identify a record: numbers, dates, strings,
//! binary strings and arrays built from those. Keys are totally ordered the
//! way the engine orders them, which is not the canonical CBOR order:
//!
//! ```text
//! number < date < text < binary < array
//! ```
//!
//! Within a type, numbers and dates compare numerically, text compares by
//! UTF-16 code units, binary compares bytewise and arrays compare element by
//! element with a shorter prefix sorting first.

use std::cmp::Ordering;
use std::fmt;

use crate::error::{CodecError, CodecResult};
use crate::value::Value;

/// A valid storage key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Key {
    /// Numeric key.
    Number(i64),
    /// Date key, in milliseconds since the Unix epoch.
    Date(i64),
    /// String key.
    Text(String),
    /// Binary key.
    Binary(Vec<u8>),
    /// Array key; also the shape of composite keys.
    Array(Vec<Key>),
}

impl Key {
    /// Convert a record value into a key.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::InvalidKey`] for null, booleans, maps, or arrays
    /// containing any of those.
    pub fn from_value(value: &Value) -> CodecResult<Self> {
        match value {
            Value::Integer(n) => Ok(Key::Number(*n)),
            Value::Date(ms) => Ok(Key::Date(*ms)),
            Value::Text(s) => Ok(Key::Text(s.clone())),
            Value::Bytes(b) => Ok(Key::Binary(b.clone())),
            Value::Array(items) => items
                .iter()
                .map(Key::from_value)
                .collect::<CodecResult<Vec<_>>>()
                .map(Key::Array),
            other => Err(CodecError::invalid_key(format!(
                "{} is not a key type",
                other.type_name()
            ))),
        }
    }

    /// Convert this key back into a record value.
    pub fn to_value(&self) -> Value {
        match self {
            Key::Number(n) => Value::Integer(*n),
            Key::Date(ms) => Value::Date(*ms),
            Key::Text(s) => Value::Text(s.clone()),
            Key::Binary(b) => Value::Bytes(b.clone()),
            Key::Array(items) => Value::Array(items.iter().map(Key::to_value).collect()),
        }
    }

    /// Returns the number if this is a numeric key.
    pub fn as_number(&self) -> Option<i64> {
        match self {
            Key::Number(n) => Some(*n),
            _ => None,
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Key::Number(_) => 0,
            Key::Date(_) => 1,
            Key::Text(_) => 2,
            Key::Binary(_) => 3,
            Key::Array(_) => 4,
        }
    }
}

impl Ord for Key {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Key::Number(a), Key::Number(b)) | (Key::Date(a), Key::Date(b)) => a.cmp(b),
            (Key::Text(a), Key::Text(b)) => a.encode_utf16().cmp(b.encode_utf16()),
            (Key::Binary(a), Key::Binary(b)) => a.cmp(b),
            (Key::Array(a), Key::Array(b)) => a.iter().cmp(b.iter()),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl PartialOrd for Key {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Number(n) => write!(f, "{n}"),
            Key::Date(ms) => write!(f, "date({ms})"),
            Key::Text(s) => write!(f, "{s:?}"),
            Key::Binary(b) => {
                f.write_str("0x")?;
                for byte in b {
                    write!(f, "{byte:02x}")?;
                }
                Ok(())
            }
            Key::Array(items) => {
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

impl From<i64> for Key {
    fn from(n: i64) -> Self {
        Key::Number(n)
    }
}

impl From<i32> for Key {
    fn from(n: i32) -> Self {
        Key::Number(i64::from(n))
    }
}

impl From<u32> for Key {
    fn from(n: u32) -> Self {
        Key::Number(i64::from(n))
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Key::Text(s.to_string())
    }
}

impl From<String> for Key {
    fn from(s: String) -> Self {
        Key::Text(s)
    }
}

impl From<Vec<u8>> for Key {
    fn from(b: Vec<u8>) -> Self {
        Key::Binary(b)
    }
}

impl From<Vec<Key>> for Key {
    fn from(items: Vec<Key>) -> Self {
        Key::Array(items)
    }
}

impl<A: Into<Key>, B: Into<Key>> From<(A, B)> for Key {
    fn from((a, b): (A, B)) -> Self {
        Key::Array(vec![a.into(), b.into()])
    }
}

impl<A: Into<Key>, B: Into<Key>, C: Into<Key>> From<(A, B, C)> for Key {
    fn from((a, b, c): (A, B, C)) -> Self {
        Key::Array(vec![a.into(), b.into(), c.into()])
    }
}

impl TryFrom<&Value> for Key {
    type Error = CodecError;

    fn try_from(value: &Value) -> CodecResult<Self> {
        Key::from_value(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_order() {
        let mut keys = vec![
            Key::Array(vec![]),
            Key::Binary(vec![0]),
            Key::from("a"),
            Key::Date(0),
            Key::Number(i64::MAX),
        ];
        keys.sort();

        assert_eq!(
            keys,
            vec![
                Key::Number(i64::MAX),
                Key::Date(0),
                Key::from("a"),
                Key::Binary(vec![0]),
                Key::Array(vec![]),
            ]
        );
    }

    #[test]
    fn array_prefix_sorts_first() {
        let short = Key::from(("hello", 5));
        let long = Key::Array(vec![Key::from("hello"), Key::Number(5), Key::Number(0)]);
        assert!(short < long);
        assert!(Key::from(("a", 9)) < Key::from(("b", 0)));
    }

    #[test]
    fn text_uses_utf16_order() {
        // U+FF61 is a single UTF-16 unit, U+1F600 is a surrogate pair starting 0xD83D.
        let bmp = Key::from("\u{FF61}");
        let astral = Key::from("\u{1F600}");
        assert!(astral < bmp);
    }

    #[test]
    fn from_value_accepts_key_types() {
        let value = Value::Array(vec![
            Value::from("hello"),
            Value::Integer(5),
            Value::Date(10),
            Value::Bytes(vec![1]),
        ]);
        let key = Key::from_value(&value).unwrap();
        assert_eq!(
            key,
            Key::Array(vec![
                Key::from("hello"),
                Key::Number(5),
                Key::Date(10),
                Key::Binary(vec![1]),
            ])
        );
        assert_eq!(key.to_value(), value);
    }

    #[test]
    fn from_value_rejects_non_keys() {
        assert!(matches!(
            Key::from_value(&Value::Null),
            Err(CodecError::InvalidKey { .. })
        ));
        assert!(Key::from_value(&Value::Bool(true)).is_err());
        assert!(Key::from_value(&Value::object([("a", Value::Integer(1))])).is_err());
        assert!(Key::from_value(&Value::Array(vec![Value::Integer(1), Value::Null])).is_err());
    }

    #[test]
    fn display() {
        assert_eq!(Key::from(("hello", 5)).to_string(), "[\"hello\", 5]");
        assert_eq!(Key::Binary(vec![0xab, 0x01]).to_string(), "0xab01");
        assert_eq!(Key::Date(3).to_string(), "date(3)");
    }
}
