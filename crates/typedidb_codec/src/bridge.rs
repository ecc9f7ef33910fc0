//! Conversion between serde types and [`Value`].
//!
//! Typed records go through `ciborium`'s value model, so any type that
//! serializes to CBOR can be stored. Floats are rejected the same way the
//! decoder rejects them. Use [`Timestamp`] for fields that should be stored
//! as dates rather than plain integers.

use ciborium::tag::Required;
use ciborium::value::{Integer, Value as CborValue};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::encoder::TAG_EPOCH_DATE;
use crate::error::{CodecError, CodecResult};
use crate::value::Value;

/// Convert a serializable record into a [`Value`].
///
/// # Errors
///
/// Returns [`CodecError::Conversion`] if serialization fails,
/// [`CodecError::FloatForbidden`] if the record contains a float, and
/// [`CodecError::IntegerOverflow`] for integers outside the `i64` range.
pub fn to_value<T: Serialize + ?Sized>(record: &T) -> CodecResult<Value> {
    let raw = CborValue::serialized(record).map_err(|e| CodecError::conversion(e.to_string()))?;
    from_cbor_value(raw)
}

/// Convert a [`Value`] back into a typed record.
///
/// # Errors
///
/// Returns [`CodecError::Conversion`] if the value does not have the shape
/// `T` expects.
pub fn from_value<T: DeserializeOwned>(value: &Value) -> CodecResult<T> {
    to_cbor_value(value)
        .deserialized()
        .map_err(|e| CodecError::conversion(e.to_string()))
}

fn from_cbor_value(raw: CborValue) -> CodecResult<Value> {
    match raw {
        CborValue::Null => Ok(Value::Null),
        CborValue::Bool(b) => Ok(Value::Bool(b)),
        CborValue::Integer(n) => integer(n).map(Value::Integer),
        CborValue::Float(_) => Err(CodecError::FloatForbidden),
        CborValue::Bytes(b) => Ok(Value::Bytes(b)),
        CborValue::Text(s) => Ok(Value::Text(s)),
        CborValue::Array(items) => items
            .into_iter()
            .map(from_cbor_value)
            .collect::<CodecResult<Vec<_>>>()
            .map(Value::Array),
        CborValue::Map(pairs) => pairs
            .into_iter()
            .map(|(k, v)| Ok((from_cbor_value(k)?, from_cbor_value(v)?)))
            .collect::<CodecResult<Vec<_>>>()
            .map(Value::map),
        CborValue::Tag(TAG_EPOCH_DATE, inner) => match *inner {
            CborValue::Integer(n) => integer(n).map(Value::Date),
            CborValue::Float(_) => Err(CodecError::FloatForbidden),
            _ => Err(CodecError::invalid_structure("date tag must wrap an integer")),
        },
        CborValue::Tag(tag, _) => Err(CodecError::unsupported_type(format!("tag {tag}"))),
        _ => Err(CodecError::unsupported_type("unknown CBOR value")),
    }
}

fn to_cbor_value(value: &Value) -> CborValue {
    match value {
        Value::Null => CborValue::Null,
        Value::Bool(b) => CborValue::Bool(*b),
        Value::Integer(n) => CborValue::Integer(Integer::from(*n)),
        Value::Date(ms) => CborValue::Tag(
            TAG_EPOCH_DATE,
            Box::new(CborValue::Integer(Integer::from(*ms))),
        ),
        Value::Bytes(b) => CborValue::Bytes(b.clone()),
        Value::Text(s) => CborValue::Text(s.clone()),
        Value::Array(items) => CborValue::Array(items.iter().map(to_cbor_value).collect()),
        Value::Map(pairs) => CborValue::Map(
            pairs
                .iter()
                .map(|(k, v)| (to_cbor_value(k), to_cbor_value(v)))
                .collect(),
        ),
    }
}

fn integer(n: Integer) -> CodecResult<i64> {
    i64::try_from(i128::from(n)).map_err(|_| CodecError::IntegerOverflow)
}

/// A record field stored as a date.
///
/// Serializes as CBOR tag 1 around epoch milliseconds, which [`to_value`]
/// maps to [`Value::Date`]. Dates are valid keys, so a `Timestamp` field can
/// back a key path or an index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(pub i64);

impl Serialize for Timestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        Required::<i64, TAG_EPOCH_DATE>(self.0).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Timestamp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Required::<i64, TAG_EPOCH_DATE>::deserialize(deserializer).map(|tagged| Timestamp(tagged.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Inner {
        key2: String,
    }

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        key1: Inner,
        key3: i64,
    }

    #[test]
    fn struct_becomes_sorted_map() {
        let sample = Sample {
            key1: Inner {
                key2: "hello".to_string(),
            },
            key3: 5,
        };
        let value = to_value(&sample).unwrap();

        assert_eq!(
            value,
            Value::object([
                ("key1", Value::object([("key2", Value::from("hello"))])),
                ("key3", Value::Integer(5)),
            ])
        );
        assert_eq!(from_value::<Sample>(&value).unwrap(), sample);
    }

    #[test]
    fn floats_are_rejected() {
        #[derive(Serialize)]
        struct Measured {
            ratio: f64,
        }
        assert_eq!(
            to_value(&Measured { ratio: 0.5 }),
            Err(CodecError::FloatForbidden)
        );
    }

    #[test]
    fn shape_mismatch_is_conversion_error() {
        let value = Value::object([("key3", Value::from("not a number"))]);
        assert!(matches!(
            from_value::<Sample>(&value),
            Err(CodecError::Conversion { .. })
        ));
    }

    #[test]
    fn timestamp_maps_to_date() {
        #[derive(Debug, PartialEq, Serialize, Deserialize)]
        struct Event {
            at: Timestamp,
        }
        let event = Event {
            at: Timestamp(1_700_000_000_000),
        };
        let value = to_value(&event).unwrap();

        assert_eq!(value.field("at"), Some(&Value::Date(1_700_000_000_000)));
        assert_eq!(from_value::<Event>(&value).unwrap(), event);
    }

    #[test]
    fn u64_beyond_i64_overflows() {
        assert_eq!(to_value(&u64::MAX), Err(CodecError::IntegerOverflow));
    }
}
