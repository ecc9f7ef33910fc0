//! Typed records.

use serde::de::DeserializeOwned;
use serde::Serialize;
use typedidb_codec::{from_value, to_value, Value};

use crate::error::CoreResult;

/// A type that can be stored in an object store.
///
/// Implemented for every serde type; records cross the engine boundary as
/// [`Value`]s.
pub trait Record: Serialize + DeserializeOwned + Clone + 'static {}

impl<T> Record for T where T: Serialize + DeserializeOwned + Clone + 'static {}

pub(crate) fn encode<R: Record>(record: &R) -> CoreResult<Value> {
    Ok(to_value(record)?)
}

pub(crate) fn decode<R: Record>(value: &Value) -> CoreResult<R> {
    Ok(from_value(value)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Note {
        id: i64,
        text: String,
    }

    #[test]
    fn records_cross_as_values() {
        let note = Note {
            id: 3,
            text: "hi".to_string(),
        };
        let value = encode(&note).unwrap();
        assert_eq!(value.field("id"), Some(&Value::Integer(3)));
        assert_eq!(decode::<Note>(&value).unwrap(), note);
    }

    #[test]
    fn wrong_shape_is_a_codec_error() {
        let value = Value::object([("id", Value::from("three"))]);
        let err = decode::<Note>(&value).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Data);
    }
}
