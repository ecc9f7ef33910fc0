//! # typedidb Codec
//!
//! Record values, storage keys and canonical CBOR for typedidb.
//!
//! Every record written through typedidb is first converted into a
//! [`Value`] (the structured clone) and persisted as canonical CBOR, so two
//! equal records always produce identical bytes. Storage keys are the
//! [`Key`] subset of values and carry the engine's total order.
//!
//! ## Canonical CBOR Rules
//!
//! - Maps are sorted by key (length-first, then bytewise on encoded keys)
//! - Integers use shortest encoding
//! - No floats
//! - Strings must be UTF-8
//! - No indefinite-length items
//! - The only tag is 1 (epoch date, milliseconds)
//!
//! ## Usage
//!
//! ```
//! use typedidb_codec::{from_cbor, to_canonical_cbor, Key, Value};
//!
//! let record = Value::object([("id", Value::from("a-1")), ("n", Value::from(3))]);
//! let bytes = to_canonical_cbor(&record);
//! assert_eq!(from_cbor(&bytes).unwrap(), record);
//!
//! let key = Key::from_value(record.field("id").unwrap()).unwrap();
//! assert_eq!(key, Key::from("a-1"));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod bridge;
mod decoder;
mod encoder;
mod error;
mod key;
mod value;

pub use bridge::{from_value, to_value, Timestamp};
pub use decoder::{from_cbor, CanonicalDecoder};
pub use encoder::{to_canonical_cbor, CanonicalEncoder};
pub use error::{CodecError, CodecResult};
pub use key::Key;
pub use value::Value;

/// Types with a canonical byte form.
pub trait Encode {
    /// Encode this value to canonical CBOR bytes.
    fn encode(&self) -> Vec<u8>;
}

/// Types that can be rebuilt from their canonical byte form.
pub trait Decode: Sized {
    /// Decode this value from CBOR bytes.
    fn decode(bytes: &[u8]) -> CodecResult<Self>;
}

impl Encode for Value {
    fn encode(&self) -> Vec<u8> {
        to_canonical_cbor(self)
    }
}

impl Decode for Value {
    fn decode(bytes: &[u8]) -> CodecResult<Self> {
        from_cbor(bytes)
    }
}

impl Encode for Key {
    fn encode(&self) -> Vec<u8> {
        to_canonical_cbor(&self.to_value())
    }
}

impl Decode for Key {
    fn decode(bytes: &[u8]) -> CodecResult<Self> {
        Key::from_value(&from_cbor(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn record_strategy() -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(Value::Integer),
            any::<i64>().prop_map(Value::Date),
            prop::collection::vec(any::<u8>(), 0..16).prop_map(Value::Bytes),
            "[a-z]{0,8}".prop_map(Value::Text),
        ];
        leaf.prop_recursive(3, 32, 4, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
                prop::collection::btree_map("[a-z]{1,6}", inner, 0..4)
                    .prop_map(Value::object),
            ]
        })
    }

    proptest! {
        #[test]
        fn decode_inverts_encode(value in record_strategy()) {
            let decoded = Value::decode(&value.encode()).unwrap();
            prop_assert_eq!(decoded, value);
        }

        #[test]
        fn key_bytes_survive(n in any::<i64>(), s in "[a-z]{0,8}") {
            let key = Key::from((s.as_str(), n));
            prop_assert_eq!(Key::decode(&key.encode()).unwrap(), key);
        }
    }

    #[test]
    fn non_key_bytes_are_rejected_as_keys() {
        let bytes = Value::Bool(true).encode();
        assert!(matches!(Key::decode(&bytes), Err(CodecError::InvalidKey { .. })));
    }
}
